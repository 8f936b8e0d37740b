use chrono::Utc;
use rand_core::{OsRng, RngCore};

use crate::db::{DbError, Repository};
use crate::models::{AccessToken, User, UserProperties};
use crate::services::idhash::id_hash;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("user is disabled")]
    Disabled,
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Client fields taken from the authorization header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientInfo {
    pub client: String,
    pub device: String,
    pub device_id: String,
    pub version: String,
    pub token: Option<String>,
}

/// Hash a password with bcrypt. Runs on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    Ok(tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST)).await??)
}

/// Verify a password against a bcrypt hash. Malformed hashes never match.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await?;
    Ok(ok)
}

/// 16 random bytes, hex encoded.
pub fn new_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Create and store a user. The id is derived from the username.
pub async fn create_user(
    repo: &Repository,
    username: &str,
    password: &str,
    admin: bool,
) -> Result<User, AuthError> {
    let user = User {
        id: id_hash(username),
        username: username.to_string(),
        password_hash: hash_password(password).await?,
        created: Utc::now(),
        last_login: None,
        last_used: None,
        properties: UserProperties {
            admin,
            ..Default::default()
        },
    };
    repo.upsert_user(&user).await?;
    tracing::info!("Created user '{}'", username);
    Ok(user)
}

/// Check credentials. Unknown users are created when `autoregister` is set.
pub async fn authenticate(
    repo: &Repository,
    username: &str,
    password: &str,
    autoregister: bool,
) -> Result<User, AuthError> {
    let user = match repo.get_user_by_name(username).await {
        Ok(user) => user,
        Err(DbError::NotFound) if autoregister && !username.is_empty() => {
            return create_user(repo, username, password, false).await;
        }
        Err(DbError::NotFound) => return Err(AuthError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };

    if !verify_password(password, &user.password_hash).await? {
        return Err(AuthError::InvalidCredentials);
    }
    if user.properties.disabled {
        return Err(AuthError::Disabled);
    }
    repo.touch_user_login(&user.id).await?;
    Ok(user)
}

/// Issue and persist a fresh access token for a device.
pub async fn issue_token(
    repo: &Repository,
    user: &User,
    client: &ClientInfo,
    remote_address: &str,
) -> Result<AccessToken, AuthError> {
    let now = Utc::now();
    let token = AccessToken {
        token: new_token(),
        user_id: user.id.clone(),
        device_id: client.device_id.clone(),
        device_name: client.device.clone(),
        application_name: client.client.clone(),
        application_version: client.version.clone(),
        remote_address: remote_address.to_string(),
        created: now,
        last_used: now,
    };
    repo.insert_access_token(&token).await?;
    Ok(token)
}

/// Create the default admin account when there are no users at all.
pub async fn ensure_default_user(repo: &Repository) -> Result<(), AuthError> {
    if repo.user_count().await? == 0 {
        create_user(repo, "admin", "admin", true).await?;
        tracing::warn!("No users found: created default user 'admin' with password 'admin'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::open_temp;

    #[test]
    fn test_new_token() {
        let t = new_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(t, new_token());
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (_dir, repo) = open_temp().await;
        create_user(&repo, "alice", "pw", false).await.unwrap();

        let user = authenticate(&repo, "alice", "pw", false).await.unwrap();
        assert_eq!(user.id, id_hash("alice"));
        assert!(matches!(
            authenticate(&repo, "alice", "wrong", false).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate(&repo, "bob", "pw", false).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_autoregister() {
        let (_dir, repo) = open_temp().await;
        let user = authenticate(&repo, "carol", "secret", true).await.unwrap();
        assert_eq!(user.username, "carol");
        assert!(authenticate(&repo, "carol", "secret", false).await.is_ok());
    }

    #[tokio::test]
    async fn test_default_user_once() {
        let (_dir, repo) = open_temp().await;
        ensure_default_user(&repo).await.unwrap();
        ensure_default_user(&repo).await.unwrap();
        let users = repo.get_all_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].properties.admin);
    }

    #[tokio::test]
    async fn test_issue_token() {
        let (_dir, repo) = open_temp().await;
        let user = create_user(&repo, "dave", "pw", false).await.unwrap();
        let client = ClientInfo {
            client: "Infuse".into(),
            device: "iPhone".into(),
            device_id: "dev1".into(),
            version: "8.0".into(),
            token: None,
        };
        let token = issue_token(&repo, &user, &client, "10.0.0.2").await.unwrap();
        let found = repo.get_access_token(&token.token).await.unwrap().unwrap();
        assert_eq!(found.device_name, "iPhone");
        assert_eq!(found.remote_address, "10.0.0.2");
    }
}
