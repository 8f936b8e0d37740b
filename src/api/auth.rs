// Request authentication.
//
// Clients send their identity in `X-Emby-Authorization` (or `Authorization`):
//   MediaBrowser Client="Infuse", Device="iPhone", DeviceId="...", Version="8.0", Token="..."
// Some also send the token alone in `X-Emby-Token` or as `api_key` in the query.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Query},
    http::{request::Parts, HeaderMap},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use super::error::ApiError;
use crate::models::{AccessToken, User};
use crate::services::auth::ClientInfo;
use crate::AppState;

/// Parse the parameter list of a MediaBrowser authorization header.
/// Values may be quoted and url-encoded; unknown keys are ignored.
pub fn parse_auth_header(value: &str) -> ClientInfo {
    let value = value.trim();
    let params = match value.split_once(' ') {
        Some((scheme, rest))
            if scheme.eq_ignore_ascii_case("MediaBrowser") || scheme.eq_ignore_ascii_case("Emby") =>
        {
            rest
        }
        _ => value,
    };

    let mut info = ClientInfo::default();
    for part in params.split(',') {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        let val = val.trim().trim_matches('"');
        let val = urlencoding::decode(val)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| val.to_string());
        match key.trim().to_ascii_lowercase().as_str() {
            "client" => info.client = val,
            "device" => info.device = val,
            "deviceid" => info.device_id = val,
            "version" => info.version = val,
            "token" if !val.is_empty() => info.token = Some(val),
            _ => {}
        }
    }
    info
}

/// Client info from whichever header carries it.
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let mut info = ["X-Emby-Authorization", "Authorization"]
        .iter()
        .filter_map(|h| headers.get(*h))
        .filter_map(|v| v.to_str().ok())
        .map(parse_auth_header)
        .next()
        .unwrap_or_default();

    if info.token.is_none() {
        info.token = ["X-Emby-Token", "X-MediaBrowser-Token"]
            .iter()
            .filter_map(|h| headers.get(*h))
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .find(|t| !t.is_empty());
    }
    info
}

/// Address of the peer, when the server was started with connect info.
pub fn remote_addr(conn: Option<ConnectInfo<SocketAddr>>) -> String {
    conn.map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: AccessToken,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let mut token = client_info(&parts.headers).token;
        if token.is_none() {
            if let Ok(Query(q)) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
                token = q.get("api_key").or_else(|| q.get("ApiKey")).cloned();
            }
        }
        let token = token.ok_or_else(|| ApiError::Unauthorized("missing token".to_string()))?;

        let access = state
            .repo
            .get_access_token(&token)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;

        let user = match state.repo.get_user_by_id(&access.user_id).await {
            Ok(user) => user,
            Err(crate::db::DbError::NotFound) => {
                return Err(ApiError::Unauthorized("unknown user".to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if user.properties.disabled {
            return Err(ApiError::Unauthorized("user is disabled".to_string()));
        }

        Ok(AuthUser {
            user,
            token: access,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_auth_header() {
        let info = parse_auth_header(
            r#"MediaBrowser Client="Infuse", Device="Living%20Room", DeviceId="abc", Version="8.0", Token="t0k""#,
        );
        assert_eq!(info.client, "Infuse");
        assert_eq!(info.device, "Living Room");
        assert_eq!(info.device_id, "abc");
        assert_eq!(info.version, "8.0");
        assert_eq!(info.token.as_deref(), Some("t0k"));
    }

    #[test]
    fn test_parse_auth_header_tolerant() {
        let info = parse_auth_header("emby token=xyz,deviceid=d1, garbage ,Client=VidHub");
        assert_eq!(info.token.as_deref(), Some("xyz"));
        assert_eq!(info.device_id, "d1");
        assert_eq!(info.client, "VidHub");

        let empty = parse_auth_header(r#"MediaBrowser Token="""#);
        assert_eq!(empty.token, None);
    }

    #[test]
    fn test_client_info_token_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Emby-Token", HeaderValue::from_static("abc"));
        assert_eq!(client_info(&headers).token.as_deref(), Some("abc"));
    }
}
