use chrono::{DateTime, Utc};

use super::{map_unique, DbError, DbResult, Repository};
use crate::models::{User, UserProperties};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    password: String,
    created: DateTime<Utc>,
    lastlogin: Option<DateTime<Utc>>,
    lastused: Option<DateTime<Utc>>,
}

const SELECT_USER: &str = "SELECT id, username, password, created, lastlogin, lastused FROM users";

impl Repository {
    async fn hydrate(&self, row: UserRow) -> DbResult<User> {
        let pairs: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM user_properties WHERE userid = ?")
                .bind(&row.id)
                .fetch_all(&self.reader)
                .await?;
        let mut properties = UserProperties::default();
        for (key, value) in &pairs {
            properties.set(key, value);
        }
        Ok(User {
            id: row.id,
            username: row.username,
            password_hash: row.password,
            created: row.created,
            last_login: row.lastlogin,
            last_used: row.lastused,
            properties,
        })
    }

    pub async fn get_user_by_name(&self, username: &str) -> DbResult<User> {
        let row: UserRow = sqlx::query_as(&format!("{SELECT_USER} WHERE username = ?"))
            .bind(username)
            .fetch_optional(&self.reader)
            .await?
            .ok_or(DbError::NotFound)?;
        self.hydrate(row).await
    }

    pub async fn get_user_by_id(&self, id: &str) -> DbResult<User> {
        let row: UserRow = sqlx::query_as(&format!("{SELECT_USER} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.reader)
            .await?
            .ok_or(DbError::NotFound)?;
        self.hydrate(row).await
    }

    pub async fn get_all_users(&self) -> DbResult<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!("{SELECT_USER} ORDER BY username"))
            .fetch_all(&self.reader)
            .await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(self.hydrate(row).await?);
        }
        Ok(users)
    }

    pub async fn user_count(&self) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.reader)
            .await?;
        Ok(count)
    }

    /// Insert or replace a user and its properties in one transaction.
    ///
    /// The row is updated in place so tokens and playlists that reference the
    /// user survive. A username taken by another id is `AlreadyExists`.
    pub async fn upsert_user(&self, user: &User) -> DbResult<()> {
        let mut tx = self.writer.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password, created, lastlogin, lastused)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                password = excluded.password,
                created = excluded.created,
                lastlogin = excluded.lastlogin,
                lastused = excluded.lastused
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.created)
        .bind(user.last_login)
        .bind(user.last_used)
        .execute(&mut *tx)
        .await
        .map_err(map_unique)?;

        for (key, value) in user.properties.to_pairs() {
            sqlx::query(
                r#"
                INSERT INTO user_properties (userid, key, value) VALUES (?, ?, ?)
                ON CONFLICT(userid, key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(&user.id)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete a user; properties, tokens and playlists cascade.
    pub async fn delete_user(&self, id: &str) -> DbResult<()> {
        let mut tx = self.writer.begin().await?;
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        sqlx::query("DELETE FROM playstate WHERE userid = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.purge_user_tokens(id);
        self.purge_user_data(id);
        Ok(())
    }

    pub async fn touch_user_login(&self, id: &str) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query("UPDATE users SET lastlogin = ?, lastused = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.writer)
            .await?;
        Ok(())
    }
}
