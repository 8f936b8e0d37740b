use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{map_unique, DbError, DbResult, Repository};
use crate::models::AccessToken;

const SELECT_TOKEN: &str = "SELECT token, userid, deviceid, devicename, applicationname, \
     applicationversion, remoteaddress, created, lastused FROM accesstokens";

pub(super) async fn load_all(pool: &SqlitePool) -> DbResult<Vec<AccessToken>> {
    Ok(sqlx::query_as(SELECT_TOKEN).fetch_all(pool).await?)
}

impl Repository {
    /// Persist a freshly issued token and cache it.
    pub async fn insert_access_token(&self, token: &AccessToken) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accesstokens
                (token, userid, deviceid, devicename, applicationname, applicationversion,
                 remoteaddress, created, lastused)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.token)
        .bind(&token.user_id)
        .bind(&token.device_id)
        .bind(&token.device_name)
        .bind(&token.application_name)
        .bind(&token.application_version)
        .bind(&token.remote_address)
        .bind(token.created)
        .bind(token.last_used)
        .execute(&self.writer)
        .await
        .map_err(map_unique)?;

        self.cache
            .lock()
            .tokens
            .insert(token.token.clone(), token.clone());
        Ok(())
    }

    /// Resolve a token, refreshing its last-used time.
    ///
    /// Cache first; a database hit is promoted into the cache.
    pub async fn get_access_token(&self, token: &str) -> DbResult<Option<AccessToken>> {
        let now = Utc::now();
        if let Some(t) = self.cache.lock().tokens.get_mut(token) {
            t.last_used = now;
            return Ok(Some(t.clone()));
        }

        let row: Option<AccessToken> = sqlx::query_as(&format!("{SELECT_TOKEN} WHERE token = ?"))
            .bind(token)
            .fetch_optional(&self.reader)
            .await?;
        let Some(mut row) = row else {
            return Ok(None);
        };
        row.last_used = now;
        self.cache
            .lock()
            .tokens
            .insert(row.token.clone(), row.clone());
        Ok(Some(row))
    }

    /// Tokens of one user, most recently used first.
    pub async fn get_user_tokens(&self, user_id: &str) -> DbResult<Vec<AccessToken>> {
        let mut rows: Vec<AccessToken> =
            sqlx::query_as(&format!("{SELECT_TOKEN} WHERE userid = ?"))
                .bind(user_id)
                .fetch_all(&self.reader)
                .await?;
        {
            let cache = self.cache.lock();
            for row in rows.iter_mut() {
                if let Some(cached) = cache.tokens.get(&row.token) {
                    row.last_used = cached.last_used;
                }
            }
        }
        rows.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        Ok(rows)
    }

    pub async fn delete_access_token(&self, token: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM accesstokens WHERE token = ?")
            .bind(token)
            .execute(&self.writer)
            .await?;
        self.cache.lock().tokens.remove(token);
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Revoke every token a user holds for one device. Returns how many.
    pub async fn delete_device_tokens(&self, user_id: &str, device_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM accesstokens WHERE userid = ? AND deviceid = ?")
            .bind(user_id)
            .bind(device_id)
            .execute(&self.writer)
            .await?;
        self.cache
            .lock()
            .tokens
            .retain(|_, t| !(t.user_id == user_id && t.device_id == device_id));
        Ok(result.rows_affected())
    }

    pub(super) fn purge_user_tokens(&self, user_id: &str) {
        self.cache.lock().tokens.retain(|_, t| t.user_id != user_id);
    }

    /// Write back `lastused` of tokens used since `since`.
    pub(super) async fn flush_tokens(&self, since: DateTime<Utc>) -> DbResult<(usize, DateTime<Utc>)> {
        let dirty: Vec<(String, DateTime<Utc>)> = {
            let cache = self.cache.lock();
            cache
                .tokens
                .values()
                .filter(|t| t.last_used > since)
                .map(|t| (t.token.clone(), t.last_used))
                .collect()
        };
        if dirty.is_empty() {
            return Ok((0, since));
        }

        let mut tx = self.writer.begin().await?;
        for (token, last_used) in &dirty {
            sqlx::query("UPDATE accesstokens SET lastused = ? WHERE token = ?")
                .bind(last_used)
                .bind(token)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let newest = dirty.iter().map(|(_, t)| *t).max().unwrap_or(since);
        Ok((dirty.len(), newest))
    }
}
