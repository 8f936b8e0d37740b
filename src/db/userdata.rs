use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{DbResult, Repository};
use crate::models::UserData;

const RECENTLY_WATCHED_LIMIT: usize = 10;

#[derive(sqlx::FromRow)]
struct PlaystateRow {
    userid: String,
    itemid: String,
    position: i64,
    playedpercentage: i32,
    played: bool,
    favorite: bool,
    timestamp: DateTime<Utc>,
}

pub(super) async fn load_all(pool: &SqlitePool) -> DbResult<Vec<(String, String, UserData)>> {
    let rows: Vec<PlaystateRow> = sqlx::query_as(
        "SELECT userid, itemid, position, playedpercentage, played, favorite, timestamp FROM playstate",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| {
            let data = UserData {
                position: r.position,
                played_percentage: r.playedpercentage,
                played: r.played,
                favorite: r.favorite,
                timestamp: r.timestamp,
            };
            (r.userid, r.itemid, data)
        })
        .collect())
}

impl Repository {
    /// Cached state for one item, if the user ever touched it.
    pub fn get_user_data(&self, user_id: &str, item_id: &str) -> Option<UserData> {
        self.cache
            .lock()
            .userdata
            .get(&(user_id.to_string(), item_id.to_string()))
            .cloned()
    }

    /// Store new state for an item. The timestamp is set to now.
    pub fn update_user_data(&self, user_id: &str, item_id: &str, mut data: UserData) {
        data.timestamp = Utc::now();
        self.cache
            .lock()
            .userdata
            .insert((user_id.to_string(), item_id.to_string()), data);
    }

    /// Read, modify and store in one step under the cache lock.
    pub fn modify_user_data<F>(&self, user_id: &str, item_id: &str, f: F) -> UserData
    where
        F: FnOnce(&mut UserData),
    {
        let mut cache = self.cache.lock();
        let entry = cache
            .userdata
            .entry((user_id.to_string(), item_id.to_string()))
            .or_default();
        f(entry);
        entry.timestamp = Utc::now();
        entry.clone()
    }

    /// All cached entries of a user, keyed by item id.
    pub fn all_user_data(&self, user_id: &str) -> Vec<(String, UserData)> {
        self.cache
            .lock()
            .userdata
            .iter()
            .filter(|((u, _), _)| u == user_id)
            .map(|((_, item), data)| (item.clone(), data.clone()))
            .collect()
    }

    pub fn favorites(&self, user_id: &str) -> Vec<String> {
        self.all_user_data(user_id)
            .into_iter()
            .filter(|(_, d)| d.favorite)
            .map(|(item, _)| item)
            .collect()
    }

    /// Up to ten item ids, most recent first, that are in progress or (with
    /// `include_watched`) fully watched.
    pub fn recently_watched(&self, user_id: &str, include_watched: bool) -> Vec<String> {
        let mut entries: Vec<(String, UserData)> = self
            .all_user_data(user_id)
            .into_iter()
            .filter(|(_, d)| (include_watched && d.played) || d.in_progress())
            .collect();
        entries.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp).then_with(|| a.0.cmp(&b.0)));
        entries
            .into_iter()
            .take(RECENTLY_WATCHED_LIMIT)
            .map(|(item, _)| item)
            .collect()
    }

    /// Write every entry newer than `since` in one transaction.
    pub(super) async fn flush_userdata(&self, since: DateTime<Utc>) -> DbResult<(usize, DateTime<Utc>)> {
        let dirty: Vec<((String, String), UserData)> = {
            let cache = self.cache.lock();
            cache
                .userdata
                .iter()
                .filter(|(_, d)| d.timestamp > since)
                .map(|(k, d)| (k.clone(), d.clone()))
                .collect()
        };
        if dirty.is_empty() {
            return Ok((0, since));
        }

        let mut tx = self.writer.begin().await?;
        for ((user_id, item_id), data) in &dirty {
            sqlx::query(
                r#"
                INSERT INTO playstate (userid, itemid, position, playedpercentage, played, favorite, timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(userid, itemid) DO UPDATE SET
                    position = excluded.position,
                    playedpercentage = excluded.playedpercentage,
                    played = excluded.played,
                    favorite = excluded.favorite,
                    timestamp = excluded.timestamp
                "#,
            )
            .bind(user_id)
            .bind(item_id)
            .bind(data.position)
            .bind(data.played_percentage)
            .bind(data.played)
            .bind(data.favorite)
            .bind(data.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let newest = dirty
            .iter()
            .map(|(_, d)| d.timestamp)
            .max()
            .unwrap_or(since);
        Ok((dirty.len(), newest))
    }

    /// Forget cached state of a deleted user.
    pub(super) fn purge_user_data(&self, user_id: &str) {
        self.cache.lock().userdata.retain(|(u, _), _| u != user_id);
    }
}
