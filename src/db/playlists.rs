use chrono::{DateTime, Utc};

use super::{DbError, DbResult, Repository};
use crate::models::Playlist;
use crate::services::idhash::random_id;

impl Repository {
    /// Create a playlist with a fresh random id. Returns the id.
    pub async fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
        item_ids: &[String],
    ) -> DbResult<String> {
        let id = random_id();
        let mut tx = self.writer.begin().await?;
        sqlx::query("INSERT INTO playlist (id, userid, name, created) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(user_id)
            .bind(name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        for (order, item_id) in item_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO playlist_item (playlistid, itemid, itemorder) VALUES (?, ?, ?) \
                 ON CONFLICT(playlistid, itemid) DO NOTHING",
            )
            .bind(&id)
            .bind(item_id)
            .bind(order as i64 + 1)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        tracing::debug!("Created playlist '{}' ({}) with {} items", name, id, item_ids.len());
        Ok(id)
    }

    pub async fn get_playlist(&self, id: &str) -> DbResult<Playlist> {
        let row: Option<(String, String, String, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, userid, name, created FROM playlist WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.reader)
                .await?;
        let (id, user_id, name, created) = row.ok_or(DbError::NotFound)?;
        let item_ids = self.playlist_item_ids(&id).await?;
        Ok(Playlist {
            id,
            user_id,
            name,
            created,
            item_ids,
        })
    }

    pub async fn get_user_playlists(&self, user_id: &str) -> DbResult<Vec<Playlist>> {
        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM playlist WHERE userid = ? ORDER BY created, id")
                .bind(user_id)
                .fetch_all(&self.reader)
                .await?;
        let mut out = Vec::with_capacity(ids.len());
        for (id,) in ids {
            out.push(self.get_playlist(&id).await?);
        }
        Ok(out)
    }

    async fn playlist_item_ids(&self, playlist_id: &str) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT itemid FROM playlist_item WHERE playlistid = ? ORDER BY itemorder",
        )
        .bind(playlist_id)
        .fetch_all(&self.reader)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Append items. An item already in the list keeps its position.
    pub async fn add_playlist_items(&self, playlist_id: &str, item_ids: &[String]) -> DbResult<()> {
        let mut tx = self.writer.begin().await?;
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM playlist WHERE id = ?")
            .bind(playlist_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DbError::NotFound);
        }
        for item_id in item_ids {
            sqlx::query(
                r#"
                INSERT INTO playlist_item (playlistid, itemid, itemorder)
                SELECT ?, ?, COALESCE(MAX(itemorder), 0) + 1
                FROM playlist_item WHERE playlistid = ?
                ON CONFLICT(playlistid, itemid) DO NOTHING
                "#,
            )
            .bind(playlist_id)
            .bind(item_id)
            .bind(playlist_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_playlist_items(&self, playlist_id: &str, item_ids: &[String]) -> DbResult<()> {
        let mut tx = self.writer.begin().await?;
        for item_id in item_ids {
            sqlx::query("DELETE FROM playlist_item WHERE playlistid = ? AND itemid = ?")
                .bind(playlist_id)
                .bind(item_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Move an item to a zero-based position, renumbering the whole list.
    pub async fn move_playlist_item(
        &self,
        playlist_id: &str,
        item_id: &str,
        new_index: usize,
    ) -> DbResult<()> {
        let mut ids = self.playlist_item_ids(playlist_id).await?;
        let current = ids
            .iter()
            .position(|id| id == item_id)
            .ok_or(DbError::NotFound)?;
        let moved = ids.remove(current);
        ids.insert(new_index.min(ids.len()), moved);

        let mut tx = self.writer.begin().await?;
        for (order, id) in ids.iter().enumerate() {
            sqlx::query("UPDATE playlist_item SET itemorder = ? WHERE playlistid = ? AND itemid = ?")
                .bind(order as i64 + 1)
                .bind(playlist_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_playlist(&self, playlist_id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM playlist WHERE id = ?")
            .bind(playlist_id)
            .execute(&self.writer)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::tests::{open_temp, user};
    use crate::db::DbError;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_and_append_order() {
        let (_dir, repo) = open_temp().await;
        let alice = user("alice");
        repo.upsert_user(&alice).await.unwrap();

        let id = repo.create_playlist(&alice.id, "mix", &ids(&["a", "b"])).await.unwrap();
        repo.add_playlist_items(&id, &ids(&["c", "a", "d"])).await.unwrap();

        let pl = repo.get_playlist(&id).await.unwrap();
        assert_eq!(pl.name, "mix");
        assert_eq!(pl.item_ids, ids(&["a", "b", "c", "d"]));
    }

    #[tokio::test]
    async fn test_same_name_distinct() {
        let (_dir, repo) = open_temp().await;
        let alice = user("alice");
        repo.upsert_user(&alice).await.unwrap();
        let a = repo.create_playlist(&alice.id, "mix", &[]).await.unwrap();
        let b = repo.create_playlist(&alice.id, "mix", &[]).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(repo.get_user_playlists(&alice.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_move_and_remove() {
        let (_dir, repo) = open_temp().await;
        let alice = user("alice");
        repo.upsert_user(&alice).await.unwrap();
        let id = repo
            .create_playlist(&alice.id, "mix", &ids(&["a", "b", "c"]))
            .await
            .unwrap();

        repo.move_playlist_item(&id, "c", 0).await.unwrap();
        assert_eq!(repo.get_playlist(&id).await.unwrap().item_ids, ids(&["c", "a", "b"]));

        repo.remove_playlist_items(&id, &ids(&["a"])).await.unwrap();
        repo.add_playlist_items(&id, &ids(&["e"])).await.unwrap();
        assert_eq!(repo.get_playlist(&id).await.unwrap().item_ids, ids(&["c", "b", "e"]));

        assert!(matches!(
            repo.move_playlist_item(&id, "zz", 0).await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, repo) = open_temp().await;
        let alice = user("alice");
        repo.upsert_user(&alice).await.unwrap();
        let id = repo.create_playlist(&alice.id, "mix", &ids(&["a"])).await.unwrap();
        repo.delete_playlist(&id).await.unwrap();
        assert!(matches!(repo.get_playlist(&id).await, Err(DbError::NotFound)));
        assert!(matches!(
            repo.add_playlist_items(&id, &ids(&["a"])).await,
            Err(DbError::NotFound)
        ));
    }
}
