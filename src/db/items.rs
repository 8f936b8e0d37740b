use chrono::Utc;

use super::{DbResult, Repository};

impl Repository {
    /// Register a catalog item by its natural key and return its stable id.
    ///
    /// The first registration stores `id`; later ones return the stored id.
    pub async fn upsert_item(&self, id: &str, name: &str) -> DbResult<String> {
        let (stored,): (String,) = sqlx::query_as(
            r#"
            INSERT INTO items (id, name, created) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET name = excluded.name
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.writer)
        .await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::tests::open_temp;

    #[tokio::test]
    async fn test_first_id_is_kept() {
        let (_dir, repo) = open_temp().await;
        assert_eq!(repo.upsert_item("id1", "Heat (1995)").await.unwrap(), "id1");
        assert_eq!(repo.upsert_item("id2", "Heat (1995)").await.unwrap(), "id1");
        assert_eq!(repo.upsert_item("id3", "Ronin (1998)").await.unwrap(), "id3");
    }
}
