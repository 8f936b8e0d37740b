use super::{DbResult, Repository};
use crate::models::SearchDocument;

/// bm25 column weights: itemid, parentid, name, overview, people, genres.
const BM25_WEIGHTS: &str = "0.0, 0.0, 10.0, 1.0, 2.0, 2.0";

impl Repository {
    /// Replace every indexed document. Readers see the old set until commit.
    pub async fn replace_search_documents(&self, docs: &[SearchDocument]) -> DbResult<()> {
        let mut tx = self.writer.begin().await?;
        sqlx::query("DELETE FROM search_fts")
            .execute(&mut *tx)
            .await?;
        for doc in docs {
            sqlx::query(
                "INSERT INTO search_fts (itemid, parentid, name, overview, people, genres) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&doc.parent_id)
            .bind(&doc.name)
            .bind(&doc.overview)
            .bind(doc.people.join(", "))
            .bind(doc.genres.join(", "))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Item ids matching an FTS5 MATCH expression, best bm25 rank first.
    pub async fn search_documents(&self, fts_query: &str, limit: usize) -> DbResult<Vec<String>> {
        let sql = format!(
            "SELECT itemid FROM search_fts WHERE search_fts MATCH ? \
             ORDER BY bm25(search_fts, {}) LIMIT ?",
            BM25_WEIGHTS
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(fts_query)
            .bind(limit as i64)
            .fetch_all(&self.reader)
            .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
