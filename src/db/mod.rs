//! Persistent state: users, access tokens, per-user item state, playlists.
//!
//! Two pools are opened on the same SQLite file. Reads go through a pool sized
//! to the CPU count, every write goes through a pool with a single connection.
//! User data and access token `lastused` timestamps are kept in an in-memory
//! cache and written behind by the flusher tasks.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::{AccessToken, UserData};

pub mod accesstokens;
pub mod items;
pub mod playlists;
pub mod search;
pub mod userdata;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Map unique constraint violations to `AlreadyExists`.
pub(crate) fn map_unique(e: sqlx::Error) -> DbError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => DbError::AlreadyExists,
        _ => DbError::Sqlx(e),
    }
}

#[derive(Default)]
pub(crate) struct Caches {
    pub tokens: HashMap<String, AccessToken>,
    pub userdata: HashMap<(String, String), UserData>,
}

#[derive(Clone)]
pub struct Repository {
    reader: SqlitePool,
    writer: SqlitePool,
    cache: Arc<Mutex<Caches>>,
}

impl Repository {
    /// Open (creating if needed) the database file, migrate, and prime caches.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // The writer is created first so the file and WAL exist for readers.
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options.clone())
            .await?;
        migrate(&writer).await?;

        let cpus = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4) as u32;
        let reader = SqlitePoolOptions::new()
            .max_connections(cpus)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    use sqlx::Executor;
                    // Cache size: -32000 = 32MB (negative = KB)
                    conn.execute("PRAGMA cache_size = -32000").await?;
                    conn.execute("PRAGMA temp_store = MEMORY").await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        tracing::info!(
            "SQLite opened at {}: WAL mode, {} readers, 1 writer",
            path.display(),
            cpus
        );

        let repo = Self {
            reader,
            writer,
            cache: Arc::new(Mutex::new(Caches::default())),
        };
        repo.prime().await?;
        Ok(repo)
    }

    /// Load both write-behind caches from their tables.
    async fn prime(&self) -> DbResult<()> {
        let tokens = accesstokens::load_all(&self.reader).await?;
        let userdata = userdata::load_all(&self.reader).await?;
        let mut cache = self.cache.lock();
        tracing::debug!(
            "Primed caches: {} access tokens, {} user data entries",
            tokens.len(),
            userdata.len()
        );
        cache.tokens = tokens.into_iter().map(|t| (t.token.clone(), t)).collect();
        cache.userdata = userdata
            .into_iter()
            .map(|(user, item, data)| ((user, item), data))
            .collect();
        Ok(())
    }

    /// Wait for pending writes to finish and close both pools.
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }
}

/// Which cache a flusher writes behind.
#[derive(Debug, Clone, Copy)]
pub enum FlushTarget {
    UserData,
    AccessTokens,
}

impl FlushTarget {
    fn name(&self) -> &'static str {
        match self {
            FlushTarget::UserData => "user data",
            FlushTarget::AccessTokens => "access tokens",
        }
    }
}

impl Repository {
    /// Flush one cache every `interval` until cancelled, then drain once more.
    ///
    /// Each run writes entries whose timestamp is newer than the last
    /// successful sync. A failed transaction leaves the sync point alone so the
    /// same entries are retried next time.
    pub async fn run_flusher(self, target: FlushTarget, interval: Duration, cancel: CancellationToken) {
        let mut last_sync = DateTime::<Utc>::default();
        tracing::info!(
            "{} flusher started (interval: {}s)",
            target.name(),
            interval.as_secs()
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("{} flusher received shutdown signal", target.name());
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    last_sync = self.flush(target, last_sync).await;
                }
            }
        }
        self.flush(target, last_sync).await;
    }

    /// One flush pass. Returns the new sync point.
    pub async fn flush(&self, target: FlushTarget, since: DateTime<Utc>) -> DateTime<Utc> {
        let result = match target {
            FlushTarget::UserData => self.flush_userdata(since).await,
            FlushTarget::AccessTokens => self.flush_tokens(since).await,
        };
        match result {
            Ok((0, _)) => since,
            Ok((count, newest)) => {
                tracing::debug!("Flushed {} {} entries", count, target.name());
                newest
            }
            Err(e) => {
                tracing::error!("Failed to flush {}: {}", target.name(), e);
                since
            }
        }
    }
}

pub async fn migrate(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            created TEXT NOT NULL,
            lastlogin TEXT,
            lastused TEXT
        );

        CREATE TABLE IF NOT EXISTS user_properties (
            userid TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (userid, key)
        );

        CREATE TABLE IF NOT EXISTS accesstokens (
            token TEXT NOT NULL,
            userid TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            deviceid TEXT NOT NULL DEFAULT '',
            devicename TEXT NOT NULL DEFAULT '',
            applicationname TEXT NOT NULL DEFAULT '',
            applicationversion TEXT NOT NULL DEFAULT '',
            remoteaddress TEXT NOT NULL DEFAULT '',
            created TEXT NOT NULL,
            lastused TEXT NOT NULL,
            PRIMARY KEY (userid, token)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS accesstokens_token ON accesstokens(token);

        CREATE TABLE IF NOT EXISTS quickconnect (
            code TEXT PRIMARY KEY,
            secret TEXT NOT NULL,
            userid TEXT,
            deviceid TEXT NOT NULL DEFAULT '',
            authorized INTEGER NOT NULL DEFAULT 0,
            created TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS playstate (
            userid TEXT NOT NULL,
            itemid TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            playedpercentage INTEGER NOT NULL DEFAULT 0,
            played INTEGER NOT NULL DEFAULT 0,
            favorite INTEGER NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL,
            PRIMARY KEY (userid, itemid)
        );

        CREATE TABLE IF NOT EXISTS playlist (
            id TEXT PRIMARY KEY,
            userid TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            created TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS playlist_userid ON playlist(userid);

        CREATE TABLE IF NOT EXISTS playlist_item (
            playlistid TEXT NOT NULL REFERENCES playlist(id) ON DELETE CASCADE,
            itemid TEXT NOT NULL,
            itemorder INTEGER NOT NULL,
            PRIMARY KEY (playlistid, itemid)
        );

        CREATE TABLE IF NOT EXISTS images (
            itemid TEXT NOT NULL,
            type TEXT NOT NULL,
            etag TEXT NOT NULL DEFAULT '',
            mimetype TEXT NOT NULL DEFAULT '',
            filesize INTEGER NOT NULL DEFAULT 0,
            updated TEXT NOT NULL,
            data BLOB,
            PRIMARY KEY (itemid, type)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS search_fts USING fts5(
            itemid UNINDEXED,
            parentid UNINDEXED,
            name,
            overview,
            people,
            genres,
            tokenize = 'porter unicode61 remove_diacritics 2'
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::User;

    pub(crate) async fn open_temp() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(&dir.path().join("test.db")).await.unwrap();
        (dir, repo)
    }

    pub(crate) fn user(name: &str) -> User {
        User {
            id: crate::services::idhash::id_hash(name),
            username: name.to_string(),
            password_hash: "x".to_string(),
            created: Utc::now(),
            last_login: None,
            last_used: None,
            properties: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_migrate_is_repeatable() {
        let (_dir, repo) = open_temp().await;
        migrate(&repo.writer).await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&repo.reader)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for table in [
            "accesstokens",
            "images",
            "items",
            "playlist",
            "playlist_item",
            "playstate",
            "quickconnect",
            "search_fts",
            "user_properties",
            "users",
        ] {
            assert!(names.contains(&table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_flush_and_prime_userdata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let repo = Repository::open(&path).await.unwrap();
            repo.update_user_data(
                "u1",
                "item1",
                UserData {
                    position: 42,
                    played_percentage: 10,
                    ..Default::default()
                },
            );
            let since = DateTime::<Utc>::default();
            let next = repo.flush(FlushTarget::UserData, since).await;
            assert!(next > since);
            // Nothing newer than the sync point: no change.
            assert_eq!(repo.flush(FlushTarget::UserData, next).await, next);
            repo.close().await;
        }
        let repo = Repository::open(&path).await.unwrap();
        let data = repo.get_user_data("u1", "item1").unwrap();
        assert_eq!(data.position, 42);
        assert_eq!(data.played_percentage, 10);
    }

    #[tokio::test]
    async fn test_flusher_drains_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let repo = Repository::open(&path).await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(repo.clone().run_flusher(
            FlushTarget::UserData,
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        repo.update_user_data("u", "i", UserData { favorite: true, ..Default::default() });
        cancel.cancel();
        task.await.unwrap();

        let rows: Vec<(String, bool)> = sqlx::query_as("SELECT itemid, favorite FROM playstate")
            .fetch_all(&repo.reader)
            .await
            .unwrap();
        assert_eq!(rows, vec![("i".to_string(), true)]);
    }
}
