use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::collection::{Catalog, Collection, CollectionType, Item};
use crate::db::Repository;
use crate::services::search::SearchIndex;

pub mod movies;
pub mod shows;

/// Video files the scanner picks up.
static RE_VIDEO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\.(divx|mov|mp4|MP4|m4u|m4v)$").unwrap());
/// Release year at the end of a directory name: `Title (1999)`.
static RE_DIR_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d{4})\)$").unwrap());

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tbn"];

/// Stem of a video file name, if it is one.
pub fn video_stem(name: &str) -> Option<&str> {
    RE_VIDEO
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn dir_year(name: &str) -> Option<i32> {
    RE_DIR_YEAR
        .captures(name.trim_end())
        .and_then(|c| c[1].parse().ok())
}

/// Hidden entries and entries starting with "+ " are never scanned.
fn should_skip(name: &str) -> bool {
    name.starts_with('.') || name.starts_with("+ ")
}

/// Split `name.ext` into lowercase extension and stem.
pub(crate) fn split_ext(name: &str) -> Option<(&str, String)> {
    name.rsplit_once('.')
        .map(|(stem, ext)| (stem, ext.to_ascii_lowercase()))
}

#[derive(Debug, Clone)]
pub(crate) struct DirFile {
    pub name: String,
    pub size: u64,
    pub ctime: Option<DateTime<Utc>>,
}

/// Non-hidden entries of one directory, sorted by name.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    pub files: Vec<DirFile>,
    pub dirs: Vec<String>,
}

impl Listing {
    pub fn find(&self, name: &str) -> Option<&DirFile> {
        self.files.iter().find(|f| f.name == name)
    }
}

#[cfg(unix)]
fn change_time(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;
    DateTime::from_timestamp(meta.ctime(), meta.ctime_nsec() as u32)
}

#[cfg(not(unix))]
fn change_time(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

pub(crate) async fn read_listing(path: &Path) -> Result<Listing> {
    let mut entries = fs::read_dir(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut listing = Listing::default();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            tracing::debug!("Skipping non UTF-8 name in {}", path.display());
            continue;
        };
        if should_skip(&name) {
            continue;
        }
        // Follows symlinks.
        let meta = match fs::metadata(entry.path()).await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if meta.is_dir() {
            listing.dirs.push(name);
        } else if meta.is_file() {
            listing.files.push(DirFile {
                name,
                size: meta.len(),
                ctime: change_time(&meta),
            });
        }
    }
    listing.files.sort_by(|a, b| a.name.cmp(&b.name));
    listing.dirs.sort();
    Ok(listing)
}

/// Year from a directory name, else from a timestamp, else the current year.
pub(crate) fn resolve_year(dir_name: &str, ts: Option<DateTime<Utc>>) -> i32 {
    dir_year(dir_name)
        .or_else(|| ts.map(|t| t.year()))
        .unwrap_or_else(|| Utc::now().year())
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub items: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Scan one collection and publish the result.
///
/// Each accepted item is registered in the `items` table by name and takes its
/// id from there. `item_delay` is slept between items. A cancelled scan
/// publishes nothing.
pub async fn scan_collection(
    collection: &Collection,
    repo: &Repository,
    item_delay: Duration,
    cancel: &CancellationToken,
) -> Result<ScanResult> {
    let listing = read_listing(&collection.directory).await?;
    let mut result = ScanResult::default();
    let mut items: Vec<Item> = Vec::with_capacity(listing.dirs.len());

    for dir_name in &listing.dirs {
        let dir = collection.directory.join(dir_name);
        let scanned = match collection.kind {
            CollectionType::Movies => movies::scan_movie_dir(&dir, dir_name).await,
            CollectionType::Shows => shows::scan_show_dir(&dir, dir_name).await,
        };
        match scanned {
            Ok(Some(mut item)) => {
                match repo.upsert_item(&item.id, &item.name).await {
                    Ok(id) => item.id = id,
                    Err(e) => tracing::warn!("Failed to register item '{}': {}", item.name, e),
                }
                item.load_metadata().await;
                items.push(item);
                result.items += 1;
            }
            Ok(None) => {
                tracing::debug!("Skipping '{}': nothing playable", dir_name);
                result.skipped += 1;
            }
            Err(e) => {
                tracing::warn!("Skipping '{}': {:#}", dir_name, e);
                result.skipped += 1;
            }
        }

        if !item_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    result.cancelled = true;
                    return Ok(result);
                }
                _ = tokio::time::sleep(item_delay) => {}
            }
        } else if cancel.is_cancelled() {
            result.cancelled = true;
            return Ok(result);
        }
    }

    collection.publish(items);
    Ok(result)
}

/// Keeps the catalog in sync with the filesystem.
pub struct Rescanner {
    pub catalog: Arc<Catalog>,
    pub repo: Repository,
    pub search: Arc<SearchIndex>,
    pub item_delay: Duration,
    pub interval: Duration,
}

impl Rescanner {
    /// One pass over every collection, then a search index rebuild.
    pub async fn scan_all(&self, item_delay: Duration, cancel: &CancellationToken) {
        for collection in self.catalog.collections() {
            match scan_collection(collection, &self.repo, item_delay, cancel).await {
                Ok(r) if r.cancelled => return,
                Ok(r) => tracing::info!(
                    "Collection '{}': {} items, {} skipped",
                    collection.name,
                    r.items,
                    r.skipped
                ),
                Err(e) => tracing::error!("Failed to scan collection '{}': {:#}", collection.name, e),
            }
        }
        if let Err(e) = self.search.rebuild(&self.catalog).await {
            tracing::error!("Failed to rebuild search index: {}", e);
        }
    }

    /// Rescan forever with pacing until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            "Rescanner started (interval: {}s, item delay: {}ms)",
            self.interval.as_secs(),
            self.item_delay.as_millis()
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Rescanner received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.scan_all(self.item_delay, &cancel).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collection::Entity;
    use crate::config::CollectionConfig;
    use crate::db::tests::open_temp;
    use std::path::PathBuf;

    pub(crate) fn touch(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub(crate) fn collection(kind: CollectionType, dir: PathBuf) -> Collection {
        Collection::new(&CollectionConfig {
            id: Some("c".to_string()),
            name: "Test".to_string(),
            kind,
            directory: dir,
            baseurl: None,
            hlsserver: None,
        })
    }

    #[test]
    fn test_video_stem() {
        assert_eq!(video_stem("casablanca.mp4"), Some("casablanca"));
        assert_eq!(video_stem("Clip.MP4"), Some("Clip"));
        assert_eq!(video_stem("a.b.m4v"), Some("a.b"));
        assert_eq!(video_stem("movie.mkv"), None);
        assert_eq!(video_stem("movie.Mp4"), None);
    }

    #[test]
    fn test_dir_year() {
        assert_eq!(dir_year("Casablanca (1942)"), Some(1942));
        assert_eq!(dir_year("2001 A Space Odyssey (1968)"), Some(1968));
        assert_eq!(dir_year("Heat"), None);
        assert_eq!(dir_year("Heat (1995) extended"), None);
        assert_eq!(resolve_year("Heat", None), Utc::now().year());
    }

    #[test]
    fn test_should_skip() {
        assert!(should_skip(".hidden"));
        assert!(should_skip("+ incoming"));
        assert!(!should_skip("+x"));
        assert!(!should_skip("Movie"));
    }

    #[tokio::test]
    async fn test_scan_movies_collection() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Casablanca (1942)");
        touch(&dir.join("casablanca.mp4"), "video");
        touch(
            &dir.join("casablanca.nfo"),
            "<movie><year>1942</year><genre>Drama</genre></movie>",
        );
        touch(&root.path().join(".hidden/x.mp4"), "video");
        touch(&root.path().join("Empty/readme.txt"), "nothing");

        let (_db, repo) = open_temp().await;
        let coll = collection(CollectionType::Movies, root.path().to_path_buf());
        let r = scan_collection(&coll, &repo, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(r.items, 1);
        assert_eq!(r.skipped, 1);

        // NFOs are parsed during the scan, not on first access.
        std::fs::remove_file(dir.join("casablanca.nfo")).unwrap();
        let items = coll.items();
        assert_eq!(items[0].name(), "Casablanca (1942)");
        assert_eq!(items[0].sort_name(), "casablanca");
        assert_eq!(items[0].metadata.year(), 1942);
        assert_eq!(items[0].metadata.genres(), ["Drama".to_string()]);
    }

    #[tokio::test]
    async fn test_rescan_removes_deleted() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("A (2000)/a.mp4"), "v");
        touch(&root.path().join("B (2001)/b.mp4"), "v");
        let (_db, repo) = open_temp().await;
        let coll = collection(CollectionType::Movies, root.path().to_path_buf());
        let cancel = CancellationToken::new();

        scan_collection(&coll, &repo, Duration::ZERO, &cancel).await.unwrap();
        let first_ids: Vec<String> = coll.items().iter().map(|i| i.id.clone()).collect();
        assert_eq!(first_ids.len(), 2);

        std::fs::remove_dir_all(root.path().join("B (2001)")).unwrap();
        scan_collection(&coll, &repo, Duration::ZERO, &cancel).await.unwrap();
        let items = coll.items();
        assert_eq!(items.len(), 1);
        // Ids are stable across rescans.
        assert_eq!(items[0].id, first_ids[0]);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let root = tempfile::tempdir().unwrap();
        let (_db, repo) = open_temp().await;
        let coll = collection(CollectionType::Shows, root.path().to_path_buf());
        let r = scan_collection(&coll, &repo, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(r.items, 0);
        assert!(coll.items().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_scan_keeps_snapshot() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("A (2000)/a.mp4"), "v");
        let (_db, repo) = open_temp().await;
        let coll = collection(CollectionType::Movies, root.path().to_path_buf());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let r = scan_collection(&coll, &repo, Duration::from_millis(10), &cancel)
            .await
            .unwrap();
        assert!(r.cancelled);
        assert!(coll.items().is_empty());
    }
}
