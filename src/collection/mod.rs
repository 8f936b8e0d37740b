// In-memory catalog of the configured collections.
//
// Each collection holds an immutable snapshot of its items. The scanner
// builds a complete new snapshot and swaps it in, so readers always see either
// the previous or the next state of a collection.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::CollectionConfig;
use crate::services::idhash::id_hash;

pub mod item;

pub use item::{Entity, Episode, Images, Item, ItemKind, Movie, Season, Show, Subtitle, Subtitles};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    Movies,
    Shows,
}

impl CollectionType {
    /// Jellyfin `CollectionType` value.
    pub fn jellyfin_type(&self) -> &'static str {
        match self {
            CollectionType::Movies => "movies",
            CollectionType::Shows => "tvshows",
        }
    }
}

#[derive(Debug)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub kind: CollectionType,
    pub directory: PathBuf,
    pub base_url: String,
    pub hls_server: String,
    snapshot: RwLock<Arc<Snapshot>>,
}

/// One published state of a collection.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub items: Vec<Arc<Item>>,
    by_id: HashMap<String, usize>,
    seasons: HashMap<String, (usize, usize)>,
    episodes: HashMap<String, (usize, usize, usize)>,
    pub published: Option<DateTime<Utc>>,
}

impl Snapshot {
    fn build(items: Vec<Item>) -> Self {
        let items: Vec<Arc<Item>> = items.into_iter().map(Arc::new).collect();
        let mut by_id = HashMap::new();
        let mut seasons = HashMap::new();
        let mut episodes = HashMap::new();

        // First occurrence wins, matching a front-to-back linear search.
        for (i, item) in items.iter().enumerate() {
            by_id.entry(item.id.clone()).or_insert(i);
            for (s, season) in item.seasons().iter().enumerate() {
                seasons.entry(season.id.clone()).or_insert((i, s));
                for (e, episode) in season.episodes.iter().enumerate() {
                    episodes.entry(episode.id.clone()).or_insert((i, s, e));
                }
            }
        }

        Self {
            items,
            by_id,
            seasons,
            episodes,
            published: Some(Utc::now()),
        }
    }
}

impl Collection {
    pub fn new(config: &CollectionConfig) -> Self {
        let id = match config.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => id_hash(&config.name),
        };
        Self {
            id,
            name: config.name.clone(),
            kind: config.kind,
            directory: config.directory.clone(),
            base_url: config.baseurl.clone().unwrap_or_default(),
            hls_server: config.hlsserver.clone().unwrap_or_default(),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Current snapshot. Stays valid after a later publish.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    pub fn items(&self) -> Vec<Arc<Item>> {
        self.snapshot().items.clone()
    }

    /// Atomically replace the item list.
    pub fn publish(&self, items: Vec<Item>) {
        let snapshot = Arc::new(Snapshot::build(items));
        tracing::debug!(
            "Collection '{}': published {} items",
            self.name,
            snapshot.items.len()
        );
        *self.snapshot.write() = snapshot;
    }

    /// Absolute directory of an item.
    pub fn item_dir(&self, item: &Item) -> PathBuf {
        self.directory.join(&item.path)
    }
}

/// An item together with the collection it was found in.
#[derive(Debug, Clone)]
pub struct ItemRef {
    pub collection: Arc<Collection>,
    pub item: Arc<Item>,
}

#[derive(Debug, Clone)]
pub struct SeasonRef {
    pub collection: Arc<Collection>,
    pub show: Arc<Item>,
    season_idx: usize,
}

#[derive(Debug, Clone)]
pub struct EpisodeRef {
    pub collection: Arc<Collection>,
    pub show: Arc<Item>,
    season_idx: usize,
    episode_idx: usize,
}

impl SeasonRef {
    pub fn new(collection: Arc<Collection>, show: Arc<Item>, season_idx: usize) -> Self {
        Self {
            collection,
            show,
            season_idx,
        }
    }

    pub fn season(&self) -> &Season {
        &self.show.seasons()[self.season_idx]
    }

    pub fn episodes(&self) -> Vec<EpisodeRef> {
        (0..self.season().episodes.len())
            .map(|e| EpisodeRef {
                collection: self.collection.clone(),
                show: self.show.clone(),
                season_idx: self.season_idx,
                episode_idx: e,
            })
            .collect()
    }
}

impl EpisodeRef {
    pub fn season(&self) -> &Season {
        &self.show.seasons()[self.season_idx]
    }

    pub fn episode(&self) -> &Episode {
        &self.season().episodes[self.episode_idx]
    }

    pub fn season_ref(&self) -> SeasonRef {
        SeasonRef::new(self.collection.clone(), self.show.clone(), self.season_idx)
    }

    /// The following episode: next in this season, else the first episode
    /// of the next non-empty season.
    pub fn next(&self) -> Option<EpisodeRef> {
        let seasons = self.show.seasons();
        let mut season_idx = self.season_idx;
        let mut episode_idx = self.episode_idx + 1;
        while season_idx < seasons.len() {
            if episode_idx < seasons[season_idx].episodes.len() {
                return Some(EpisodeRef {
                    collection: self.collection.clone(),
                    show: self.show.clone(),
                    season_idx,
                    episode_idx,
                });
            }
            season_idx += 1;
            episode_idx = 0;
        }
        None
    }

    /// Absolute path of the video file.
    pub fn video_path(&self) -> PathBuf {
        self.collection
            .item_dir(&self.show)
            .join(&self.episode().file_name)
    }
}

/// Union of filterable values over a set of items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogDetails {
    pub genres: Vec<String>,
    pub official_ratings: Vec<String>,
    pub years: Vec<i32>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    collections: Vec<Arc<Collection>>,
}

impl Catalog {
    pub fn new(configs: &[CollectionConfig]) -> Self {
        let collections = configs
            .iter()
            .map(|c| Arc::new(Collection::new(c)))
            .collect();
        Self { collections }
    }

    pub fn collections(&self) -> &[Arc<Collection>] {
        &self.collections
    }

    pub fn collection(&self, id: &str) -> Option<Arc<Collection>> {
        self.collections.iter().find(|c| c.id == id).cloned()
    }

    pub fn item(&self, id: &str) -> Option<ItemRef> {
        self.collections.iter().find_map(|c| {
            let snap = c.snapshot();
            snap.by_id.get(id).map(|&i| ItemRef {
                collection: c.clone(),
                item: snap.items[i].clone(),
            })
        })
    }

    pub fn season(&self, id: &str) -> Option<SeasonRef> {
        self.collections.iter().find_map(|c| {
            let snap = c.snapshot();
            snap.seasons
                .get(id)
                .map(|&(i, s)| SeasonRef::new(c.clone(), snap.items[i].clone(), s))
        })
    }

    pub fn episode(&self, id: &str) -> Option<EpisodeRef> {
        self.collections.iter().find_map(|c| {
            let snap = c.snapshot();
            snap.episodes.get(id).map(|&(i, s, e)| EpisodeRef {
                collection: c.clone(),
                show: snap.items[i].clone(),
                season_idx: s,
                episode_idx: e,
            })
        })
    }

    /// All seasons of a show as references.
    pub fn seasons_of(&self, show: &ItemRef) -> Vec<SeasonRef> {
        (0..show.item.seasons().len())
            .map(|s| SeasonRef::new(show.collection.clone(), show.item.clone(), s))
            .collect()
    }

    /// Every item of every collection, in collection order.
    pub fn all_items(&self) -> Vec<ItemRef> {
        self.collections
            .iter()
            .flat_map(|c| {
                c.items().into_iter().map(|item| ItemRef {
                    collection: c.clone(),
                    item,
                })
            })
            .collect()
    }

    /// Genres, official ratings and years found in the given items.
    pub fn details(items: &[ItemRef]) -> CatalogDetails {
        let mut genres = BTreeSet::new();
        let mut ratings = BTreeSet::new();
        let mut years = BTreeSet::new();
        for r in items {
            let md = &r.item.metadata;
            genres.extend(md.genres().iter().cloned());
            let rating = md.official_rating();
            if !rating.is_empty() {
                ratings.insert(rating.to_string());
            }
            if md.year() > 0 {
                years.insert(md.year());
            }
        }
        CatalogDetails {
            genres: genres.into_iter().collect(),
            official_ratings: ratings.into_iter().collect(),
            years: years.into_iter().collect(),
        }
    }

    /// For each show, the episode after the most recently watched one.
    ///
    /// `watched` holds episode ids, most recent first. Only the first
    /// occurrence of a show counts; shows whose latest watched episode is the
    /// last one produce nothing.
    pub fn next_up(&self, watched: &[String]) -> Vec<EpisodeRef> {
        let mut seen_shows = HashSet::new();
        let mut next = Vec::new();
        for id in watched {
            let Some(episode) = self.episode(id) else {
                continue;
            };
            if !seen_shows.insert(episode.show.id.clone()) {
                continue;
            }
            if let Some(n) = episode.next() {
                next.push(n);
            }
        }
        next
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::metadata::Metadata;

    pub(crate) fn episode(show: &str, season: i32, number: i32) -> Episode {
        let file_name = format!("S{season:02}/S{season:02}E{number:02}.mp4");
        Episode {
            id: id_hash(&format!("{show}/{file_name}")),
            show_id: id_hash(show),
            season_id: id_hash(&format!("{show}-season-{season}")),
            name: format!("S{season:02}E{number:02}"),
            season_no: season,
            episode_no: number,
            double: false,
            file_name,
            file_size: 1,
            thumb: String::new(),
            subtitles: Subtitles::default(),
            metadata: None,
            video_ts: None,
        }
    }

    pub(crate) fn show(name: &str, layout: &[(i32, i32)]) -> Item {
        let seasons = layout
            .iter()
            .map(|&(season_no, count)| Season {
                id: id_hash(&format!("{name}-season-{season_no}")),
                show_id: id_hash(name),
                season_no,
                images: Images::default(),
                season_all_banner: String::new(),
                season_all_poster: String::new(),
                episodes: (1..=count).map(|n| episode(name, season_no, n)).collect(),
            })
            .collect();
        Item {
            id: id_hash(name),
            name: name.to_string(),
            sort_name: item::make_sort_name(name),
            path: name.to_string(),
            images: Images::default(),
            metadata: Metadata::from_filename(name, 0),
            first_video: None,
            last_video: None,
            kind: ItemKind::Show(Show {
                seasons,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn shows_config(name: &str) -> CollectionConfig {
        CollectionConfig {
            id: Some("tv".to_string()),
            name: name.to_string(),
            kind: CollectionType::Shows,
            directory: PathBuf::from("/nonexistent"),
            baseurl: None,
            hlsserver: None,
        }
    }

    fn catalog_with(items: Vec<Item>) -> Catalog {
        let catalog = Catalog::new(&[shows_config("TV")]);
        catalog.collections()[0].publish(items);
        catalog
    }

    fn ep_id(show: &str, season: i32, number: i32) -> String {
        episode(show, season, number).id
    }

    #[test]
    fn test_lookup_every_level() {
        let catalog = catalog_with(vec![show("Lost", &[(1, 2), (2, 1)])]);
        let item = catalog.item(&id_hash("Lost")).unwrap();
        assert_eq!(item.item.name, "Lost");
        assert_eq!(catalog.seasons_of(&item).len(), 2);

        let season = catalog.season(&id_hash("Lost-season-2")).unwrap();
        assert_eq!(season.season().season_no, 2);

        let ep = catalog.episode(&ep_id("Lost", 1, 2)).unwrap();
        assert_eq!(ep.episode().episode_no, 2);
        assert_eq!(ep.season().season_no, 1);
        assert!(catalog.item("missing").is_none());
    }

    #[test]
    fn test_every_item_id_maps_back() {
        let catalog = catalog_with(vec![show("A", &[(1, 1)]), show("B", &[(1, 3)])]);
        for r in catalog.all_items() {
            let found = catalog.item(&r.item.id).unwrap();
            assert!(Arc::ptr_eq(&found.item, &r.item));
        }
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let catalog = catalog_with(vec![show("A", &[(1, 1)]), show("B", &[(1, 1)])]);
        let before = catalog.collections()[0].snapshot();
        catalog.collections()[0].publish(vec![show("A", &[(1, 1)])]);
        assert_eq!(before.items.len(), 2);
        assert_eq!(catalog.collections()[0].items().len(), 1);
        assert!(catalog.item(&id_hash("B")).is_none());
    }

    #[test]
    fn test_next_up() {
        let catalog = catalog_with(vec![show("S", &[(1, 2), (2, 1)])]);
        let s1e1 = ep_id("S", 1, 1);
        let s1e2 = ep_id("S", 1, 2);
        let s2e1 = ep_id("S", 2, 1);

        let next = catalog.next_up(&[s1e1.clone()]);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].episode().id, s1e2);

        let next = catalog.next_up(&[s1e2.clone(), s1e1.clone()]);
        assert_eq!(next[0].episode().id, s2e1);

        let next = catalog.next_up(&[s2e1, s1e2, s1e1]);
        assert!(next.is_empty());
    }

    #[test]
    fn test_next_up_one_per_show() {
        let catalog = catalog_with(vec![show("X", &[(1, 3)]), show("Y", &[(1, 2)])]);
        let watched = vec![ep_id("X", 1, 1), ep_id("Y", 1, 1), ep_id("X", 1, 2)];
        let next: Vec<String> = catalog
            .next_up(&watched)
            .iter()
            .map(|e| e.episode().id.clone())
            .collect();
        assert_eq!(next, vec![ep_id("X", 1, 2), ep_id("Y", 1, 2)]);
    }

    #[test]
    fn test_details() {
        let catalog = catalog_with(vec![show("A", &[(1, 1)])]);
        let details = Catalog::details(&catalog.all_items());
        assert!(details.genres.is_empty());
        assert!(details.years.is_empty());
    }
}
