//! Flat Jellyfin id space over the catalog hierarchy.
//!
//! Collections, seasons and episodes carry a prefix on the wire; movies and
//! shows use their catalog id as is.

use std::sync::Arc;

use crate::collection::{Catalog, Collection, EpisodeRef, ItemRef, SeasonRef};

pub const COLLECTION_PREFIX: &str = "collection_";
pub const SEASON_PREFIX: &str = "season_";
pub const EPISODE_PREFIX: &str = "episode_";

pub fn collection_id(id: &str) -> String {
    format!("{COLLECTION_PREFIX}{id}")
}

pub fn season_id(id: &str) -> String {
    format!("{SEASON_PREFIX}{id}")
}

pub fn episode_id(id: &str) -> String {
    format!("{EPISODE_PREFIX}{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiId<'a> {
    Collection(&'a str),
    Season(&'a str),
    Episode(&'a str),
    Item(&'a str),
}

impl<'a> ApiId<'a> {
    pub fn parse(id: &'a str) -> Self {
        if let Some(rest) = id.strip_prefix(COLLECTION_PREFIX) {
            ApiId::Collection(rest)
        } else if let Some(rest) = id.strip_prefix(SEASON_PREFIX) {
            ApiId::Season(rest)
        } else if let Some(rest) = id.strip_prefix(EPISODE_PREFIX) {
            ApiId::Episode(rest)
        } else {
            ApiId::Item(id)
        }
    }

    /// The catalog id without any prefix. User data is keyed by this.
    pub fn raw(&self) -> &'a str {
        match *self {
            ApiId::Collection(id) | ApiId::Season(id) | ApiId::Episode(id) | ApiId::Item(id) => id,
        }
    }
}

/// A catalog entity addressed by an external id.
#[derive(Debug, Clone)]
pub enum Resolved {
    Collection(Arc<Collection>),
    Item(ItemRef),
    Season(SeasonRef),
    Episode(EpisodeRef),
}

impl Resolved {
    /// External id of the entity.
    pub fn api_id(&self) -> String {
        match self {
            Resolved::Collection(c) => collection_id(&c.id),
            Resolved::Item(r) => r.item.id.clone(),
            Resolved::Season(s) => season_id(&s.season().id),
            Resolved::Episode(e) => episode_id(&e.episode().id),
        }
    }

    /// Catalog id, the key for user data.
    pub fn raw_id(&self) -> String {
        match self {
            Resolved::Collection(c) => c.id.clone(),
            Resolved::Item(r) => r.item.id.clone(),
            Resolved::Season(s) => s.season().id.clone(),
            Resolved::Episode(e) => e.episode().id.clone(),
        }
    }
}

pub fn resolve(catalog: &Catalog, id: &str) -> Option<Resolved> {
    match ApiId::parse(id) {
        ApiId::Collection(id) => catalog.collection(id).map(Resolved::Collection),
        ApiId::Season(id) => catalog.season(id).map(Resolved::Season),
        ApiId::Episode(id) => catalog.episode(id).map(Resolved::Episode),
        ApiId::Item(id) => catalog
            .item(id)
            .map(Resolved::Item)
            // Some clients drop the prefix they were given.
            .or_else(|| catalog.episode(id).map(Resolved::Episode))
            .or_else(|| catalog.season(id).map(Resolved::Season))
            .or_else(|| catalog.collection(id).map(Resolved::Collection)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::tests::{show, shows_config};

    #[test]
    fn test_parse() {
        assert_eq!(ApiId::parse("collection_abc"), ApiId::Collection("abc"));
        assert_eq!(ApiId::parse("season_x"), ApiId::Season("x"));
        assert_eq!(ApiId::parse("episode_y"), ApiId::Episode("y"));
        assert_eq!(ApiId::parse("plain"), ApiId::Item("plain"));
        assert_eq!(ApiId::parse("episode_y").raw(), "y");
    }

    #[test]
    fn test_resolve_round_trip() {
        let catalog = Catalog::new(&[shows_config("TV")]);
        catalog.collections()[0].publish(vec![show("Lost", &[(1, 2)])]);

        let c = &catalog.collections()[0];
        let coll = resolve(&catalog, &collection_id(&c.id)).unwrap();
        assert_eq!(coll.api_id(), collection_id(&c.id));

        let item = c.items()[0].clone();
        let season = &item.seasons()[0];
        let episode = &season.episodes[1];

        let r = resolve(&catalog, &season_id(&season.id)).unwrap();
        assert_eq!(r.api_id(), season_id(&season.id));
        let r = resolve(&catalog, &episode_id(&episode.id)).unwrap();
        assert_eq!(r.raw_id(), episode.id);
        let r = resolve(&catalog, &item.id).unwrap();
        assert!(matches!(r, Resolved::Item(_)));

        assert!(resolve(&catalog, "episode_nope").is_none());
    }
}
