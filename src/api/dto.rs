// Jellyfin item DTOs built from the catalog and the user's state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::ids::{collection_id, episode_id, season_id, Resolved};
use super::playbackinfo::{media_source, MediaSourceInfo, Playable, TICKS_PER_SECOND};
use crate::collection::{Collection, Entity, EpisodeRef, Episode, Images, ItemRef, SeasonRef};
use crate::models::{Playlist, UserData};
use crate::services::idhash::id_hash;
use crate::services::metadata::Metadata;
use crate::AppState;

pub const TAG_REDIRECT: &str = "redirect_";
pub const TAG_FILE: &str = "file_";

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ItemsResponse {
    pub items: Vec<BaseItemDto>,
    pub total_record_count: usize,
    pub start_index: usize,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct BaseItemDto {
    pub name: String,
    pub server_id: String,
    pub id: String,
    pub etag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
    pub can_delete: bool,
    pub can_download: bool,
    pub sort_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premiere_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub official_rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    pub taglines: Vec<String>,
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_rating: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time_ticks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_number_end: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_index_number: Option<i32>,
    pub provider_ids: BTreeMap<String, String>,
    pub is_folder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "Type")]
    pub item_type: String,
    pub people: Vec<PersonDto>,
    pub studios: Vec<NameIdPair>,
    pub genre_items: Vec<NameIdPair>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserItemDataDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive_item_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_preferences_id: Option<String>,
    pub image_tags: BTreeMap<String, String>,
    pub backdrop_image_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_backdrop_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_backdrop_image_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_logo_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_logo_image_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_primary_image_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_subtitles: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_sources: Option<Vec<MediaSourceInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_image_aspect_ratio: Option<f64>,
    pub play_access: String,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UserItemDataDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unplayed_item_count: Option<usize>,
    pub playback_position_ticks: i64,
    pub play_count: i32,
    pub is_favorite: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_played_date: Option<DateTime<Utc>>,
    pub played: bool,
    pub key: String,
    pub item_id: String,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PersonDto {
    pub name: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "Type")]
    pub person_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_image_tag: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NameIdPair {
    pub name: String,
    pub id: String,
}

impl NameIdPair {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: id_hash(name),
        }
    }
}

fn date_to_utc(d: NaiveDate) -> Option<DateTime<Utc>> {
    d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Tag for an image file: changes when the file name does.
pub fn image_tag(file: &str) -> String {
    id_hash(file)
}

/// Tag for a person image: remote thumbs redirect, local ones are served
/// from disk.
fn person_image_tag(thumb: &str, dir: &Path) -> Option<String> {
    if thumb.is_empty() {
        None
    } else if thumb.starts_with("http://") || thumb.starts_with("https://") {
        Some(format!("{TAG_REDIRECT}{thumb}"))
    } else {
        Some(format!("{TAG_FILE}{}", dir.join(thumb).display()))
    }
}

impl BaseItemDto {
    fn base(state: &AppState, id: String, name: String, sort_name: String, item_type: &str) -> Self {
        Self {
            etag: id_hash(&id),
            server_id: state.config.server_id.clone(),
            id,
            name,
            sort_name,
            item_type: item_type.to_string(),
            location_type: Some("FileSystem".to_string()),
            play_access: "Full".to_string(),
            ..Default::default()
        }
    }

    /// Overlay metadata. Only fields that carry a value replace what is there.
    fn apply_metadata(&mut self, md: &Metadata, dir: &Path) {
        if let Some(plot) = non_empty(md.plot()) {
            self.overview = Some(plot);
        }
        if let Some(tagline) = non_empty(md.tagline()) {
            self.taglines = vec![tagline];
        }
        if !md.genres().is_empty() {
            self.genres = md.genres().to_vec();
            self.genre_items = md.genres().iter().map(|g| NameIdPair::new(g)).collect();
        }
        if !md.studios().is_empty() {
            self.studios = md.studios().iter().map(|s| NameIdPair::new(s)).collect();
        }
        if !md.tags().is_empty() {
            self.tags = md.tags().to_vec();
        }
        if md.year() > 0 {
            self.production_year = Some(md.year());
        }
        if let Some(date) = md.premiered().and_then(date_to_utc) {
            self.premiere_date = Some(date);
        }
        if let Some(rating) = non_empty(md.official_rating()) {
            self.official_rating = Some(rating);
        }
        if md.rating() > 0.0 {
            self.community_rating = Some(md.rating());
        }
        let ids = md.provider_ids();
        if !ids.is_empty() {
            self.provider_ids = ids;
        }
        let people = people(md, dir);
        if !people.is_empty() {
            self.people = people;
        }
        if md.duration() > 0 {
            self.run_time_ticks = Some(md.duration() * TICKS_PER_SECOND);
        }
    }

    fn set_images(&mut self, images: &Images) {
        let primary = first_non_empty(&[&images.poster, &images.folder]);
        if let Some(p) = primary {
            self.image_tags.insert("Primary".to_string(), image_tag(p));
            self.primary_image_aspect_ratio = Some(2.0 / 3.0);
        }
        if !images.fanart.is_empty() {
            self.image_tags.insert("Thumb".to_string(), image_tag(&images.fanart));
            self.backdrop_image_tags = vec![image_tag(&images.fanart)];
        }
        if !images.banner.is_empty() {
            self.image_tags.insert("Banner".to_string(), image_tag(&images.banner));
        }
        if !images.logo.is_empty() {
            self.image_tags.insert("Logo".to_string(), image_tag(&images.logo));
        }
    }

    fn set_playable(&mut self, p: &Playable) {
        let source = media_source(p);
        self.run_time_ticks = Some(source.run_time_ticks).filter(|t| *t > 0);
        self.container = Some(source.container.clone());
        self.path = Some(source.path.clone());
        self.has_subtitles = Some(!p.subtitles.is_empty());
        let md = p.metadata();
        self.width = Some(md.video_width()).filter(|w| *w > 0);
        self.height = Some(md.video_height()).filter(|h| *h > 0);
        self.media_type = Some("Video".to_string());
        self.video_type = Some("VideoFile".to_string());
        self.media_sources = Some(vec![source]);
    }
}

fn first_non_empty<'a>(candidates: &[&'a String]) -> Option<&'a str> {
    candidates
        .iter()
        .find(|s| !s.is_empty())
        .map(|s| s.as_str())
}

fn people(md: &Metadata, dir: &Path) -> Vec<PersonDto> {
    let actors = md.actors().iter().map(|a| PersonDto {
        name: a.name.clone(),
        id: id_hash(&a.name),
        role: non_empty(&a.role),
        person_type: "Actor".to_string(),
        primary_image_tag: person_image_tag(&a.thumb, dir),
    });
    let crew = md
        .directors()
        .iter()
        .map(|n| (n, "Director"))
        .chain(md.writers().iter().map(|n| (n, "Writer")))
        .map(|(name, kind)| PersonDto {
            name: name.clone(),
            id: id_hash(name),
            role: None,
            person_type: kind.to_string(),
            primary_image_tag: None,
        });
    actors.chain(crew).collect()
}

/// User data of a single playable item or a folder without a rollup.
pub fn user_data(data: Option<UserData>, raw_id: &str, api_id: &str) -> UserItemDataDto {
    let data = data.unwrap_or_default();
    let has_state = data.played || data.favorite || data.position > 0;
    UserItemDataDto {
        played_percentage: (data.played_percentage > 0).then_some(f64::from(data.played_percentage)),
        unplayed_item_count: None,
        playback_position_ticks: data.position * TICKS_PER_SECOND,
        play_count: i32::from(data.played),
        is_favorite: data.favorite,
        last_played_date: has_state.then_some(data.timestamp),
        played: data.played,
        key: raw_id.to_string(),
        item_id: api_id.to_string(),
    }
}

/// Aggregate over episodes: counts, percentage played, last played date.
pub fn rollup_user_data<'a>(
    state: &AppState,
    user_id: &str,
    episodes: impl Iterator<Item = &'a Episode>,
    raw_id: &str,
    api_id: &str,
) -> UserItemDataDto {
    let own = state.repo.get_user_data(user_id, raw_id);
    let mut total = 0usize;
    let mut played = 0usize;
    let mut last_played: Option<DateTime<Utc>> = None;
    for ep in episodes {
        total += 1;
        if let Some(d) = state.repo.get_user_data(user_id, &ep.id) {
            if d.played {
                played += 1;
            }
            if d.played || d.position > 0 {
                last_played = last_played.max(Some(d.timestamp));
            }
        }
    }
    let percentage = if total > 0 { 100 * played / total } else { 0 };
    UserItemDataDto {
        played_percentage: Some(percentage as f64),
        unplayed_item_count: Some(total - played),
        playback_position_ticks: 0,
        play_count: 0,
        is_favorite: own.map(|d| d.favorite).unwrap_or(false),
        last_played_date: last_played,
        played: total > 0 && played == total,
        key: raw_id.to_string(),
        item_id: api_id.to_string(),
    }
}

pub fn collection_dto(state: &AppState, user_id: &str, c: &Collection) -> BaseItemDto {
    let api_id = collection_id(&c.id);
    let mut dto = BaseItemDto::base(
        state,
        api_id.clone(),
        c.name.clone(),
        c.name.to_lowercase(),
        "CollectionFolder",
    );
    dto.is_folder = true;
    dto.collection_type = Some(c.kind.jellyfin_type().to_string());
    dto.display_preferences_id = Some(id_hash(&c.id));
    let items = c.items();
    dto.child_count = Some(items.len());
    dto.date_created = items.iter().filter_map(|i| i.created()).min();
    if let Some(first) = items.iter().find(|i| !i.images.poster.is_empty()) {
        dto.image_tags
            .insert("Primary".to_string(), image_tag(&first.images.poster));
    }
    dto.user_data = Some(user_data(
        state.repo.get_user_data(user_id, &c.id),
        &c.id,
        &api_id,
    ));
    dto
}

/// Movie or show.
pub fn item_dto(state: &AppState, user_id: &str, r: &ItemRef) -> BaseItemDto {
    let item = &r.item;
    let dir = r.collection.item_dir(item);
    let mut dto = BaseItemDto::base(state, item.id.clone(), item.name(), item.sort_name(), "Movie");
    dto.parent_id = Some(collection_id(&r.collection.id));
    dto.date_created = item.created();
    dto.can_download = true;
    dto.apply_metadata(&item.metadata, &dir);
    dto.set_images(&item.images);

    if item.is_movie() {
        if let Some(p) = Playable::from_resolved(&Resolved::Item(r.clone())) {
            dto.set_playable(&p);
        }
        dto.user_data = Some(user_data(
            state.repo.get_user_data(user_id, &item.id),
            &item.id,
            &item.id,
        ));
    } else {
        dto.item_type = "Series".to_string();
        dto.is_folder = true;
        dto.child_count = Some(item.seasons().len());
        dto.recursive_item_count = Some(item.episodes().count());
        dto.media_type = Some("Unknown".to_string());
        if let Some(show) = item.as_show() {
            if !dto.image_tags.contains_key("Banner") && !show.season_all_banner.is_empty() {
                dto.image_tags
                    .insert("Banner".to_string(), image_tag(&show.season_all_banner));
            }
        }
        dto.user_data = Some(rollup_user_data(
            state,
            user_id,
            item.episodes(),
            &item.id,
            &item.id,
        ));
    }
    dto
}

pub fn season_dto(state: &AppState, user_id: &str, s: &SeasonRef) -> BaseItemDto {
    let season = s.season();
    let show = &s.show;
    let api_id = season_id(&season.id);
    let mut dto = BaseItemDto::base(
        state,
        api_id.clone(),
        season.name(),
        season.sort_name(),
        "Season",
    );
    dto.is_folder = true;
    dto.parent_id = Some(show.id.clone());
    dto.series_id = Some(show.id.clone());
    dto.series_name = Some(show.name());
    dto.index_number = Some(season.season_no);
    dto.child_count = Some(season.episodes.len());
    dto.date_created = season.created();
    dto.production_year = Some(show.metadata.year()).filter(|y| *y > 0);
    dto.media_type = Some("Unknown".to_string());

    let poster = first_non_empty(&[
        &season.images.poster,
        &season.season_all_poster,
        &show.images.poster,
    ]);
    if let Some(p) = poster {
        dto.image_tags.insert("Primary".to_string(), image_tag(p));
    }
    let banner = first_non_empty(&[&season.images.banner, &season.season_all_banner]);
    if let Some(b) = banner {
        dto.image_tags.insert("Banner".to_string(), image_tag(b));
    }
    if !season.images.fanart.is_empty() {
        dto.image_tags
            .insert("Thumb".to_string(), image_tag(&season.images.fanart));
    }
    set_parent_images(&mut dto, s);

    dto.user_data = Some(rollup_user_data(
        state,
        user_id,
        season.episodes.iter(),
        &season.id,
        &api_id,
    ));
    dto
}

/// Backdrop and logo come from the show.
fn set_parent_images(dto: &mut BaseItemDto, s: &SeasonRef) {
    let show = &s.show;
    if !show.images.fanart.is_empty() {
        dto.parent_backdrop_item_id = Some(show.id.clone());
        dto.parent_backdrop_image_tags = Some(vec![image_tag(&show.images.fanart)]);
    }
    if !show.images.logo.is_empty() {
        dto.parent_logo_item_id = Some(show.id.clone());
        dto.parent_logo_image_tag = Some(image_tag(&show.images.logo));
    }
    if !show.images.poster.is_empty() {
        dto.series_primary_image_tag = Some(image_tag(&show.images.poster));
    }
}

pub fn episode_dto(state: &AppState, user_id: &str, e: &EpisodeRef) -> BaseItemDto {
    let episode = e.episode();
    let season = e.season();
    let show = &e.show;
    let dir = e.collection.item_dir(show);
    let api_id = episode_id(&episode.id);
    let mut dto = BaseItemDto::base(
        state,
        api_id.clone(),
        episode.name(),
        episode.sort_name(),
        "Episode",
    );

    // Show metadata first, without its ratings, then the episode's own.
    dto.apply_metadata(&show.metadata, &dir);
    dto.official_rating = None;
    dto.community_rating = None;
    if let Some(md) = &episode.metadata {
        dto.apply_metadata(md, &dir);
    }

    dto.parent_id = Some(season_id(&season.id));
    dto.season_id = Some(season_id(&season.id));
    dto.season_name = Some(season.display_name());
    dto.series_id = Some(show.id.clone());
    dto.series_name = Some(show.name());
    dto.index_number = Some(episode.episode_no);
    if episode.double {
        dto.index_number_end = Some(episode.episode_no + 1);
    }
    dto.parent_index_number = Some(episode.season_no);
    dto.date_created = episode.created();
    dto.can_download = true;

    let primary = first_non_empty(&[&episode.thumb, &season.images.poster, &show.images.poster]);
    if let Some(p) = primary {
        dto.image_tags.insert("Primary".to_string(), image_tag(p));
        if !episode.thumb.is_empty() {
            dto.primary_image_aspect_ratio = Some(16.0 / 9.0);
        }
    }
    if !episode.thumb.is_empty() {
        dto.image_tags
            .insert("Thumb".to_string(), image_tag(&episode.thumb));
    }
    set_parent_images(&mut dto, &e.season_ref());

    if let Some(p) = Playable::from_resolved(&Resolved::Episode(e.clone())) {
        dto.set_playable(&p);
    }
    dto.user_data = Some(user_data(
        state.repo.get_user_data(user_id, &episode.id),
        &episode.id,
        &api_id,
    ));
    dto
}

pub fn playlist_dto(state: &AppState, user_id: &str, p: &Playlist) -> BaseItemDto {
    let mut dto = BaseItemDto::base(
        state,
        p.id.clone(),
        p.name.clone(),
        p.name.to_lowercase(),
        "Playlist",
    );
    dto.is_folder = true;
    dto.date_created = Some(p.created);
    dto.child_count = Some(p.item_ids.len());
    dto.media_type = Some("Video".to_string());
    dto.location_type = Some("Virtual".to_string());
    dto.can_delete = true;
    dto.user_data = Some(user_data(
        state.repo.get_user_data(user_id, &p.id),
        &p.id,
        &p.id,
    ));
    dto
}

pub fn resolved_dto(state: &AppState, user_id: &str, r: &Resolved) -> BaseItemDto {
    match r {
        Resolved::Collection(c) => collection_dto(state, user_id, c),
        Resolved::Item(i) => item_dto(state, user_id, i),
        Resolved::Season(s) => season_dto(state, user_id, s),
        Resolved::Episode(e) => episode_dto(state, user_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_image_tag() {
        let dir = Path::new("/media/movies/Heat (1995)");
        assert_eq!(
            person_image_tag("https://img.example/a.jpg", dir).as_deref(),
            Some("redirect_https://img.example/a.jpg")
        );
        assert_eq!(
            person_image_tag(".actors/Al_Pacino.jpg", dir).as_deref(),
            Some("file_/media/movies/Heat (1995)/.actors/Al_Pacino.jpg")
        );
        assert_eq!(person_image_tag("", dir), None);
    }

    #[test]
    fn test_user_data_ticks() {
        let data = UserData {
            position: 600,
            played_percentage: 10,
            ..Default::default()
        };
        let dto = user_data(Some(data), "raw", "episode_raw");
        assert_eq!(dto.playback_position_ticks, 6_000_000_000);
        assert_eq!(dto.played_percentage, Some(10.0));
        assert!(!dto.played);
        assert_eq!(dto.item_id, "episode_raw");
    }
}
