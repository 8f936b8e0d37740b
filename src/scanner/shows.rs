use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use super::movies::{assign_image, subtitle_lang};
use super::{read_listing, resolve_year, split_ext, video_stem, Listing, IMAGE_EXTENSIONS};
use crate::collection::item::make_sort_name;
use crate::collection::{Episode, Images, Item, ItemKind, Season, Show, Subtitles};
use crate::services::idhash::id_hash;
use crate::services::metadata::Metadata;

static RE_SEASON_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^season(\d+)-?([a-z]*)\.(jpg|jpeg|png|tbn)$").unwrap());
static RE_SEASON_ALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^season-all-?([a-z]*)\.(jpg|jpeg|png|tbn)$").unwrap());
static RE_SEASON_SPECIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^season-specials-?([a-z]*)\.(jpg|jpeg|png|tbn)$").unwrap());
static RE_SEASON_DIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^S(\d+)$").unwrap());
static RE_SPECIALS_DIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Specials\d*$").unwrap());
/// `S01E02`, optionally `S01E02-E03` for a double episode, then a title.
static RE_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)S(\d+)E(\d+)(?:-?E(\d+))?(?:[\s._-]*(.*))?$").unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeName {
    pub season: i32,
    pub episode: i32,
    pub double: bool,
    pub title: String,
}

pub fn parse_episode_name(stem: &str) -> Option<EpisodeName> {
    let caps = RE_EPISODE.captures(stem)?;
    let season = caps[1].parse().ok()?;
    let episode = caps[2].parse().ok()?;
    let title = caps
        .get(4)
        .map(|m| m.as_str().trim().trim_start_matches("- ").trim())
        .unwrap_or_default();
    Some(EpisodeName {
        season,
        episode,
        double: caps.get(3).is_some(),
        title: title.to_string(),
    })
}

fn season_dir_number(name: &str) -> Option<i32> {
    if let Some(c) = RE_SEASON_DIR.captures(name) {
        return c[1].parse().ok();
    }
    RE_SPECIALS_DIR.is_match(name).then_some(0)
}

/// Slot for a season image kind such as "poster" or "banner". Empty means poster.
fn season_slot<'a>(images: &'a mut Images, kind: &str) -> Option<&'a mut String> {
    match kind {
        "" | "poster" => Some(&mut images.poster),
        "banner" => Some(&mut images.banner),
        "fanart" | "landscape" => Some(&mut images.fanart),
        _ => None,
    }
}

#[derive(Default)]
struct ShowBuilder {
    images: Images,
    nfo: Option<String>,
    season_all_banner: String,
    season_all_poster: String,
    season_images: BTreeMap<i32, Images>,
    episodes: BTreeMap<i32, Vec<Episode>>,
}

impl ShowBuilder {
    fn root_file(&mut self, name: &str) {
        let lower = name.to_lowercase();
        if let Some(c) = RE_SEASON_IMAGE.captures(&lower) {
            let Ok(n) = c[1].parse::<i32>() else {
                return;
            };
            let images = self.season_images.entry(n).or_default();
            if let Some(slot) = season_slot(images, &c[2]) {
                if slot.is_empty() {
                    *slot = name.to_string();
                }
            }
            return;
        }
        if let Some(c) = RE_SEASON_SPECIALS.captures(&lower) {
            let images = self.season_images.entry(0).or_default();
            if let Some(slot) = season_slot(images, &c[1]) {
                if slot.is_empty() {
                    *slot = name.to_string();
                }
            }
            return;
        }
        if let Some(c) = RE_SEASON_ALL.captures(&lower) {
            match &c[1] {
                "banner" => self.season_all_banner = name.to_string(),
                "" | "poster" => self.season_all_poster = name.to_string(),
                _ => {}
            }
            return;
        }
        if lower == "tvshow.nfo" {
            self.nfo = Some(name.to_string());
            return;
        }
        if let Some((stem, ext)) = split_ext(name) {
            if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                assign_image(&mut self.images, name, stem, &ext, "");
            }
        }
    }

    /// Collect the episodes in one directory. `prefix` is the directory
    /// relative to the show root, empty for the root itself.
    fn episodes_in(&mut self, show_dir: &Path, show_name: &str, prefix: &str, listing: &Listing) {
        let rel = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            }
        };

        for file in &listing.files {
            let Some(stem) = video_stem(&file.name) else {
                continue;
            };
            let Some(parsed) = parse_episode_name(stem) else {
                tracing::debug!("Could not parse episode info from: {}", file.name);
                continue;
            };

            let mut thumb = String::new();
            let mut subtitles = Subtitles::default();
            let mut nfo = None;
            for other in &listing.files {
                let Some((other_stem, ext)) = split_ext(&other.name) else {
                    continue;
                };
                if ext == "nfo" && other_stem == stem {
                    nfo = Some(show_dir.join(rel(&other.name)));
                } else if ext == "srt" || ext == "vtt" {
                    if let Some(lang) = subtitle_lang(other_stem, stem) {
                        subtitles.add(lang, &rel(&other.name));
                    }
                } else if IMAGE_EXTENSIONS.contains(&ext.as_str())
                    && thumb.is_empty()
                    && (other_stem == stem || other_stem == format!("{stem}-thumb"))
                {
                    thumb = rel(&other.name);
                }
            }

            let file_name = rel(&file.name);
            let name = if parsed.title.is_empty() {
                stem.to_string()
            } else {
                parsed.title.clone()
            };
            // File names like `S01/S01E01.mp4` repeat across shows, so the
            // show name is part of the hashed key.
            let episode = Episode {
                id: id_hash(&format!("{show_name}/{file_name}")),
                show_id: id_hash(show_name),
                season_id: season_id(show_name, parsed.season),
                name,
                season_no: parsed.season,
                episode_no: parsed.episode,
                double: parsed.double,
                file_name,
                file_size: file.size,
                thumb,
                subtitles,
                metadata: nfo.map(|p| Metadata::from_nfo(p, 0)),
                video_ts: file.ctime,
            };
            self.episodes.entry(parsed.season).or_default().push(episode);
        }
    }
}

pub fn season_id(show_name: &str, season_no: i32) -> String {
    id_hash(&format!("{show_name}-season-{season_no}"))
}

/// Scan one show directory. `None` when the show is not acceptable.
pub async fn scan_show_dir(dir: &Path, dir_name: &str) -> Result<Option<Item>> {
    let root = read_listing(dir).await?;
    let mut builder = ShowBuilder::default();

    for file in &root.files {
        builder.root_file(&file.name);
    }
    builder.episodes_in(dir, dir_name, "", &root);

    for sub in &root.dirs {
        if season_dir_number(sub).is_none() {
            tracing::debug!("Ignoring '{}/{}': not a season directory", dir_name, sub);
            continue;
        }
        match read_listing(&dir.join(sub)).await {
            Ok(listing) => builder.episodes_in(dir, dir_name, sub, &listing),
            Err(e) => tracing::warn!("Skipping '{}/{}': {:#}", dir_name, sub, e),
        }
    }

    let show_id = id_hash(dir_name);
    let mut seasons: Vec<Season> = Vec::new();
    let mut season_images = std::mem::take(&mut builder.season_images);
    for (season_no, mut episodes) in std::mem::take(&mut builder.episodes) {
        if episodes.is_empty() {
            continue;
        }
        episodes.sort_by(|a, b| {
            a.episode_no
                .cmp(&b.episode_no)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        seasons.push(Season {
            id: season_id(dir_name, season_no),
            show_id: show_id.clone(),
            season_no,
            images: season_images.remove(&season_no).unwrap_or_default(),
            season_all_banner: builder.season_all_banner.clone(),
            season_all_poster: builder.season_all_poster.clone(),
            episodes,
        });
    }

    let has_image = builder.images != Images::default();
    let acceptable = !seasons.is_empty() || (builder.nfo.is_some() && has_image);
    if !acceptable {
        return Ok(None);
    }

    let video_times = seasons
        .iter()
        .flat_map(|s| s.episodes.iter())
        .filter_map(|e| e.video_ts);
    let first_video = video_times.clone().min();
    let last_video = video_times.max();

    let year = resolve_year(dir_name, first_video);
    let metadata = match &builder.nfo {
        Some(nfo) => Metadata::from_nfo(dir.join(nfo), year),
        None => Metadata::from_filename(dir_name, year),
    };

    tracing::debug!(
        "Found show '{}': {} seasons, {} episodes",
        dir_name,
        seasons.len(),
        seasons.iter().map(|s| s.episodes.len()).sum::<usize>()
    );

    Ok(Some(Item {
        id: show_id,
        name: dir_name.to_string(),
        sort_name: make_sort_name(dir_name),
        path: dir_name.to_string(),
        images: builder.images,
        metadata,
        first_video,
        last_video,
        kind: ItemKind::Show(Show {
            seasons,
            season_all_banner: builder.season_all_banner,
            season_all_poster: builder.season_all_poster,
        }),
    }))
}
