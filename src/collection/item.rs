use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::services::metadata::Metadata;

static RE_TRAILING_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(\d{4}\)\s*$").unwrap());

/// Image file names, relative to the directory of the entity that owns them.
/// An empty string means the slot is not filled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Images {
    pub poster: String,
    pub banner: String,
    pub fanart: String,
    pub folder: String,
    pub logo: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subtitle {
    pub lang: String,
    /// Relative to the item directory. A `.vtt` entry may be synthesized from
    /// an `.srt` file and not exist on disk.
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subtitles {
    pub srt: Vec<Subtitle>,
    pub vtt: Vec<Subtitle>,
}

impl Subtitles {
    pub fn is_empty(&self) -> bool {
        self.srt.is_empty() && self.vtt.is_empty()
    }

    /// Record a subtitle file; an `.srt` also gets a `.vtt` twin.
    pub fn add(&mut self, lang: &str, path: &str) {
        let lang = if lang.is_empty() { "zz" } else { lang };
        let entry = Subtitle {
            lang: lang.to_string(),
            path: path.to_string(),
        };
        match path.rsplit_once('.') {
            Some((stem, ext)) if ext.eq_ignore_ascii_case("srt") => {
                let vtt = format!("{stem}.vtt");
                if !self.vtt.iter().any(|s| s.path == vtt) {
                    self.vtt.push(Subtitle {
                        lang: lang.to_string(),
                        path: vtt,
                    });
                }
                self.srt.push(entry);
            }
            _ => {
                if !self.vtt.iter().any(|s| s.path == entry.path) {
                    self.vtt.push(entry);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub sort_name: String,
    /// Directory relative to the collection root.
    pub path: String,
    pub images: Images,
    pub metadata: Metadata,
    pub first_video: Option<DateTime<Utc>>,
    pub last_video: Option<DateTime<Utc>>,
    pub kind: ItemKind,
}

#[derive(Debug)]
pub enum ItemKind {
    Movie(Movie),
    Show(Show),
}

#[derive(Debug)]
pub struct Movie {
    pub file_name: String,
    pub file_size: u64,
    pub subtitles: Subtitles,
}

#[derive(Debug, Default)]
pub struct Show {
    pub seasons: Vec<Season>,
    pub season_all_banner: String,
    pub season_all_poster: String,
}

#[derive(Debug)]
pub struct Season {
    pub id: String,
    pub show_id: String,
    pub season_no: i32,
    /// Season specific images, relative to the show directory.
    pub images: Images,
    pub season_all_banner: String,
    pub season_all_poster: String,
    pub episodes: Vec<Episode>,
}

#[derive(Debug)]
pub struct Episode {
    pub id: String,
    pub show_id: String,
    pub season_id: String,
    pub name: String,
    pub season_no: i32,
    pub episode_no: i32,
    pub double: bool,
    /// Relative to the show directory.
    pub file_name: String,
    pub file_size: u64,
    /// Relative to the show directory.
    pub thumb: String,
    pub subtitles: Subtitles,
    pub metadata: Option<Metadata>,
    pub video_ts: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_movie(&self) -> bool {
        matches!(self.kind, ItemKind::Movie(_))
    }

    pub fn as_movie(&self) -> Option<&Movie> {
        match &self.kind {
            ItemKind::Movie(m) => Some(m),
            ItemKind::Show(_) => None,
        }
    }

    pub fn as_show(&self) -> Option<&Show> {
        match &self.kind {
            ItemKind::Show(s) => Some(s),
            ItemKind::Movie(_) => None,
        }
    }

    /// Seasons of a show, empty for movies.
    pub fn seasons(&self) -> &[Season] {
        self.as_show().map(|s| s.seasons.as_slice()).unwrap_or(&[])
    }

    pub fn episodes(&self) -> impl Iterator<Item = &Episode> {
        self.seasons().iter().flat_map(|s| s.episodes.iter())
    }

    /// Parse every NFO of the item and its episodes off the runtime threads.
    pub async fn load_metadata(&self) {
        self.metadata.load().await;
        for ep in self.episodes() {
            if let Some(m) = &ep.metadata {
                m.load().await;
            }
        }
    }
}

impl Season {
    /// External name; season 0 holds the specials.
    pub fn display_name(&self) -> String {
        if self.season_no == 0 {
            "Specials".to_string()
        } else {
            format!("Season {}", self.season_no)
        }
    }
}

/// Accessors shared by every level of the catalog hierarchy.
pub trait Entity {
    fn id(&self) -> &str;
    fn name(&self) -> String;
    fn sort_name(&self) -> String;
    fn created(&self) -> Option<DateTime<Utc>>;
}

impl Entity for Item {
    fn id(&self) -> &str {
        &self.id
    }

    /// The directory name. Name and sort name share this source so that
    /// listings sort by what they display.
    fn name(&self) -> String {
        self.name.clone()
    }

    /// NFO `sorttitle` when set, else derived from the directory name.
    fn sort_name(&self) -> String {
        let sort_title = self.metadata.sort_title();
        if sort_title.is_empty() {
            self.sort_name.clone()
        } else {
            make_sort_name(sort_title)
        }
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.first_video
    }
}

impl Entity for Season {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> String {
        self.display_name()
    }

    fn sort_name(&self) -> String {
        // Specials sort after the regular seasons in name order.
        let n = if self.season_no == 0 { 9999 } else { self.season_no };
        format!("{n:04}")
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.episodes.iter().filter_map(|e| e.video_ts).min()
    }
}

impl Entity for Episode {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> String {
        match &self.metadata {
            Some(m) if !m.title().is_empty() => m.title().to_string(),
            _ => self.name.clone(),
        }
    }

    fn sort_name(&self) -> String {
        format!("{:04}{:04}", self.season_no, self.episode_no)
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.video_ts
    }
}

/// Lowercase, trailing `(YYYY)` and leading article removed, punctuation
/// trimmed.
pub fn make_sort_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let lower = RE_TRAILING_YEAR.replace(&lower, "");
    let mut rest: &str = &lower;
    for article in ["the ", "a ", "an "] {
        if let Some(stripped) = rest.strip_prefix(article) {
            rest = stripped;
            break;
        }
    }
    rest.trim_matches(|c: char| !c.is_alphanumeric()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_sort_name() {
        assert_eq!(make_sort_name("The Matrix"), "matrix");
        assert_eq!(make_sort_name("A Beautiful Mind"), "beautiful mind");
        assert_eq!(make_sort_name("An American Werewolf"), "american werewolf");
        assert_eq!(make_sort_name("Theodore Rex"), "theodore rex");
        assert_eq!(make_sort_name("\"Heat\"..."), "heat");
        assert_eq!(make_sort_name("'71"), "71");
        assert_eq!(make_sort_name("Casablanca (1942)"), "casablanca");
        assert_eq!(make_sort_name("The Thing (1982) "), "thing");
        assert_eq!(make_sort_name("1917 (2019)"), "1917");
    }

    #[test]
    fn test_item_name_and_sort_name_agree() {
        let dir = tempfile::tempdir().unwrap();
        let nfo = dir.path().join("casablanca.nfo");
        std::fs::write(&nfo, "<movie><title>Casablanca</title><year>1942</year></movie>").unwrap();
        let mut item = crate::collection::tests::show("Casablanca (1942)", &[]);
        item.metadata = Metadata::from_nfo(&nfo, 1942);
        assert_eq!(item.name(), "Casablanca (1942)");
        assert_eq!(item.sort_name(), "casablanca");

        let sorted = dir.path().join("sorted.nfo");
        std::fs::write(&sorted, "<movie><sorttitle>Casablanca 1</sorttitle></movie>").unwrap();
        item.metadata = Metadata::from_nfo(&sorted, 1942);
        assert_eq!(item.sort_name(), "casablanca 1");
    }

    #[test]
    fn test_subtitles_synthesize_vtt() {
        let mut subs = Subtitles::default();
        subs.add("en", "movie.en.srt");
        subs.add("", "movie.vtt");
        subs.add("en", "movie.en.vtt");
        assert_eq!(subs.srt.len(), 1);
        let vtt: Vec<&str> = subs.vtt.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(vtt, vec!["movie.en.vtt", "movie.vtt"]);
        assert_eq!(subs.vtt[1].lang, "zz");
    }

    #[test]
    fn test_season_display_name() {
        let season = Season {
            id: "s".into(),
            show_id: "x".into(),
            season_no: 0,
            images: Images::default(),
            season_all_banner: String::new(),
            season_all_poster: String::new(),
            episodes: Vec::new(),
        };
        assert_eq!(season.display_name(), "Specials");
    }
}
