// Metadata provider for catalog items.
//
// An item either has an NFO sidecar (parsed lazily on first access) or only a
// name from which a few technical details can be guessed.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, OnceLock};

use super::nfo::{self, Actor, AudioDetails, Nfo, VideoDetails};

pub const DEFAULT_FRAMERATE: f32 = 23.976;
pub const DEFAULT_LANGUAGE: &str = "eng";
pub const UNKNOWN: &str = "unknown";

#[derive(Debug)]
pub enum Metadata {
    Nfo(NfoMetadata),
    Filename(FilenameMetadata),
}

#[derive(Debug)]
pub struct NfoMetadata {
    path: PathBuf,
    year_hint: i32,
    parsed: OnceLock<Nfo>,
}

#[derive(Debug)]
pub struct FilenameMetadata {
    name: String,
    year: i32,
    video: VideoDetails,
    audio: AudioDetails,
}

static RE_H264: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[hx].?264|\bavc\b").unwrap());
static RE_H265: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[hx].?265|\bhevc\b").unwrap());
static RE_2160: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)2160|\b4k\b").unwrap());
static RE_1080: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"1080").unwrap());
static RE_720: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"720").unwrap());
static RE_AAC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\baac").unwrap());
static RE_AC3: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(ac3|dd5)").unwrap());
static RE_CH_20: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)2\.0(?:\D|$)").unwrap());
static RE_CH_51: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)5\.1(?:\D|$)").unwrap());

impl Metadata {
    pub fn from_nfo(path: impl Into<PathBuf>, year_hint: i32) -> Self {
        Metadata::Nfo(NfoMetadata {
            path: path.into(),
            year_hint,
            parsed: OnceLock::new(),
        })
    }

    pub fn from_filename(name: &str, year_hint: i32) -> Self {
        Metadata::Filename(FilenameMetadata::new(name, year_hint))
    }

    /// The parsed NFO, or an empty one for filename-backed metadata.
    fn nfo(&self) -> &Nfo {
        static EMPTY: LazyLock<Nfo> = LazyLock::new(Nfo::default);
        match self {
            Metadata::Nfo(m) => m.nfo(),
            Metadata::Filename(_) => &EMPTY,
        }
    }

    /// Read and parse the NFO without blocking the runtime. Accessors still
    /// parse on first use when this was never awaited.
    pub async fn load(&self) {
        let Metadata::Nfo(m) = self else {
            return;
        };
        if m.parsed.get().is_some() {
            return;
        }
        let nfo = decode_nfo(&m.path, tokio::fs::read(&m.path).await);
        // A concurrent first access may have won; both parsed the same file.
        let _ = m.parsed.set(nfo);
    }

    pub fn nfo_path(&self) -> Option<&Path> {
        match self {
            Metadata::Nfo(m) => Some(&m.path),
            Metadata::Filename(_) => None,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Metadata::Nfo(m) => &m.nfo().title,
            Metadata::Filename(m) => &m.name,
        }
    }

    /// NFO `sorttitle`, empty when absent.
    pub fn sort_title(&self) -> &str {
        &self.nfo().sort_title
    }

    pub fn plot(&self) -> &str {
        let nfo = self.nfo();
        if nfo.plot.is_empty() {
            &nfo.outline
        } else {
            &nfo.plot
        }
    }

    pub fn tagline(&self) -> &str {
        &self.nfo().tagline
    }

    pub fn genres(&self) -> &[String] {
        &self.nfo().genres
    }

    pub fn studios(&self) -> &[String] {
        &self.nfo().studios
    }

    pub fn directors(&self) -> &[String] {
        &self.nfo().directors
    }

    pub fn writers(&self) -> &[String] {
        &self.nfo().writers
    }

    pub fn tags(&self) -> &[String] {
        &self.nfo().tags
    }

    pub fn actors(&self) -> &[Actor] {
        &self.nfo().actors
    }

    pub fn year(&self) -> i32 {
        match self {
            Metadata::Nfo(m) => {
                let year = m.nfo().year;
                if year > 0 {
                    year
                } else {
                    m.year_hint
                }
            }
            Metadata::Filename(m) => m.year,
        }
    }

    pub fn set_year(&mut self, year: i32) {
        match self {
            Metadata::Nfo(m) => m.year_hint = year,
            Metadata::Filename(m) => m.year = year,
        }
    }

    /// First parseable date of `aired`, then `premiered`.
    pub fn premiered(&self) -> Option<NaiveDate> {
        let nfo = self.nfo();
        parse_date(&nfo.aired).or_else(|| parse_date(&nfo.premiered))
    }

    /// Community rating rounded to one decimal.
    pub fn rating(&self) -> f32 {
        (self.nfo().rating * 10.0).round() / 10.0
    }

    pub fn votes(&self) -> i32 {
        self.nfo().votes
    }

    pub fn official_rating(&self) -> &str {
        let mpaa = self.nfo().mpaa.as_str();
        mpaa.strip_prefix("Rated ").unwrap_or(mpaa)
    }

    pub fn provider_ids(&self) -> BTreeMap<String, String> {
        let nfo = self.nfo();
        let mut ids = BTreeMap::new();
        if !nfo.imdb_id.is_empty() {
            ids.insert("Imdb".to_string(), nfo.imdb_id.clone());
        }
        if !nfo.tmdb_id.is_empty() {
            ids.insert("Tmdb".to_string(), nfo.tmdb_id.clone());
        }
        ids
    }

    /// Duration in seconds: NFO runtime when present, else the stream details.
    pub fn duration(&self) -> i64 {
        let nfo = self.nfo();
        if nfo.runtime > 0 {
            i64::from(nfo.runtime) * 60
        } else {
            nfo.video.duration_in_seconds
        }
    }

    fn video(&self) -> &VideoDetails {
        match self {
            Metadata::Nfo(m) => &m.nfo().video,
            Metadata::Filename(m) => &m.video,
        }
    }

    fn audio(&self) -> &AudioDetails {
        match self {
            Metadata::Nfo(m) => &m.nfo().audio,
            Metadata::Filename(m) => &m.audio,
        }
    }

    pub fn video_codec(&self) -> &str {
        non_empty_or(&self.video().codec, UNKNOWN)
    }

    pub fn video_bitrate(&self) -> i64 {
        self.video().bitrate
    }

    pub fn video_width(&self) -> i32 {
        self.video().width
    }

    pub fn video_height(&self) -> i32 {
        self.video().height
    }

    pub fn video_framerate(&self) -> f32 {
        let rate = self.video().framerate;
        if rate > 0.0 {
            rate
        } else {
            DEFAULT_FRAMERATE
        }
    }

    pub fn audio_codec(&self) -> &str {
        non_empty_or(&self.audio().codec, UNKNOWN)
    }

    pub fn audio_channels(&self) -> i32 {
        self.audio().channels
    }

    /// Three letter audio language, `eng` when unknown.
    pub fn audio_language(&self) -> String {
        let lang = self.audio().language.trim();
        if lang.is_empty() {
            DEFAULT_LANGUAGE.to_string()
        } else {
            lang.chars().take(3).collect::<String>().to_lowercase()
        }
    }
}

impl NfoMetadata {
    fn nfo(&self) -> &Nfo {
        self.parsed
            .get_or_init(|| decode_nfo(&self.path, std::fs::read(&self.path)))
    }
}

fn decode_nfo(path: &Path, read: std::io::Result<Vec<u8>>) -> Nfo {
    match read {
        Ok(bytes) => {
            let nfo = nfo::parse(&bytes);
            if nfo == Nfo::default() {
                tracing::warn!("NFO {} has no usable content", path.display());
            }
            nfo
        }
        Err(e) => {
            tracing::warn!("Failed to read NFO {}: {}", path.display(), e);
            Nfo::default()
        }
    }
}

impl FilenameMetadata {
    fn new(name: &str, year: i32) -> Self {
        let codec = if RE_H265.is_match(name) {
            "hevc"
        } else if RE_H264.is_match(name) {
            "h264"
        } else {
            ""
        };
        let (width, height) = if RE_2160.is_match(name) {
            (3840, 2160)
        } else if RE_1080.is_match(name) {
            (1920, 1080)
        } else if RE_720.is_match(name) {
            (1280, 720)
        } else {
            (0, 0)
        };
        let audio_codec = if RE_AC3.is_match(name) {
            "ac3"
        } else if RE_AAC.is_match(name) {
            "aac"
        } else {
            ""
        };
        let channels = if RE_CH_51.is_match(name) {
            6
        } else if RE_CH_20.is_match(name) {
            2
        } else {
            0
        };

        Self {
            name: name.to_string(),
            year,
            video: VideoDetails {
                codec: codec.to_string(),
                width,
                height,
                ..Default::default()
            },
            audio: AudioDetails {
                codec: audio_codec.to_string(),
                channels,
                ..Default::default()
            },
        }
    }
}

fn non_empty_or<'a>(s: &'a str, default: &'a str) -> &'a str {
    if s.is_empty() {
        default
    } else {
        s
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%d %b %Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d %b %Y"];

/// Parse the date formats found in NFO `aired`/`premiered` fields. A trailing
/// `HH:MM:SS` time of day is accepted and dropped. A bare `HH:MM:SS` is
/// recognized but carries no date, so it yields `None`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok() {
        tracing::debug!("Date field '{}' holds only a time of day, ignoring it", s);
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_date_formats() {
        let d = NaiveDate::from_ymd_opt(2006, 1, 2);
        assert_eq!(parse_date("2006-01-02"), d);
        assert_eq!(parse_date("2006/01/02"), d);
        assert_eq!(parse_date("2006-01-02 15:04:05"), d);
        assert_eq!(parse_date("2006/01/02 15:04:05"), d);
        assert_eq!(parse_date("02 Jan 2006"), d);
        assert_eq!(parse_date("02 Jan 2006 15:04:05"), d);
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn test_parse_date_time_only() {
        assert_eq!(parse_date("15:04:05"), None);
        assert_eq!(parse_date(" 00:00:00 "), None);
        assert_eq!(parse_date("25:99:99"), None);
    }

    #[test]
    fn test_filename_heuristics() {
        let m = Metadata::from_filename("Movie.2019.2160p.x265.AC3.5.1", 2019);
        assert_eq!(m.video_codec(), "hevc");
        assert_eq!(m.video_width(), 3840);
        assert_eq!(m.video_height(), 2160);
        assert_eq!(m.audio_codec(), "ac3");
        assert_eq!(m.audio_channels(), 6);
        assert_eq!(m.year(), 2019);

        let m = Metadata::from_filename("Show.S01E01.720p.h.264.AAC2.0", 0);
        assert_eq!(m.video_codec(), "h264");
        assert_eq!(m.video_height(), 720);
        assert_eq!(m.audio_codec(), "aac");
        assert_eq!(m.audio_channels(), 2);
    }

    #[test]
    fn test_filename_defaults() {
        let m = Metadata::from_filename("Plain Name", 0);
        assert_eq!(m.title(), "Plain Name");
        assert_eq!(m.video_codec(), UNKNOWN);
        assert_eq!(m.audio_codec(), UNKNOWN);
        assert_eq!(m.video_width(), 0);
        assert_eq!(m.video_framerate(), DEFAULT_FRAMERATE);
        assert_eq!(m.audio_language(), "eng");
        assert!(m.genres().is_empty());
        assert_eq!(m.duration(), 0);
        assert_eq!(m.premiered(), None);
    }

    #[test]
    fn test_nfo_metadata_lazy_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "<movie><title>Heat</title><runtime>170</runtime><rating>8.26</rating>\
             <mpaa>Rated R</mpaa><aired></aired><premiered>1995-12-15</premiered>\
             <genre>Crime/Thriller</genre><uniqueid type=\"imdb\">tt0113277</uniqueid>\
             <fileinfo><streamdetails><audio><language>English</language></audio></streamdetails></fileinfo>\
             </movie>"
        )
        .unwrap();

        let mut m = Metadata::from_nfo(file.path(), 1990);
        assert_eq!(m.title(), "Heat");
        assert_eq!(m.duration(), 170 * 60);
        assert_eq!(m.rating(), 8.3);
        assert_eq!(m.official_rating(), "R");
        assert_eq!(m.year(), 1990);
        m.set_year(1995);
        assert_eq!(m.year(), 1995);
        assert_eq!(m.premiered(), NaiveDate::from_ymd_opt(1995, 12, 15));
        assert_eq!(m.genres(), &["Crime".to_string(), "Thriller".to_string()]);
        assert_eq!(m.provider_ids().get("Imdb").map(String::as_str), Some("tt0113277"));
        assert_eq!(m.audio_language(), "eng");
    }

    #[tokio::test]
    async fn test_load_parses_before_first_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heat.nfo");
        std::fs::write(&path, "<movie><title>Heat</title><year>1995</year></movie>").unwrap();

        let m = Metadata::from_nfo(&path, 0);
        m.load().await;
        // Accessors must not go back to the file once loaded.
        std::fs::remove_file(&path).unwrap();
        assert_eq!(m.title(), "Heat");
        assert_eq!(m.year(), 1995);

        let missing = Metadata::from_nfo(dir.path().join("gone.nfo"), 0);
        missing.load().await;
        assert_eq!(missing.title(), "");
        Metadata::from_filename("Plain", 0).load().await;
    }

    #[test]
    fn test_missing_nfo_yields_defaults() {
        let m = Metadata::from_nfo("/nonexistent/movie.nfo", 0);
        assert_eq!(m.title(), "");
        assert_eq!(m.year(), 0);
        assert_eq!(m.rating(), 0.0);
        assert!(m.provider_ids().is_empty());
    }
}
