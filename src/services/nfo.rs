// Kodi-style NFO sidecar parsing.
//
// NFO files in the wild are rarely valid XML: HTML entities, stray ampersands,
// mismatched closing tags and non-UTF-8 bytes are all common. The parser is
// event based and keeps whatever it managed to read before an error.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Nfo {
    pub title: String,
    pub original_title: String,
    pub sort_title: String,
    pub show_title: String,
    pub plot: String,
    pub outline: String,
    pub tagline: String,
    /// Minutes
    pub runtime: i32,
    pub mpaa: String,
    pub year: i32,
    pub premiered: String,
    pub aired: String,
    pub rating: f32,
    pub votes: i32,
    pub genres: Vec<String>,
    pub studios: Vec<String>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub tags: Vec<String>,
    pub actors: Vec<Actor>,
    pub imdb_id: String,
    pub tmdb_id: String,
    pub season: i32,
    pub episode: i32,
    pub thumb: String,
    pub video: VideoDetails,
    pub audio: AudioDetails,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Actor {
    pub name: String,
    pub role: String,
    pub thumb: String,
    pub order: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoDetails {
    pub codec: String,
    pub width: i32,
    pub height: i32,
    pub bitrate: i64,
    pub framerate: f32,
    pub duration_in_seconds: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioDetails {
    pub codec: String,
    pub language: String,
    pub channels: i32,
}

const MULTI_EPISODE_TAG: &str = "<xbmcmultiepisode>";

/// Parse an NFO document. Never fails; unreadable parts are left empty.
pub fn parse(bytes: &[u8]) -> Nfo {
    let text = String::from_utf8_lossy(bytes);
    let mut body = text.trim_start_matches('\u{feff}').trim_start();

    if let Some(rest) = skip_declaration(body).strip_prefix(MULTI_EPISODE_TAG) {
        tracing::debug!("NFO contains multiple episodes, only the first one is used");
        body = rest;
    }

    let mut parser = Parser::default();
    parser.run(body);

    let mut nfo = parser.nfo;
    nfo.genres = normalize_genres(&nfo.genres);
    nfo
}

fn skip_declaration(s: &str) -> &str {
    let mut s = s;
    while s.starts_with("<?") || s.starts_with("<!--") {
        let end = if s.starts_with("<?") { "?>" } else { "-->" };
        match s.find(end) {
            Some(pos) => s = s[pos + end.len()..].trim_start(),
            None => return s,
        }
    }
    s
}

#[derive(Default)]
struct Parser {
    nfo: Nfo,
    /// Open elements, lowercased, with their attributes.
    stack: Vec<(String, Vec<(String, String)>)>,
    text: String,
    actor: Option<Actor>,
    have_default_rating: bool,
}

impl Parser {
    fn run(&mut self, body: &str) {
        let mut reader = Reader::from_str(body);
        reader.trim_text(true);
        reader.check_end_names(false);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => self.open(&e),
                Ok(Event::Text(e)) => {
                    let t = match e.unescape_with(html_entity) {
                        Ok(t) => t.into_owned(),
                        Err(_) => String::from_utf8_lossy(&e).into_owned(),
                    };
                    self.text.push_str(&t);
                }
                Ok(Event::CData(e)) => {
                    self.text.push_str(&String::from_utf8_lossy(&e));
                }
                Ok(Event::End(_)) => {
                    if self.close() {
                        break;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    tracing::debug!(
                        "NFO parse stopped at byte {}: {}",
                        reader.buffer_position(),
                        e
                    );
                    break;
                }
                _ => {}
            }
        }
    }

    fn open(&mut self, e: &BytesStart<'_>) {
        let name = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
        let attrs = e
            .attributes()
            .flatten()
            .map(|a| {
                (
                    String::from_utf8_lossy(a.key.as_ref()).to_lowercase(),
                    String::from_utf8_lossy(&a.value).into_owned(),
                )
            })
            .collect();
        if self.stack.len() == 1 && name == "actor" {
            self.actor = Some(Actor::default());
        }
        self.stack.push((name, attrs));
        self.text.clear();
    }

    /// Returns true once the root element has been closed.
    fn close(&mut self) -> bool {
        if self.stack.is_empty() {
            return true;
        }
        let text = std::mem::take(&mut self.text).trim().to_string();
        let names: Vec<String> = self.stack[1..].iter().map(|(n, _)| n.clone()).collect();
        let attrs = self
            .stack
            .last()
            .map(|(_, a)| a.clone())
            .unwrap_or_default();
        let parent_attrs = if self.stack.len() >= 2 {
            self.stack[self.stack.len() - 2].1.clone()
        } else {
            Vec::new()
        };

        let path: Vec<&str> = names.iter().map(String::as_str).collect();
        self.assign(&path, text, &attrs, &parent_attrs);

        self.stack.pop();
        self.stack.is_empty()
    }

    fn assign(
        &mut self,
        path: &[&str],
        text: String,
        attrs: &[(String, String)],
        parent_attrs: &[(String, String)],
    ) {
        let nfo = &mut self.nfo;
        match path {
            ["title"] => nfo.title = text,
            ["originaltitle"] => nfo.original_title = text,
            ["sorttitle"] => nfo.sort_title = text,
            ["showtitle"] => nfo.show_title = text,
            ["plot"] => nfo.plot = text,
            ["outline"] => nfo.outline = text,
            ["tagline"] => nfo.tagline = text,
            ["runtime"] => nfo.runtime = parse_int(&text) as i32,
            ["mpaa"] => nfo.mpaa = text,
            ["year"] => nfo.year = parse_int(&text) as i32,
            ["premiered"] => nfo.premiered = text,
            ["aired"] => nfo.aired = text,
            ["season"] => nfo.season = parse_int(&text) as i32,
            ["episode"] => nfo.episode = parse_int(&text) as i32,
            ["genre"] => push_nonempty(&mut nfo.genres, text),
            ["studio"] => push_nonempty(&mut nfo.studios, text),
            ["director"] => push_nonempty(&mut nfo.directors, text),
            ["credits"] | ["writer"] => push_nonempty(&mut nfo.writers, text),
            ["tag"] => push_nonempty(&mut nfo.tags, text),
            ["thumb"] if nfo.thumb.is_empty() => nfo.thumb = text,
            ["rating"] => {
                if !self.have_default_rating {
                    nfo.rating = parse_float(&text);
                }
            }
            ["votes"] => {
                if !self.have_default_rating {
                    nfo.votes = parse_int(&text) as i32;
                }
            }
            ["ratings", "rating", "value"] => {
                let is_default = attr(parent_attrs, "default") == Some("true");
                if is_default || nfo.rating == 0.0 {
                    nfo.rating = parse_float(&text);
                    self.have_default_rating |= is_default;
                }
            }
            ["ratings", "rating", "votes"] => {
                let is_default = attr(parent_attrs, "default") == Some("true");
                if is_default || nfo.votes == 0 {
                    nfo.votes = parse_int(&text) as i32;
                }
            }
            ["uniqueid"] => match attr(attrs, "type").map(str::to_lowercase).as_deref() {
                Some("imdb") => nfo.imdb_id = text,
                Some("tmdb") => nfo.tmdb_id = text,
                _ if text.starts_with("tt") => nfo.imdb_id = text,
                _ => {}
            },
            ["id"] | ["imdbid"] if text.starts_with("tt") && nfo.imdb_id.is_empty() => {
                nfo.imdb_id = text
            }
            ["tmdbid"] if nfo.tmdb_id.is_empty() => nfo.tmdb_id = text,
            ["actor", field] => {
                if let Some(actor) = self.actor.as_mut() {
                    match *field {
                        "name" => actor.name = text,
                        "role" => actor.role = text,
                        "thumb" => actor.thumb = text,
                        "order" => actor.order = parse_int(&text) as i32,
                        _ => {}
                    }
                }
            }
            ["actor"] => {
                if let Some(actor) = self.actor.take() {
                    if !actor.name.is_empty() {
                        nfo.actors.push(actor);
                    }
                }
            }
            ["fileinfo", "streamdetails", "video", field] => {
                let video = &mut nfo.video;
                match *field {
                    "codec" => video.codec = text.to_lowercase(),
                    "width" => video.width = parse_int(&text) as i32,
                    "height" => video.height = parse_int(&text) as i32,
                    "bitrate" => video.bitrate = parse_int(&text),
                    "framerate" => video.framerate = parse_float(&text),
                    "durationinseconds" => video.duration_in_seconds = parse_int(&text),
                    _ => {}
                }
            }
            // Only the first audio stream is kept.
            ["fileinfo", "streamdetails", "audio", field] => {
                let audio = &mut nfo.audio;
                match *field {
                    "codec" if audio.codec.is_empty() => audio.codec = text.to_lowercase(),
                    "language" if audio.language.is_empty() => audio.language = text,
                    "channels" if audio.channels == 0 => audio.channels = parse_int(&text) as i32,
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn push_nonempty(list: &mut Vec<String>, value: String) {
    if !value.is_empty() {
        list.push(value);
    }
}

fn parse_int(s: &str) -> i64 {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        .unwrap_or(0)
}

fn parse_float(s: &str) -> f32 {
    s.trim().replace(',', ".").parse::<f32>().unwrap_or(0.0)
}

/// HTML entities that show up in scraped NFO files. XML's five predefined
/// entities and numeric references are handled by the reader itself.
fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{a0}",
        "copy" => "©",
        "reg" => "®",
        "trade" => "™",
        "hellip" => "…",
        "mdash" => "—",
        "ndash" => "–",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "laquo" => "«",
        "raquo" => "»",
        "eacute" => "é",
        "egrave" => "è",
        "ecirc" => "ê",
        "aacute" => "á",
        "agrave" => "à",
        "acirc" => "â",
        "iacute" => "í",
        "oacute" => "ó",
        "uacute" => "ú",
        "auml" => "ä",
        "ouml" => "ö",
        "uuml" => "ü",
        "Auml" => "Ä",
        "Ouml" => "Ö",
        "Uuml" => "Ü",
        "szlig" => "ß",
        "ccedil" => "ç",
        "ntilde" => "ñ",
        _ => return None,
    })
}

// Genre vocabulary

/// Canonical spelling for genre names seen in scraper output, keyed by lowercase.
const GENRE_ALIASES: &[(&str, &str)] = &[
    ("action", "Action"),
    ("action & adventure", "Action & Adventure"),
    ("adventure", "Adventure"),
    ("animation", "Animation"),
    ("anime", "Anime"),
    ("biography", "Biography"),
    ("children", "Kids"),
    ("comedy", "Comedy"),
    ("crime", "Crime"),
    ("documentary", "Documentary"),
    ("docu", "Documentary"),
    ("drama", "Drama"),
    ("family", "Family"),
    ("fantasy", "Fantasy"),
    ("film-noir", "Film-Noir"),
    ("film noir", "Film-Noir"),
    ("history", "History"),
    ("horror", "Horror"),
    ("kids", "Kids"),
    ("music", "Music"),
    ("musical", "Musical"),
    ("mystery", "Mystery"),
    ("news", "News"),
    ("reality", "Reality"),
    ("reality-tv", "Reality"),
    ("romance", "Romance"),
    ("sci-fi", "Sci-Fi"),
    ("sci-fi & fantasy", "Sci-Fi"),
    ("science fiction", "Sci-Fi"),
    ("science-fiction", "Sci-Fi"),
    ("scifi", "Sci-Fi"),
    ("soap", "Soap"),
    ("sport", "Sport"),
    ("sports", "Sport"),
    ("suspense", "Thriller"),
    ("talk", "Talk Show"),
    ("talk-show", "Talk Show"),
    ("thriller", "Thriller"),
    ("tv movie", "TV Movie"),
    ("war", "War"),
    ("war & politics", "War"),
    ("western", "Western"),
];

/// Canonical form of a single genre name.
pub fn normalize_genre(genre: &str) -> String {
    let trimmed = genre.trim();
    let lower = trimmed.to_lowercase();
    if let Some((_, canonical)) = GENRE_ALIASES.iter().find(|(alias, _)| *alias == lower) {
        return canonical.to_string();
    }
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split compound genre strings on `/` then `,`, canonicalize, drop
/// single-character leftovers and duplicates while keeping first-seen order.
pub fn normalize_genres(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for entry in raw {
        for part in entry.split('/').flat_map(|p| p.split(',')) {
            let genre = normalize_genre(part);
            if genre.chars().count() > 1 && !out.contains(&genre) {
                out.push(genre);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Canonical serialization of the parsed form, used to check that
    /// parsing is idempotent.
    fn to_xml(nfo: &Nfo) -> String {
        fn esc(s: &str) -> String {
            s.replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
        }
        let mut x = String::from("<movie>\n");
        let mut field = |tag: &str, value: String| {
            if !value.is_empty() && value != "0" {
                x.push_str(&format!("<{tag}>{}</{tag}>\n", esc(&value)));
            }
        };
        field("title", nfo.title.clone());
        field("plot", nfo.plot.clone());
        field("tagline", nfo.tagline.clone());
        field("runtime", nfo.runtime.to_string());
        field("mpaa", nfo.mpaa.clone());
        field("year", nfo.year.to_string());
        field("premiered", nfo.premiered.clone());
        field("rating", nfo.rating.to_string());
        field("votes", nfo.votes.to_string());
        for g in &nfo.genres {
            field("genre", g.clone());
        }
        for s in &nfo.studios {
            field("studio", s.clone());
        }
        x.push_str("</movie>\n");
        x
    }

    #[test]
    fn test_parse_basic_movie() {
        let nfo = parse(
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes" ?>
<movie>
  <title>Casablanca</title>
  <year>1942</year>
  <runtime>102</runtime>
  <genre>Drama</genre>
  <genre>Romance / War</genre>
  <mpaa>Rated PG</mpaa>
  <uniqueid type="imdb" default="true">tt0034583</uniqueid>
  <uniqueid type="tmdb">289</uniqueid>
  <actor><name>Humphrey Bogart</name><role>Rick Blaine</role><order>0</order></actor>
  <actor><name>Ingrid Bergman</name><role>Ilsa Lund</role><order>1</order></actor>
</movie>"#,
        );
        assert_eq!(nfo.title, "Casablanca");
        assert_eq!(nfo.year, 1942);
        assert_eq!(nfo.runtime, 102);
        assert_eq!(nfo.genres, vec!["Drama", "Romance", "War"]);
        assert_eq!(nfo.imdb_id, "tt0034583");
        assert_eq!(nfo.tmdb_id, "289");
        assert_eq!(nfo.actors.len(), 2);
        assert_eq!(nfo.actors[1].role, "Ilsa Lund");
    }

    #[test]
    fn test_html_entities_and_bad_numbers() {
        let nfo = parse(
            b"<movie><title>Caf&eacute; &amp; Bar&nbsp;</title><year>19x2</year><rating>abc</rating></movie>",
        );
        assert_eq!(nfo.title, "Café & Bar");
        assert_eq!(nfo.year, 0);
        assert_eq!(nfo.rating, 0.0);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut doc = b"<movie><title>Bad ".to_vec();
        doc.push(0xff);
        doc.extend_from_slice(b"Byte</title></movie>");
        let nfo = parse(&doc);
        assert_eq!(nfo.title, "Bad \u{fffd}Byte");
    }

    #[test]
    fn test_mismatched_close_tag_does_not_abort() {
        let nfo = parse(b"<movie><title>One</Title><plot>Two</plot></movie>");
        assert_eq!(nfo.title, "One");
        assert_eq!(nfo.plot, "Two");
    }

    #[test]
    fn test_multi_episode_keeps_first() {
        let nfo = parse(
            b"<xbmcmultiepisode><episodedetails><title>First</title><episode>1</episode></episodedetails>\
              <episodedetails><title>Second</title><episode>2</episode></episodedetails></xbmcmultiepisode>",
        );
        assert_eq!(nfo.title, "First");
        assert_eq!(nfo.episode, 1);
    }

    #[test]
    fn test_ratings_block_prefers_default() {
        let nfo = parse(
            br#"<movie><ratings>
                <rating name="tmdb"><value>6.1</value><votes>10</votes></rating>
                <rating name="imdb" default="true"><value>7.46</value><votes>1200</votes></rating>
            </ratings></movie>"#,
        );
        assert_eq!(nfo.rating, 7.46);
        assert_eq!(nfo.votes, 1200);
    }

    #[test]
    fn test_stream_details() {
        let nfo = parse(
            b"<movie><fileinfo><streamdetails>\
              <video><codec>HEVC</codec><width>3840</width><height>2160</height><durationinseconds>5400</durationinseconds></video>\
              <audio><codec>AC3</codec><language>english</language><channels>6</channels></audio>\
              <audio><codec>aac</codec><language>fre</language><channels>2</channels></audio>\
              </streamdetails></fileinfo></movie>",
        );
        assert_eq!(nfo.video.codec, "hevc");
        assert_eq!(nfo.video.width, 3840);
        assert_eq!(nfo.video.duration_in_seconds, 5400);
        assert_eq!(nfo.audio.codec, "ac3");
        assert_eq!(nfo.audio.language, "english");
        assert_eq!(nfo.audio.channels, 6);
    }

    #[test]
    fn test_empty_and_garbage_input() {
        assert_eq!(parse(b""), Nfo::default());
        assert_eq!(parse(b"not xml at all"), Nfo::default());
    }

    #[test]
    fn test_normalize_genres() {
        let raw = vec![
            "sci-fi / Science Fiction".to_string(),
            "drama, thriller,".to_string(),
            "X".to_string(),
            "Drama".to_string(),
        ];
        assert_eq!(
            normalize_genres(&raw),
            vec!["Sci-Fi", "Drama", "Thriller"]
        );
        assert_eq!(normalize_genre("  war & politics "), "War");
        assert_eq!(normalize_genre("martial arts"), "Martial arts");
    }

    #[test]
    fn test_parse_serialize_parse_is_idempotent() {
        let first = parse(
            br#"<movie><title>M &amp; M</title><year>2001</year><rating>6.5</rating><votes>42</votes>
                <genre>scifi/Drama</genre><genre>drama</genre><studio>Acme</studio>
                <premiered>2001-05-04</premiered></movie>"#,
        );
        let second = parse(to_xml(&first).as_bytes());
        assert_eq!(first, second);
        let third = parse(to_xml(&second).as_bytes());
        assert_eq!(second, third);
    }
}
