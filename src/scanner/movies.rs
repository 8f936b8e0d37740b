use anyhow::Result;
use std::path::Path;

use super::{read_listing, resolve_year, split_ext, video_stem, IMAGE_EXTENSIONS};
use crate::collection::item::make_sort_name;
use crate::collection::{Images, Item, ItemKind, Movie, Subtitles};
use crate::services::idhash::id_hash;
use crate::services::metadata::Metadata;

/// Fill an image slot from a file name by its suffix. Existing slots win.
pub(crate) fn assign_image(images: &mut Images, file_name: &str, stem: &str, ext: &str, basename: &str) {
    let lower = stem.to_lowercase();
    let slot = if lower.ends_with("banner") {
        &mut images.banner
    } else if lower.ends_with("fanart") {
        &mut images.fanart
    } else if lower.ends_with("folder") {
        &mut images.folder
    } else if lower.ends_with("poster") {
        &mut images.poster
    } else if lower.ends_with("logo") {
        &mut images.logo
    } else if ext == "tbn" && stem == basename {
        &mut images.poster
    } else {
        return;
    };
    if slot.is_empty() {
        *slot = file_name.to_string();
    }
}

/// Language tag of a subtitle file named `<basename>[.-]<lang>`.
/// `Some("")` when the stem is the basename itself.
pub(crate) fn subtitle_lang<'a>(stem: &'a str, basename: &str) -> Option<&'a str> {
    let rest = stem.strip_prefix(basename)?;
    if rest.is_empty() {
        return Some("");
    }
    let lang = rest.strip_prefix('-').or_else(|| rest.strip_prefix('.'))?;
    (!lang.is_empty()).then_some(lang)
}

/// Scan one movie directory. `None` when it holds no video.
pub async fn scan_movie_dir(dir: &Path, dir_name: &str) -> Result<Option<Item>> {
    let listing = read_listing(dir).await?;

    let Some((video, basename)) = listing
        .files
        .iter()
        .find_map(|f| video_stem(&f.name).map(|stem| (f, stem.to_string())))
    else {
        return Ok(None);
    };

    let mut images = Images::default();
    let mut subtitles = Subtitles::default();
    let mut nfo = None;

    for file in &listing.files {
        let Some((stem, ext)) = split_ext(&file.name) else {
            continue;
        };
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            assign_image(&mut images, &file.name, stem, &ext, &basename);
        } else if ext == "srt" || ext == "vtt" {
            if let Some(lang) = subtitle_lang(stem, &basename) {
                subtitles.add(lang, &file.name);
            }
        } else if ext == "nfo" && stem == basename && nfo.is_none() {
            nfo = Some(dir.join(&file.name));
        }
    }

    let year = resolve_year(dir_name, video.ctime);
    let metadata = match nfo {
        Some(path) => Metadata::from_nfo(path, year),
        None => Metadata::from_filename(&video.name, year),
    };

    tracing::debug!("Found movie '{}' ({})", dir_name, video.name);

    Ok(Some(Item {
        id: id_hash(dir_name),
        name: dir_name.to_string(),
        sort_name: make_sort_name(dir_name),
        path: dir_name.to_string(),
        images,
        metadata,
        first_video: video.ctime,
        last_video: video.ctime,
        kind: ItemKind::Movie(Movie {
            file_name: video.name.clone(),
            file_size: video.size,
            subtitles,
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tests::touch;

    #[test]
    fn test_subtitle_lang() {
        assert_eq!(subtitle_lang("movie", "movie"), Some(""));
        assert_eq!(subtitle_lang("movie-en", "movie"), Some("en"));
        assert_eq!(subtitle_lang("movie.nl", "movie"), Some("nl"));
        assert_eq!(subtitle_lang("movies", "movie"), None);
        assert_eq!(subtitle_lang("other", "movie"), None);
    }

    #[tokio::test]
    async fn test_movie_companions() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Heat (1995)");
        touch(&dir.join("heat.mp4"), "0123456789");
        touch(&dir.join("heat-poster.jpg"), "i");
        touch(&dir.join("fanart.jpg"), "i");
        touch(&dir.join("heat-en.srt"), "1\n");
        touch(&dir.join("heat.vtt"), "WEBVTT\n");
        touch(&dir.join("other.srt"), "1\n");

        let item = scan_movie_dir(&dir, "Heat (1995)").await.unwrap().unwrap();
        assert_eq!(item.images.poster, "heat-poster.jpg");
        assert_eq!(item.images.fanart, "fanart.jpg");
        assert!(item.images.banner.is_empty());
        assert_eq!(item.metadata.year(), 1995);
        assert!(item.metadata.nfo_path().is_none());

        let movie = item.as_movie().unwrap();
        assert_eq!(movie.file_name, "heat.mp4");
        assert_eq!(movie.file_size, 10);
        assert_eq!(movie.subtitles.srt.len(), 1);
        assert_eq!(movie.subtitles.srt[0].lang, "en");
        let vtt: Vec<&str> = movie.subtitles.vtt.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(vtt, vec!["heat-en.vtt", "heat.vtt"]);
    }

    #[tokio::test]
    async fn test_tbn_is_poster() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Alien");
        touch(&dir.join("alien.m4v"), "v");
        touch(&dir.join("alien.tbn"), "i");
        let item = scan_movie_dir(&dir, "Alien").await.unwrap().unwrap();
        assert_eq!(item.images.poster, "alien.tbn");
    }

    #[tokio::test]
    async fn test_no_video() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Nothing");
        touch(&dir.join("poster.jpg"), "i");
        assert!(scan_movie_dir(&dir, "Nothing").await.unwrap().is_none());
    }
}
