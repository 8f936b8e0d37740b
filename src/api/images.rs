// Item images, resized on demand.
//
// The `tag` parameter can redirect to a remote image or name a local file
// directly; otherwise the image comes from the item's own slots.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::dto::{TAG_FILE, TAG_REDIRECT};
use super::error::{ApiError, ApiResult};
use super::ids::{resolve, Resolved};
use super::Route;
use crate::collection::{Catalog, Item};
use crate::services::imageresize::{image_format, ResizeParams};
use crate::AppState;

/// Thirty days.
const IMAGE_CACHE_CONTROL: &str = "public, max-age=2592000";

pub fn routes() -> Vec<Route> {
    vec![
        ("/Items/:item_id/Images/:image_type", get(get_image)),
        ("/Items/:item_id/Images/:image_type/:index", get(get_image_indexed)),
    ]
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageQuery {
    pub tag: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub fill_width: Option<u32>,
    pub fill_height: Option<u32>,
    pub quality: Option<u8>,
    pub w: Option<u32>,
    pub h: Option<u32>,
    pub q: Option<u8>,
}

impl ImageQuery {
    /// Resize parameters; the short and fill forms stand in for width/height.
    fn params(&self, default_quality: u8) -> ResizeParams {
        ResizeParams {
            width: self.width.or(self.w).or(self.fill_width).unwrap_or(0),
            height: self.height.or(self.h).or(self.fill_height).unwrap_or(0),
            max_width: self.max_width.unwrap_or(0),
            max_height: self.max_height.unwrap_or(0),
            quality: self.quality.or(self.q).unwrap_or(default_quality),
        }
    }
}

fn content_type(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "tbn" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn first<'a>(candidates: &[&'a String]) -> Option<&'a str> {
    candidates
        .iter()
        .find(|s| !s.is_empty())
        .map(|s| s.as_str())
}

/// Image slot of a movie or show for a Jellyfin image type.
fn item_slot<'a>(item: &'a Item, image_type: &str) -> Option<&'a str> {
    let images = &item.images;
    let show = item.as_show();
    match image_type {
        "primary" => first(&[&images.poster, &images.folder]),
        "backdrop" | "thumb" | "art" => first(&[&images.fanart]),
        "banner" => match show {
            Some(s) => first(&[&images.banner, &s.season_all_banner]),
            None => first(&[&images.banner]),
        },
        "logo" => first(&[&images.logo]),
        _ => None,
    }
}

/// Absolute path of the image for an entity, following the fallbacks from
/// episode to season to show.
pub fn image_path(catalog: &Catalog, item_id: &str, image_type: &str) -> Option<PathBuf> {
    let image_type = image_type.to_ascii_lowercase();
    match resolve(catalog, item_id)? {
        Resolved::Collection(c) => {
            if image_type != "primary" {
                return None;
            }
            c.items()
                .iter()
                .find(|i| !i.images.poster.is_empty())
                .map(|i| c.item_dir(i).join(&i.images.poster))
        }
        Resolved::Item(r) => {
            item_slot(&r.item, &image_type).map(|f| r.collection.item_dir(&r.item).join(f))
        }
        Resolved::Season(s) => {
            let season = s.season();
            let show = &s.show;
            let file = match image_type.as_str() {
                "primary" => first(&[
                    &season.images.poster,
                    &season.season_all_poster,
                    &show.images.poster,
                ]),
                "backdrop" | "thumb" => first(&[&season.images.fanart, &show.images.fanart]),
                "banner" => first(&[
                    &season.images.banner,
                    &season.season_all_banner,
                    &show.images.banner,
                ]),
                "logo" => first(&[&show.images.logo]),
                _ => None,
            }?;
            Some(s.collection.item_dir(show).join(file))
        }
        Resolved::Episode(e) => {
            let episode = e.episode();
            let season = e.season();
            let show = &e.show;
            let file = match image_type.as_str() {
                "primary" | "thumb" => first(&[
                    &episode.thumb,
                    &season.images.poster,
                    &show.images.poster,
                ]),
                "backdrop" => first(&[&show.images.fanart]),
                "logo" => first(&[&show.images.logo]),
                _ => None,
            }?;
            Some(e.collection.item_dir(show).join(file))
        }
    }
}

fn redirect(url: &str) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, url.to_string()),
            (header::CACHE_CONTROL, IMAGE_CACHE_CONTROL.to_string()),
        ],
    )
        .into_response()
}

/// A local image named by a `file_` tag. Only image files inside a
/// collection directory are served.
fn tagged_file(catalog: &Catalog, path: &str) -> ApiResult<PathBuf> {
    let path = PathBuf::from(path);
    let inside = catalog
        .collections()
        .iter()
        .any(|c| path.starts_with(&c.directory));
    if !inside || image_format(&path).is_none() || path.components().any(|c| c.as_os_str() == "..") {
        return Err(ApiError::not_found("image"));
    }
    Ok(path)
}

async fn serve_image(state: &AppState, source: &FsPath, q: &ImageQuery) -> ApiResult<Response> {
    let params = q.params(state.config.image_quality_poster);
    let path = state.resizer.resize(source, params).await?;

    let file = File::open(&path).await?;
    let len = file.metadata().await?.len();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(source))
        .header(header::CONTENT_LENGTH, len)
        .header(header::CACHE_CONTROL, IMAGE_CACHE_CONTROL)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn image_response(
    state: &AppState,
    item_id: &str,
    image_type: &str,
    q: &ImageQuery,
) -> ApiResult<Response> {
    if let Some(tag) = q.tag.as_deref() {
        if let Some(url) = tag.strip_prefix(TAG_REDIRECT) {
            return Ok(redirect(url));
        }
        if let Some(path) = tag.strip_prefix(TAG_FILE) {
            let source = tagged_file(&state.catalog, path)?;
            return serve_image(state, &source, q).await;
        }
    }
    let source =
        image_path(&state.catalog, item_id, image_type).ok_or_else(|| ApiError::not_found("image"))?;
    serve_image(state, &source, q).await
}

/// GET /Items/:item_id/Images/:image_type
///
/// No credentials: clients load images like any other URL.
async fn get_image(
    State(state): State<Arc<AppState>>,
    Path((item_id, image_type)): Path<(String, String)>,
    Query(q): Query<ImageQuery>,
) -> ApiResult<Response> {
    image_response(&state, &item_id, &image_type, &q).await
}

/// GET /Items/:item_id/Images/:image_type/:index. Every slot has one image.
async fn get_image_indexed(
    State(state): State<Arc<AppState>>,
    Path((item_id, image_type, _index)): Path<(String, String, String)>,
    Query(q): Query<ImageQuery>,
) -> ApiResult<Response> {
    image_response(&state, &item_id, &image_type, &q).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::tests::{show, shows_config};
    use crate::services::idhash::id_hash;

    #[test]
    fn test_params() {
        let q = ImageQuery {
            w: Some(300),
            h: Some(450),
            q: Some(80),
            ..Default::default()
        };
        let p = q.params(40);
        assert_eq!((p.width, p.height, p.quality), (300, 450, 80));

        let q = ImageQuery {
            max_width: Some(500),
            ..Default::default()
        };
        let p = q.params(40);
        assert_eq!((p.width, p.max_width, p.quality), (0, 500, 40));
    }

    #[test]
    fn test_image_path_fallbacks() {
        let catalog = Catalog::new(&[shows_config("TV")]);
        let mut item = show("Lost", &[(1, 1)]);
        item.images.poster = "poster.jpg".to_string();
        item.images.fanart = "fanart.jpg".to_string();
        catalog.collections()[0].publish(vec![item]);

        let show_id = id_hash("Lost");
        assert_eq!(
            image_path(&catalog, &show_id, "Primary"),
            Some(PathBuf::from("/nonexistent/Lost/poster.jpg"))
        );
        assert_eq!(image_path(&catalog, &show_id, "Logo"), None);

        let season = format!("season_{}", id_hash("Lost-season-1"));
        assert_eq!(
            image_path(&catalog, &season, "primary"),
            Some(PathBuf::from("/nonexistent/Lost/poster.jpg"))
        );
        assert_eq!(
            image_path(&catalog, &season, "Backdrop"),
            Some(PathBuf::from("/nonexistent/Lost/fanart.jpg"))
        );
        assert_eq!(
            image_path(&catalog, "collection_tv", "Primary"),
            Some(PathBuf::from("/nonexistent/Lost/poster.jpg"))
        );
        assert_eq!(image_path(&catalog, "missing", "Primary"), None);
    }

    #[test]
    fn test_tagged_file_must_be_inside_collection() {
        let catalog = Catalog::new(&[shows_config("TV")]);
        assert!(tagged_file(&catalog, "/nonexistent/Lost/.actors/a.jpg").is_ok());
        assert!(tagged_file(&catalog, "/etc/passwd").is_err());
        assert!(tagged_file(&catalog, "/nonexistent/Lost/tvshow.nfo").is_err());
        assert!(tagged_file(&catalog, "/nonexistent/../etc/a.jpg").is_err());
    }
}
