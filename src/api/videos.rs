use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::get,
};
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::auth::AuthUser;
use super::error::{ApiError, ApiResult};
use super::ids::resolve;
use super::playbackinfo::Playable;
use super::Route;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    // `stream`, `stream.mp4`, `original.mkv`, ...
    vec![("/Videos/:item_id/:source", get(stream_video))]
}

/// Get the MIME type for a video file based on extension
fn content_type(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "ts" | "m2ts" | "mts" => "video/mp2t",
        "mpg" | "mpeg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}

/// Parse a single `bytes=` range ("0-1023", "1024-" or "-500").
/// Returns inclusive bounds clamped to the file.
pub fn parse_range_header(range_header: Option<&HeaderValue>, file_size: u64) -> Option<(u64, u64)> {
    let range = range_header?.to_str().ok()?.strip_prefix("bytes=")?;
    let (first, last) = range.trim().split_once('-')?;
    if file_size == 0 {
        return None;
    }

    let start: u64 = if first.is_empty() {
        // Suffix range: "-500" means the last 500 bytes
        let suffix_len: u64 = last.parse().ok()?;
        file_size.saturating_sub(suffix_len)
    } else {
        first.parse().ok()?
    };
    let end: u64 = if last.is_empty() || first.is_empty() {
        file_size - 1
    } else {
        last.parse().ok()?
    };

    if start > end || start >= file_size {
        return None;
    }
    Some((start, end.min(file_size - 1)))
}

/// GET /Videos/:item_id/stream
///
/// Direct play only: the file is served as is, with range support.
async fn stream_video(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    headers: HeaderMap,
    Path((item_id, source)): Path<(String, String)>,
) -> ApiResult<Response> {
    let source = source.to_ascii_lowercase();
    if !(source.starts_with("stream") || source.starts_with("original")) {
        return Err(ApiError::not_found("stream"));
    }
    let resolved = resolve(&state.catalog, &item_id).ok_or_else(|| ApiError::not_found("item"))?;
    let playable = Playable::from_resolved(&resolved)
        .ok_or_else(|| ApiError::BadRequest("item is not playable".to_string()))?;
    let path = playable.video_path();

    let mut file = File::open(&path).await?;
    let file_size = file.metadata().await?.len();
    let content_type = content_type(&path);

    let response = match parse_range_header(headers.get(header::RANGE), file_size) {
        Some((start, end)) => {
            let length = end - start + 1;
            tracing::debug!(
                "Serving range {}-{}/{} of {}",
                start,
                end,
                file_size,
                path.display()
            );
            file.seek(std::io::SeekFrom::Start(start)).await?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, length)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, file_size),
                )
                .header(header::ACCEPT_RANGES, "bytes")
                .body(body)
        }
        None => {
            tracing::debug!("Serving {} ({} bytes)", path.display(), file_size);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, file_size)
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::from_stream(ReaderStream::new(file)))
        }
    };
    response.map_err(|e| ApiError::Internal(e.to_string()))
}
