// External subtitle files of movies and episodes.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ApiResult};
use super::ids::resolve;
use super::playbackinfo::{subtitle_tracks, Playable, FIRST_SUBTITLE_INDEX};
use super::Route;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    // Same parameter names as the stream route; the router needs them to agree.
    vec![(
        "/Videos/:item_id/:source/Subtitles/:index/:start/:file",
        get(get_subtitle),
    )]
}

fn subtitle_content_type(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "vtt" | "webvtt" => "text/vtt; charset=utf-8",
        "srt" | "subrip" => "application/x-subrip; charset=utf-8",
        _ => "text/plain; charset=utf-8",
    }
}

fn extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Convert SubRip to WebVTT: a header line and `.` as the millisecond
/// separator in cue timings. Cue numbers are valid cue identifiers.
pub fn srt_to_vtt(srt: &str) -> String {
    let srt = srt.trim_start_matches('\u{feff}');
    let mut out = String::with_capacity(srt.len() + 8);
    out.push_str("WEBVTT\n\n");
    for line in srt.lines() {
        if line.contains("-->") {
            out.push_str(&line.replace(',', "."));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// GET /Videos/:item_id/:source/Subtitles/:index/:start/Stream.vtt
async fn get_subtitle(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path((item_id, _source, index, _start, file)): Path<(String, String, String, String, String)>,
) -> ApiResult<Response> {
    let resolved = resolve(&state.catalog, &item_id).ok_or_else(|| ApiError::not_found("item"))?;
    let playable = Playable::from_resolved(&resolved)
        .ok_or_else(|| ApiError::BadRequest("item has no subtitles".to_string()))?;

    let index: i32 = index
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("bad subtitle index {index}")))?;
    let track = usize::try_from(index - FIRST_SUBTITLE_INDEX)
        .ok()
        .and_then(|i| subtitle_tracks(&playable.subtitles).get(i).copied().cloned())
        .ok_or_else(|| ApiError::not_found("subtitle"))?;

    let path = playable.dir.join(&track.path);
    let source_format = extension(&track.path);
    let wanted = match extension(&file) {
        e if e.is_empty() => source_format.clone(),
        e => e,
    };

    let data = tokio::fs::read(&path).await?;
    let (body, format) = if wanted == "vtt" && source_format == "srt" {
        tracing::debug!("Converting {} to WebVTT", path.display());
        let text = String::from_utf8_lossy(&data);
        (srt_to_vtt(&text).into_bytes(), "vtt")
    } else {
        (data, source_format.as_str())
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, subtitle_content_type(format))
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CACHE_CONTROL, "max-age=31536000")
        .body(Body::from(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srt_to_vtt() {
        let srt = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,500\r\nHello, world\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\nBye\r\n";
        let vtt = srt_to_vtt(srt);
        assert!(vtt.starts_with("WEBVTT\n\n1\n"));
        assert!(vtt.contains("00:00:01.000 --> 00:00:02.500\n"));
        // Commas in cue text are left alone.
        assert!(vtt.contains("Hello, world\n"));
        assert!(!vtt.contains('\r'));
    }

    #[test]
    fn test_content_type_and_extension() {
        assert_eq!(extension("Stream.VTT"), "vtt");
        assert_eq!(extension("Stream"), "");
        assert_eq!(subtitle_content_type("vtt"), "text/vtt; charset=utf-8");
        assert_eq!(
            subtitle_content_type("srt"),
            "application/x-subrip; charset=utf-8"
        );
    }
}
