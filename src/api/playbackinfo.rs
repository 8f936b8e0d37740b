// PlaybackInfo endpoint and media source manufacture.
//
// Files are never probed. The streams a client sees are derived from NFO
// stream details or filename heuristics, and every source is direct play.

use axum::{
    extract::{Path, State},
    routing::get,
    Json,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ApiResult};
use super::ids::{resolve, Resolved};
use super::Route;
use crate::collection::{EpisodeRef, Item, Subtitle, Subtitles};
use crate::services::idhash::{id_hash, random_id};
use crate::services::metadata::Metadata;
use crate::AppState;

pub const TICKS_PER_SECOND: i64 = 10_000_000;

pub fn routes() -> Vec<Route> {
    vec![(
        "/Items/:item_id/PlaybackInfo",
        get(get_playback_info).post(get_playback_info),
    )]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackInfoResponse {
    pub media_sources: Vec<MediaSourceInfo>,
    pub play_session_id: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct MediaSourceInfo {
    pub protocol: String,
    pub id: String,
    pub path: String,
    #[serde(rename = "Type")]
    pub source_type: String,
    pub container: String,
    pub size: u64,
    pub name: String,
    pub is_remote: bool,
    pub e_tag: String,
    pub run_time_ticks: i64,
    pub read_at_native_framerate: bool,
    pub ignore_dts: bool,
    pub ignore_index: bool,
    pub gen_pts_input: bool,
    pub supports_transcoding: bool,
    pub supports_direct_stream: bool,
    pub supports_direct_play: bool,
    pub is_infinite_stream: bool,
    pub requires_opening: bool,
    pub requires_closing: bool,
    pub requires_looping: bool,
    pub supports_probing: bool,
    pub video_type: String,
    pub media_streams: Vec<MediaStreamInfo>,
    pub media_attachments: Vec<String>,
    pub formats: Vec<String>,
    pub bitrate: i64,
    pub default_audio_stream_index: i32,
    pub direct_stream_url: String,
    pub has_segments: bool,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct MediaStreamInfo {
    #[serde(rename = "Type")]
    pub stream_type: String,
    pub index: i32,
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_tag: Option<String>,
    pub language: String,
    pub display_title: String,
    pub is_default: bool,
    pub is_forced: bool,
    pub is_external: bool,
    pub is_interlaced: bool,
    pub is_hearing_impaired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_frame_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_frame_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_range_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_layout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_text_subtitle_stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_external_stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A movie or an episode: something with a video file.
#[derive(Debug, Clone)]
pub struct Playable {
    pub api_id: String,
    pub raw_id: String,
    /// Directory the file name and subtitle paths are relative to.
    pub dir: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub subtitles: Subtitles,
    owner: Arc<Item>,
    episode: Option<EpisodeRef>,
}

impl Playable {
    pub fn from_resolved(r: &Resolved) -> Option<Self> {
        match r {
            Resolved::Item(item) => {
                let movie = item.item.as_movie()?;
                Some(Self {
                    api_id: r.api_id(),
                    raw_id: r.raw_id(),
                    dir: item.collection.item_dir(&item.item),
                    file_name: movie.file_name.clone(),
                    file_size: movie.file_size,
                    subtitles: movie.subtitles.clone(),
                    owner: item.item.clone(),
                    episode: None,
                })
            }
            Resolved::Episode(ep) => {
                let episode = ep.episode();
                Some(Self {
                    api_id: r.api_id(),
                    raw_id: r.raw_id(),
                    dir: ep.collection.item_dir(&ep.show),
                    file_name: episode.file_name.clone(),
                    file_size: episode.file_size,
                    subtitles: episode.subtitles.clone(),
                    owner: ep.show.clone(),
                    episode: Some(ep.clone()),
                })
            }
            _ => None,
        }
    }

    /// Episode NFO when there is one, else the movie or show metadata.
    pub fn metadata(&self) -> &Metadata {
        self.episode
            .as_ref()
            .and_then(|e| e.episode().metadata.as_ref())
            .unwrap_or(&self.owner.metadata)
    }

    /// Seconds; an episode without its own runtime uses the show's.
    pub fn duration(&self) -> i64 {
        match self.metadata().duration() {
            0 => self.owner.metadata.duration(),
            d => d,
        }
    }

    pub fn video_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

pub fn video_codec(codec: &str) -> (&'static str, &'static str) {
    let c = codec.to_lowercase();
    if ["x265", "h265", "hevc"].iter().any(|v| c.contains(v)) {
        ("hevc", "hvc1")
    } else {
        ("h264", "avc1")
    }
}

pub fn audio_codec(codec: &str) -> (&'static str, &'static str) {
    match codec.to_lowercase().as_str() {
        "ac3" | "ac-3" => ("ac3", "ac-3"),
        "eac3" | "e-ac-3" => ("eac3", "ec-3"),
        _ => ("aac", "mp4a"),
    }
}

/// Display title and channel layout for a channel count.
pub fn channel_layout(channels: i32) -> (&'static str, &'static str) {
    match channels {
        1 => ("Mono", "mono"),
        3 => ("2.1 Channel", "3.0"),
        4 => ("3.1", "4.0"),
        5 => ("4.1", "5.0"),
        6 => ("5.1", "5.1"),
        _ => ("Stereo", "stereo"),
    }
}

/// Subtitle tracks in stream order: every `.srt`, then `.vtt` files that
/// were not synthesized from one.
pub fn subtitle_tracks(subs: &Subtitles) -> Vec<&Subtitle> {
    let twins: Vec<String> = subs
        .srt
        .iter()
        .filter_map(|s| s.path.rsplit_once('.').map(|(stem, _)| format!("{stem}.vtt")))
        .collect();
    subs.srt
        .iter()
        .chain(subs.vtt.iter().filter(|v| !twins.contains(&v.path)))
        .collect()
}

/// Stream index of the first subtitle track.
pub const FIRST_SUBTITLE_INDEX: i32 = 2;

fn subtitle_language(lang: &str) -> String {
    match lang {
        "" | "zz" => "eng".to_string(),
        l => l.to_string(),
    }
}

pub fn media_source(p: &Playable) -> MediaSourceInfo {
    let md = p.metadata();
    let source_id = id_hash(&p.file_name);
    let mut streams = Vec::new();

    let (vcodec, vtag) = video_codec(md.video_codec());
    let (width, height) = (md.video_width(), md.video_height());
    streams.push(MediaStreamInfo {
        stream_type: "Video".to_string(),
        index: 0,
        codec: vcodec.to_string(),
        codec_tag: Some(vtag.to_string()),
        language: md.audio_language(),
        display_title: if height > 0 {
            format!("{}p {}", height, vcodec.to_uppercase())
        } else {
            vcodec.to_uppercase()
        },
        is_default: true,
        width: (width > 0).then_some(width),
        height: (height > 0).then_some(height),
        bit_rate: (md.video_bitrate() > 0).then_some(md.video_bitrate()),
        aspect_ratio: (width > 0 && height > 0).then(|| format!("{width}:{height}")),
        average_frame_rate: Some(md.video_framerate()),
        real_frame_rate: Some(md.video_framerate()),
        video_range: Some("SDR".to_string()),
        video_range_type: Some("SDR".to_string()),
        ..Default::default()
    });

    let (acodec, atag) = audio_codec(md.audio_codec());
    let channels = match md.audio_channels() {
        0 => 2,
        c => c,
    };
    let (title, layout) = channel_layout(channels);
    streams.push(MediaStreamInfo {
        stream_type: "Audio".to_string(),
        index: 1,
        codec: acodec.to_string(),
        codec_tag: Some(atag.to_string()),
        language: md.audio_language(),
        display_title: format!("{} - {} - {}", md.audio_language(), acodec.to_uppercase(), title),
        is_default: true,
        channels: Some(channels),
        channel_layout: Some(layout.to_string()),
        sample_rate: Some(48000),
        ..Default::default()
    });

    for (i, sub) in subtitle_tracks(&p.subtitles).into_iter().enumerate() {
        let index = FIRST_SUBTITLE_INDEX + i as i32;
        let is_srt = sub.path.to_lowercase().ends_with(".srt");
        let (codec, ext) = if is_srt { ("subrip", "srt") } else { ("webvtt", "vtt") };
        let language = subtitle_language(&sub.lang);
        streams.push(MediaStreamInfo {
            stream_type: "Subtitle".to_string(),
            index,
            codec: codec.to_string(),
            display_title: format!("{} ({})", language, ext.to_uppercase()),
            language,
            is_external: true,
            delivery_method: Some("External".to_string()),
            delivery_url: Some(format!(
                "/Videos/{}/{}/Subtitles/{}/0/Stream.{}",
                p.api_id, source_id, index, ext
            )),
            is_text_subtitle_stream: Some(true),
            supports_external_stream: Some(true),
            path: Some(sub.path.clone()),
            ..Default::default()
        });
    }

    MediaSourceInfo {
        protocol: "File".to_string(),
        id: source_id.clone(),
        path: p.file_name.clone(),
        source_type: "Default".to_string(),
        container: "mp4".to_string(),
        size: p.file_size,
        name: p
            .file_name
            .rsplit('/')
            .next()
            .unwrap_or(&p.file_name)
            .to_string(),
        is_remote: false,
        e_tag: source_id,
        run_time_ticks: p.duration() * TICKS_PER_SECOND,
        read_at_native_framerate: false,
        ignore_dts: false,
        ignore_index: false,
        gen_pts_input: false,
        supports_transcoding: false,
        supports_direct_stream: true,
        supports_direct_play: true,
        is_infinite_stream: false,
        requires_opening: false,
        requires_closing: false,
        requires_looping: false,
        supports_probing: false,
        video_type: "VideoFile".to_string(),
        media_streams: streams,
        media_attachments: Vec::new(),
        formats: Vec::new(),
        bitrate: md.video_bitrate(),
        default_audio_stream_index: 1,
        direct_stream_url: format!("/Videos/{}/stream", p.api_id),
        has_segments: false,
    }
}

/// GET|POST /Items/:item_id/PlaybackInfo
async fn get_playback_info(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<Json<PlaybackInfoResponse>> {
    let resolved = resolve(&state.catalog, &item_id).ok_or_else(|| ApiError::not_found("item"))?;
    let playable = Playable::from_resolved(&resolved)
        .ok_or_else(|| ApiError::BadRequest("item is not playable".to_string()))?;

    Ok(Json(PlaybackInfoResponse {
        media_sources: vec![media_source(&playable)],
        play_session_id: random_id(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_mapping() {
        assert_eq!(video_codec("x264"), ("h264", "avc1"));
        assert_eq!(video_codec("AVC"), ("h264", "avc1"));
        assert_eq!(video_codec("hevc"), ("hevc", "hvc1"));
        assert_eq!(video_codec("x265"), ("hevc", "hvc1"));
        assert_eq!(video_codec("unknown"), ("h264", "avc1"));
        assert_eq!(audio_codec("AC3"), ("ac3", "ac-3"));
        assert_eq!(audio_codec("aac"), ("aac", "mp4a"));
        assert_eq!(audio_codec("unknown"), ("aac", "mp4a"));
    }

    #[test]
    fn test_channel_layout() {
        assert_eq!(channel_layout(1).1, "mono");
        assert_eq!(channel_layout(2).1, "stereo");
        assert_eq!(channel_layout(3), ("2.1 Channel", "3.0"));
        assert_eq!(channel_layout(6), ("5.1", "5.1"));
    }

    #[test]
    fn test_subtitle_tracks() {
        let mut subs = Subtitles::default();
        subs.add("en", "movie.en.srt");
        subs.add("nl", "movie.nl.vtt");
        let tracks: Vec<&str> = subtitle_tracks(&subs).iter().map(|s| s.path.as_str()).collect();
        assert_eq!(tracks, vec!["movie.en.srt", "movie.nl.vtt"]);
    }
}
