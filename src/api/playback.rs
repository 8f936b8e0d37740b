// Playback reporting and played state.
//
// Progress is kept per user and item in the state store cache; the flusher
// persists it in the background.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::post,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::{resolved_dto, UserItemDataDto};
use super::error::{ApiError, ApiResult};
use super::ids::{resolve, Resolved};
use super::playbackinfo::{Playable, TICKS_PER_SECOND};
use super::Route;
use crate::collection::Episode;
use crate::db::Repository;
use crate::models::UserData;
use crate::AppState;

/// Share of the runtime after which an item counts as watched.
const WATCHED_PERCENTAGE: i64 = 98;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Sessions/Playing", post(on_playback_start)),
        ("/Sessions/Playing/Progress", post(on_playback_progress)),
        ("/Sessions/Playing/Stopped", post(on_playback_stopped)),
        ("/Sessions/Playing/Ping", post(ping)),
        (
            "/Users/:user_id/PlayedItems/:item_id",
            post(mark_played_for_user).delete(mark_unplayed_for_user),
        ),
        (
            "/UserPlayedItems/:item_id",
            post(mark_played).delete(mark_unplayed),
        ),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackReport {
    pub item_id: String,
    #[serde(default)]
    pub position_ticks: Option<i64>,
    #[serde(default)]
    pub media_source_id: Option<String>,
    #[serde(default)]
    pub play_session_id: Option<String>,
    #[serde(default)]
    pub is_paused: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub mark_as_watched: Option<String>,
}

/// Store a playback position. Positions past the watched threshold, or an
/// explicit request, mark the item played and reset the position.
pub fn record_position(
    repo: &Repository,
    user_id: &str,
    item_id: &str,
    duration_secs: i64,
    position_ticks: i64,
    mark_as_watched: bool,
) -> UserData {
    let position = (position_ticks / TICKS_PER_SECOND).max(0);
    let percentage = if duration_secs > 0 {
        (position * 100 / duration_secs).clamp(0, 100)
    } else {
        0
    };

    repo.modify_user_data(user_id, item_id, |d| {
        if mark_as_watched || percentage >= WATCHED_PERCENTAGE {
            d.position = 0;
            d.played_percentage = 0;
            d.played = true;
        } else {
            d.position = position;
            d.played_percentage = percentage as i32;
            d.played = false;
        }
    })
}

async fn report(
    state: &AppState,
    auth: &AuthUser,
    info: &PlaybackReport,
    mark_as_watched: bool,
    event: &str,
) -> ApiResult<StatusCode> {
    let resolved =
        resolve(&state.catalog, &info.item_id).ok_or_else(|| ApiError::not_found("item"))?;
    let playable = Playable::from_resolved(&resolved)
        .ok_or_else(|| ApiError::BadRequest("item is not playable".to_string()))?;

    let ticks = info.position_ticks.unwrap_or(0);
    let data = record_position(
        &state.repo,
        &auth.user.id,
        &playable.raw_id,
        playable.duration(),
        ticks,
        mark_as_watched,
    );
    tracing::debug!(
        "Playback {}: user={} item={} position={}s played={}",
        event,
        auth.user.username,
        playable.raw_id,
        data.position,
        data.played
    );
    Ok(StatusCode::NO_CONTENT)
}

fn flag(q: &ReportQuery) -> bool {
    super::items::parse_flag(&q.mark_as_watched).unwrap_or(false)
}

/// POST /Sessions/Playing
async fn on_playback_start(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<ReportQuery>,
    Json(info): Json<PlaybackReport>,
) -> ApiResult<StatusCode> {
    report(&state, &auth, &info, flag(&q), "start").await
}

/// POST /Sessions/Playing/Progress
async fn on_playback_progress(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<ReportQuery>,
    Json(info): Json<PlaybackReport>,
) -> ApiResult<StatusCode> {
    report(&state, &auth, &info, flag(&q), "progress").await
}

/// POST /Sessions/Playing/Stopped
async fn on_playback_stopped(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<ReportQuery>,
    Json(info): Json<PlaybackReport>,
) -> ApiResult<StatusCode> {
    report(&state, &auth, &info, flag(&q), "stopped").await
}

async fn ping(_auth: AuthUser) -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Episodes a played-state change applies to when the target is a folder.
fn episodes_of(r: &Resolved) -> Vec<&Episode> {
    match r {
        Resolved::Item(i) => i.item.episodes().collect(),
        Resolved::Season(s) => s.season().episodes.iter().collect(),
        _ => Vec::new(),
    }
}

fn set_played(
    state: &AppState,
    user_id: &str,
    item_id: &str,
    played: bool,
) -> ApiResult<UserItemDataDto> {
    let resolved = resolve(&state.catalog, item_id).ok_or_else(|| ApiError::not_found("item"))?;
    let apply = |d: &mut UserData| {
        d.played = played;
        d.position = 0;
        d.played_percentage = 0;
    };

    match &resolved {
        Resolved::Collection(_) => {
            return Err(ApiError::BadRequest("cannot mark a collection".to_string()))
        }
        Resolved::Episode(_) => {
            state.repo.modify_user_data(user_id, &resolved.raw_id(), apply);
        }
        Resolved::Item(i) if i.item.is_movie() => {
            state.repo.modify_user_data(user_id, &resolved.raw_id(), apply);
        }
        _ => {
            for ep in episodes_of(&resolved) {
                state.repo.modify_user_data(user_id, &ep.id, apply);
            }
        }
    }
    tracing::debug!("User {} marked {} played={}", user_id, item_id, played);

    resolved_dto(state, user_id, &resolved)
        .user_data
        .ok_or_else(|| ApiError::Internal("missing user data".to_string()))
}

/// POST /UserPlayedItems/:item_id
async fn mark_played(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<Json<UserItemDataDto>> {
    Ok(Json(set_played(&state, &auth.user.id, &item_id, true)?))
}

/// DELETE /UserPlayedItems/:item_id
async fn mark_unplayed(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<Json<UserItemDataDto>> {
    Ok(Json(set_played(&state, &auth.user.id, &item_id, false)?))
}

/// POST /Users/:user_id/PlayedItems/:item_id
async fn mark_played_for_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((_user_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<UserItemDataDto>> {
    Ok(Json(set_played(&state, &auth.user.id, &item_id, true)?))
}

/// DELETE /Users/:user_id/PlayedItems/:item_id
async fn mark_unplayed_for_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((_user_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<UserItemDataDto>> {
    Ok(Json(set_played(&state, &auth.user.id, &item_id, false)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::open_temp;

    #[tokio::test]
    async fn test_record_position_in_progress() {
        let (_dir, repo) = open_temp().await;
        let d = record_position(&repo, "u", "i", 1000, 6_000_000_000, false);
        assert_eq!(d.position, 600);
        assert_eq!(d.played_percentage, 60);
        assert!(!d.played);
        assert_eq!(repo.get_user_data("u", "i").unwrap().position, 600);
    }

    #[tokio::test]
    async fn test_record_position_watched_threshold() {
        let (_dir, repo) = open_temp().await;
        // 98 seconds of 100 is exactly the threshold.
        let d = record_position(&repo, "u", "i", 100, 98 * TICKS_PER_SECOND, false);
        assert!(d.played);
        assert_eq!(d.position, 0);
        assert_eq!(d.played_percentage, 0);

        let d = record_position(&repo, "u", "j", 100, 97 * TICKS_PER_SECOND, false);
        assert!(!d.played);
        assert_eq!(d.played_percentage, 97);
    }

    #[tokio::test]
    async fn test_record_position_mark_as_watched() {
        let (_dir, repo) = open_temp().await;
        let d = record_position(&repo, "u", "i", 0, 10 * TICKS_PER_SECOND, true);
        assert!(d.played);
        assert_eq!(d.position, 0);
    }

    #[tokio::test]
    async fn test_record_position_keeps_favorite() {
        let (_dir, repo) = open_temp().await;
        repo.modify_user_data("u", "i", |d| d.favorite = true);
        let d = record_position(&repo, "u", "i", 0, 50 * TICKS_PER_SECOND, false);
        assert!(d.favorite);
        assert_eq!(d.position, 50);
        assert_eq!(d.played_percentage, 0);
    }
}
