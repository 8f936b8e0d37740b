// Playlists: per-user ordered lists of movies and episodes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::ItemsResponse;
use super::error::{ApiError, ApiResult};
use super::ids::resolve;
use super::items::{paginate, playlist_entries, split_list};
use super::Route;
use crate::db::DbError;
use crate::models::Playlist;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Playlists", post(create_playlist)),
        ("/Playlists/:playlist_id", get(get_playlist)),
        (
            "/Playlists/:playlist_id/Items",
            get(get_playlist_items)
                .post(add_playlist_items)
                .delete(remove_playlist_items),
        ),
        (
            "/Playlists/:playlist_id/Items/:item_id/Move/:index",
            post(move_playlist_item),
        ),
    ]
}

/// Body of a create request. Some clients send everything in the query
/// instead.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreatePlaylistRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub ids: Vec<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistQuery {
    pub name: Option<String>,
    pub ids: Option<String>,
    pub entry_ids: Option<String>,
    pub user_id: Option<String>,
    pub start_index: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaylistCreationResult {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaylistDto {
    pub open_access: bool,
    pub shares: Vec<String>,
    pub item_ids: Vec<String>,
}

/// The playlist, if it exists and belongs to the caller.
async fn owned_playlist(state: &AppState, auth: &AuthUser, id: &str) -> ApiResult<Playlist> {
    match state.repo.get_playlist(id).await {
        Ok(p) if p.user_id == auth.user.id => Ok(p),
        Ok(_) | Err(DbError::NotFound) => Err(ApiError::not_found("playlist")),
        Err(e) => Err(e.into()),
    }
}

/// Keep the ids that name a movie or an episode.
fn playable_ids(state: &AppState, ids: Vec<String>) -> Vec<String> {
    ids.into_iter()
        .filter(|id| {
            resolve(&state.catalog, id)
                .is_some_and(|r| super::playbackinfo::Playable::from_resolved(&r).is_some())
        })
        .collect()
}

/// POST /Playlists
async fn create_playlist(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<PlaylistQuery>,
    body: Option<Json<CreatePlaylistRequest>>,
) -> ApiResult<Json<PlaylistCreationResult>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let name = body
        .name
        .or(q.name)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("playlist name is required".to_string()))?;
    if let Some(owner) = body.user_id.or(q.user_id).filter(|u| !u.is_empty()) {
        if owner != auth.user.id {
            return Err(ApiError::BadRequest(
                "cannot create a playlist for another user".to_string(),
            ));
        }
    }
    let mut ids = body.ids;
    ids.extend(split_list(&q.ids));
    let ids = playable_ids(&state, ids);

    let id = state.repo.create_playlist(&auth.user.id, &name, &ids).await?;
    tracing::info!(
        "User {} created playlist '{}' ({}) with {} items",
        auth.user.username,
        name,
        id,
        ids.len()
    );
    Ok(Json(PlaylistCreationResult { id }))
}

/// GET /Playlists/:playlist_id
async fn get_playlist(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(playlist_id): Path<String>,
) -> ApiResult<Json<PlaylistDto>> {
    let playlist = owned_playlist(&state, &auth, &playlist_id).await?;
    Ok(Json(PlaylistDto {
        open_access: false,
        shares: Vec::new(),
        item_ids: playlist.item_ids,
    }))
}

/// GET /Playlists/:playlist_id/Items
async fn get_playlist_items(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(playlist_id): Path<String>,
    Query(q): Query<PlaylistQuery>,
) -> ApiResult<Json<ItemsResponse>> {
    let playlist = owned_playlist(&state, &auth, &playlist_id).await?;
    let entries = playlist_entries(&state, &auth.user.id, &playlist);
    Ok(Json(paginate(entries, q.start_index, q.limit)))
}

/// POST /Playlists/:playlist_id/Items?ids=
async fn add_playlist_items(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(playlist_id): Path<String>,
    Query(q): Query<PlaylistQuery>,
) -> ApiResult<StatusCode> {
    let playlist = owned_playlist(&state, &auth, &playlist_id).await?;
    let ids = playable_ids(&state, split_list(&q.ids));
    state.repo.add_playlist_items(&playlist.id, &ids).await?;
    tracing::debug!("Added {} items to playlist {}", ids.len(), playlist.id);
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /Playlists/:playlist_id/Items?entryIds=
async fn remove_playlist_items(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(playlist_id): Path<String>,
    Query(q): Query<PlaylistQuery>,
) -> ApiResult<StatusCode> {
    let playlist = owned_playlist(&state, &auth, &playlist_id).await?;
    let ids = split_list(&q.entry_ids);
    state.repo.remove_playlist_items(&playlist.id, &ids).await?;
    tracing::debug!("Removed {} items from playlist {}", ids.len(), playlist.id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /Playlists/:playlist_id/Items/:item_id/Move/:index
async fn move_playlist_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((playlist_id, item_id, index)): Path<(String, String, usize)>,
) -> ApiResult<StatusCode> {
    let playlist = owned_playlist(&state, &auth, &playlist_id).await?;
    state
        .repo
        .move_playlist_item(&playlist.id, &item_id, index)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
