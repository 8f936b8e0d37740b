// Favorite flag of an item, per user.

use axum::{
    extract::{Path, State},
    routing::post,
    Json,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::{resolved_dto, UserItemDataDto};
use super::error::{ApiError, ApiResult};
use super::ids::resolve;
use super::Route;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![
        (
            "/Users/:user_id/FavoriteItems/:item_id",
            post(add_favorite_for_user).delete(remove_favorite_for_user),
        ),
        (
            "/UserFavoriteItems/:item_id",
            post(add_favorite).delete(remove_favorite),
        ),
    ]
}

fn set_favorite(
    state: &AppState,
    user_id: &str,
    item_id: &str,
    favorite: bool,
) -> ApiResult<UserItemDataDto> {
    let resolved = resolve(&state.catalog, item_id).ok_or_else(|| ApiError::not_found("item"))?;
    state
        .repo
        .modify_user_data(user_id, &resolved.raw_id(), |d| d.favorite = favorite);
    tracing::debug!("User {} set favorite={} on {}", user_id, favorite, item_id);

    resolved_dto(state, user_id, &resolved)
        .user_data
        .ok_or_else(|| ApiError::Internal("missing user data".to_string()))
}

/// POST /UserFavoriteItems/:item_id
async fn add_favorite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<Json<UserItemDataDto>> {
    Ok(Json(set_favorite(&state, &auth.user.id, &item_id, true)?))
}

/// DELETE /UserFavoriteItems/:item_id
async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<Json<UserItemDataDto>> {
    Ok(Json(set_favorite(&state, &auth.user.id, &item_id, false)?))
}

/// POST /Users/:user_id/FavoriteItems/:item_id
async fn add_favorite_for_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((_user_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<UserItemDataDto>> {
    Ok(Json(set_favorite(&state, &auth.user.id, &item_id, true)?))
}

/// DELETE /Users/:user_id/FavoriteItems/:item_id
async fn remove_favorite_for_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((_user_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<UserItemDataDto>> {
    Ok(Json(set_favorite(&state, &auth.user.id, &item_id, false)?))
}
