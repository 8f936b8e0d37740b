// Media segments (intro/outro markers). None are detected, so every known
// item has an empty list.

use axum::{
    extract::{Path, State},
    routing::get,
    Json,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::ItemsResponse;
use super::error::{ApiError, ApiResult};
use super::ids::resolve;
use super::items::paginate;
use super::Route;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![("/MediaSegments/:item_id", get(get_segments))]
}

/// GET /MediaSegments/:item_id
async fn get_segments(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<Json<ItemsResponse>> {
    resolve(&state.catalog, &item_id).ok_or_else(|| ApiError::not_found("item"))?;
    Ok(Json(paginate(Vec::new(), None, None)))
}
