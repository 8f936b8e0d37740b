// User views: the collections shown as library sections on the home screen.

use axum::{extract::State, routing::get, Json};
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::{collection_dto, ItemsResponse};
use super::Route;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Users/:user_id/Views", get(get_user_views)),
        ("/UserViews", get(get_user_views)),
    ]
}

/// GET /Users/:user_id/Views, /UserViews
async fn get_user_views(State(state): State<Arc<AppState>>, auth: AuthUser) -> Json<ItemsResponse> {
    let items: Vec<_> = state
        .catalog
        .collections()
        .iter()
        .map(|c| collection_dto(&state, &auth.user.id, c))
        .collect();
    Json(ItemsResponse {
        total_record_count: items.len(),
        start_index: 0,
        items,
    })
}
