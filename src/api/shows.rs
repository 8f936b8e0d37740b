// Shows endpoints: seasons and episodes of a show, and next up.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::{episode_dto, season_dto, ItemsResponse};
use super::error::{ApiError, ApiResult};
use super::ids::{resolve, Resolved};
use super::items::{finish_listing, paginate, ItemsQuery};
use super::Route;
use crate::collection::{EpisodeRef, ItemRef};
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Shows/NextUp", get(get_next_up)),
        ("/Shows/:item_id/Seasons", get(get_seasons)),
        ("/Shows/:item_id/Episodes", get(get_episodes)),
    ]
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextUpQuery {
    pub series_id: Option<String>,
    pub parent_id: Option<String>,
    pub start_index: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodesQuery {
    pub season_id: Option<String>,
    pub season: Option<i32>,
    pub start_item_id: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub start_index: Option<usize>,
    pub limit: Option<usize>,
}

fn show_ref(state: &AppState, id: &str) -> ApiResult<ItemRef> {
    match resolve(&state.catalog, id) {
        Some(Resolved::Item(r)) if !r.item.is_movie() => Ok(r),
        Some(Resolved::Season(s)) => Ok(ItemRef {
            collection: s.collection.clone(),
            item: s.show.clone(),
        }),
        Some(_) => Err(ApiError::BadRequest(format!("{id} is not a show"))),
        None => Err(ApiError::not_found("show")),
    }
}

/// GET /Shows/NextUp
///
/// For every show the user watched recently, the episode after the last one
/// watched.
async fn get_next_up(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<NextUpQuery>,
) -> ApiResult<Json<ItemsResponse>> {
    let user_id = &auth.user.id;
    let watched = state.repo.recently_watched(user_id, true);
    let collection = q
        .parent_id
        .as_deref()
        .and_then(|p| match resolve(&state.catalog, p) {
            Some(Resolved::Collection(c)) => Some(c.id.clone()),
            _ => None,
        });

    let entries = state
        .catalog
        .next_up(&watched)
        .iter()
        .filter(|e| q.series_id.as_ref().map_or(true, |s| *s == e.show.id))
        .filter(|e| collection.as_ref().map_or(true, |c| *c == e.collection.id))
        .map(|e| episode_dto(&state, user_id, e))
        .collect();
    Ok(Json(paginate(entries, q.start_index, q.limit)))
}

/// GET /Shows/:item_id/Seasons
async fn get_seasons(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<Json<ItemsResponse>> {
    let show = show_ref(&state, &item_id)?;
    let entries = state
        .catalog
        .seasons_of(&show)
        .iter()
        .map(|s| season_dto(&state, &auth.user.id, s))
        .collect();
    Ok(Json(paginate(entries, None, None)))
}

/// GET /Shows/:item_id/Episodes
async fn get_episodes(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
    Query(q): Query<EpisodesQuery>,
) -> ApiResult<Json<ItemsResponse>> {
    let show = show_ref(&state, &item_id)?;
    let mut seasons = state.catalog.seasons_of(&show);

    if let Some(season_id) = q.season_id.as_deref().filter(|s| !s.is_empty()) {
        let wanted = match resolve(&state.catalog, season_id) {
            Some(Resolved::Season(s)) => s.season().id.clone(),
            _ => return Err(ApiError::not_found("season")),
        };
        seasons.retain(|s| s.season().id == wanted);
    } else if let Some(number) = q.season {
        seasons.retain(|s| s.season().season_no == number);
    }

    let mut episodes: Vec<EpisodeRef> = seasons.iter().flat_map(|s| s.episodes()).collect();
    if let Some(start) = q.start_item_id.as_deref() {
        if let Some(Resolved::Episode(e)) = resolve(&state.catalog, start) {
            let start_id = e.episode().id.clone();
            if let Some(pos) = episodes.iter().position(|x| x.episode().id == start_id) {
                episodes.drain(..pos);
            }
        }
    }

    let entries = episodes
        .iter()
        .map(|e| episode_dto(&state, &auth.user.id, e))
        .collect();
    let listing = ItemsQuery {
        sort_by: q.sort_by,
        sort_order: q.sort_order,
        start_index: q.start_index,
        limit: q.limit,
        ..Default::default()
    };
    Ok(Json(finish_listing(&state, entries, &listing).await?))
}
