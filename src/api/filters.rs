// Browse filters: the genres, ratings and years present in a collection.

use axum::{
    extract::{Query, State},
    routing::get,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::{BaseItemDto, ItemsResponse, NameIdPair};
use super::error::{ApiError, ApiResult};
use super::ids::{resolve, Resolved};
use super::items::paginate;
use super::Route;
use crate::collection::{Catalog, CatalogDetails, ItemRef};
use crate::services::idhash::id_hash;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Items/Filters", get(get_filters)),
        ("/Items/Filters2", get(get_filters2)),
        ("/Genres", get(get_genres)),
    ]
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuery {
    pub parent_id: Option<String>,
    pub search_term: Option<String>,
    pub start_index: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct QueryFiltersLegacy {
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub official_ratings: Vec<String>,
    pub years: Vec<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryFilters {
    pub genres: Vec<NameIdPair>,
    pub tags: Vec<String>,
}

/// Items in scope: one collection, one show, or everything.
fn scoped_items(catalog: &Catalog, parent_id: Option<&str>) -> ApiResult<Vec<ItemRef>> {
    let Some(id) = parent_id.filter(|id| !id.is_empty()) else {
        return Ok(catalog.all_items());
    };
    match resolve(catalog, id) {
        Some(Resolved::Collection(c)) => Ok(c
            .items()
            .into_iter()
            .map(|item| ItemRef {
                collection: c.clone(),
                item,
            })
            .collect()),
        Some(Resolved::Item(r)) => Ok(vec![r]),
        Some(Resolved::Season(s)) => Ok(vec![ItemRef {
            collection: s.collection.clone(),
            item: s.show.clone(),
        }]),
        Some(Resolved::Episode(e)) => Ok(vec![ItemRef {
            collection: e.collection.clone(),
            item: e.show.clone(),
        }]),
        None => Err(ApiError::not_found("parent")),
    }
}

fn details(state: &AppState, q: &FilterQuery) -> ApiResult<CatalogDetails> {
    let items = scoped_items(&state.catalog, q.parent_id.as_deref())?;
    Ok(Catalog::details(&items))
}

/// GET /Items/Filters
async fn get_filters(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(q): Query<FilterQuery>,
) -> ApiResult<Json<QueryFiltersLegacy>> {
    let d = details(&state, &q)?;
    Ok(Json(QueryFiltersLegacy {
        genres: d.genres,
        tags: Vec::new(),
        official_ratings: d.official_ratings,
        years: d.years,
    }))
}

/// GET /Items/Filters2
async fn get_filters2(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(q): Query<FilterQuery>,
) -> ApiResult<Json<QueryFilters>> {
    let d = details(&state, &q)?;
    Ok(Json(QueryFilters {
        genres: d.genres.iter().map(|g| NameIdPair::new(g)).collect(),
        tags: Vec::new(),
    }))
}

/// GET /Genres: each genre as a browsable item.
async fn get_genres(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(q): Query<FilterQuery>,
) -> ApiResult<Json<ItemsResponse>> {
    let d = details(&state, &q)?;
    let term = q.search_term.as_deref().unwrap_or_default().to_lowercase();
    let entries = d
        .genres
        .iter()
        .filter(|g| g.to_lowercase().contains(&term))
        .map(|g| BaseItemDto {
            name: g.clone(),
            id: id_hash(g),
            etag: id_hash(g),
            sort_name: g.to_lowercase(),
            server_id: state.config.server_id.clone(),
            item_type: "Genre".to_string(),
            is_folder: true,
            play_access: "Full".to_string(),
            ..Default::default()
        })
        .collect();
    Ok(Json(paginate(entries, q.start_index, q.limit)))
}
