// Item listings and single item lookups.
//
// Every listing runs the same pipeline: resolve the scope from `parentId`,
// project it to DTOs, filter, sort, page, and wrap the page with the total.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json,
};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::{
    collection_dto, episode_dto, item_dto, playlist_dto, resolved_dto, season_dto, BaseItemDto,
    ItemsResponse,
};
use super::error::{ApiError, ApiResult};
use super::ids::{resolve, Resolved};
use super::Route;
use crate::collection::{Collection, Entity, ItemRef, SeasonRef};
use crate::db::DbError;
use crate::models::Playlist;
use crate::AppState;

const DEFAULT_LATEST_LIMIT: usize = 20;
const SEARCH_LIMIT: usize = 100;
const SIMILAR_LIMIT: usize = 12;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Items", get(get_items)),
        ("/Users/:user_id/Items", get(get_items)),
        ("/Items/Latest", get(get_latest)),
        ("/Users/:user_id/Items/Latest", get(get_latest)),
        ("/UserItems/Resume", get(get_resume)),
        ("/Users/:user_id/Items/Resume", get(get_resume)),
        ("/Items/:item_id", get(get_item).delete(delete_item)),
        ("/Users/:user_id/Items/:item_id", get(get_user_item)),
        ("/Items/:item_id/Similar", get(get_similar)),
    ]
}

/// Listing parameters, after query normalization.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsQuery {
    pub parent_id: Option<String>,
    pub include_item_types: Option<String>,
    pub exclude_item_types: Option<String>,
    pub recursive: Option<String>,
    pub search_term: Option<String>,
    pub is_favorite: Option<String>,
    pub is_played: Option<String>,
    pub filters: Option<String>,
    pub genres: Option<String>,
    pub years: Option<String>,
    pub official_ratings: Option<String>,
    pub person_ids: Option<String>,
    pub ids: Option<String>,
    pub name_starts_with: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub start_index: Option<usize>,
    pub limit: Option<usize>,
}

/// Split a multi-valued parameter. Clients use either `,` or `|`.
pub fn split_list(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or_default()
        .split([',', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Lenient boolean: `true`, `True` and `1` all count.
pub fn parse_flag(value: &Option<String>) -> Option<bool> {
    match value.as_deref()?.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Where the entries of a listing come from.
enum Scope {
    All,
    Collection(Arc<Collection>),
    Show(ItemRef),
    Season(SeasonRef),
    Playlist(Playlist),
}

async fn resolve_scope(state: &AppState, user_id: &str, parent_id: Option<&str>) -> ApiResult<Scope> {
    let Some(id) = parent_id.filter(|id| !id.is_empty()) else {
        return Ok(Scope::All);
    };
    match resolve(&state.catalog, id) {
        Some(Resolved::Collection(c)) => Ok(Scope::Collection(c)),
        Some(Resolved::Item(r)) if !r.item.is_movie() => Ok(Scope::Show(r)),
        Some(Resolved::Season(s)) => Ok(Scope::Season(s)),
        Some(_) => Err(ApiError::BadRequest(format!("{id} is not a folder"))),
        None => match state.repo.get_playlist(id).await {
            Ok(p) if p.user_id == user_id => Ok(Scope::Playlist(p)),
            Ok(_) | Err(DbError::NotFound) => Err(ApiError::not_found("parent")),
            Err(e) => Err(e.into()),
        },
    }
}

/// Which kinds of entries a listing produces.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Kinds {
    movies: bool,
    series: bool,
    seasons: bool,
    episodes: bool,
    playlists: bool,
}

impl Kinds {
    fn from_query(q: &ItemsQuery) -> Self {
        let include = split_list(&q.include_item_types);
        let mut kinds = if include.is_empty() {
            Kinds {
                movies: true,
                series: true,
                ..Default::default()
            }
        } else {
            let has = |t: &str| include.iter().any(|i| i.eq_ignore_ascii_case(t));
            Kinds {
                movies: has("Movie"),
                series: has("Series"),
                seasons: has("Season"),
                episodes: has("Episode"),
                playlists: has("Playlist"),
            }
        };
        for t in split_list(&q.exclude_item_types) {
            match t.to_ascii_lowercase().as_str() {
                "movie" => kinds.movies = false,
                "series" => kinds.series = false,
                "season" => kinds.seasons = false,
                "episode" => kinds.episodes = false,
                "playlist" => kinds.playlists = false,
                _ => {}
            }
        }
        kinds
    }
}

fn catalog_entries(state: &AppState, user_id: &str, items: Vec<ItemRef>, kinds: Kinds) -> Vec<BaseItemDto> {
    let mut out = Vec::new();
    for r in items {
        let is_movie = r.item.is_movie();
        if (is_movie && kinds.movies) || (!is_movie && kinds.series) {
            out.push(item_dto(state, user_id, &r));
        }
        if is_movie || !(kinds.seasons || kinds.episodes) {
            continue;
        }
        for s in state.catalog.seasons_of(&r) {
            if kinds.seasons {
                out.push(season_dto(state, user_id, &s));
            }
            if kinds.episodes {
                out.extend(s.episodes().iter().map(|e| episode_dto(state, user_id, e)));
            }
        }
    }
    out
}

/// Items of a playlist in play order. Entries are removed by item id, so
/// that doubles as the entry id.
pub fn playlist_entries(state: &AppState, user_id: &str, p: &Playlist) -> Vec<BaseItemDto> {
    p.item_ids
        .iter()
        .filter_map(|id| resolve(&state.catalog, id))
        .map(|r| {
            let mut dto = resolved_dto(state, user_id, &r);
            dto.playlist_item_id = Some(dto.id.clone());
            dto
        })
        .collect()
}

/// Build the unfiltered entries of a scope.
async fn project(state: &AppState, user_id: &str, scope: &Scope, q: &ItemsQuery) -> ApiResult<Vec<BaseItemDto>> {
    let kinds = Kinds::from_query(q);
    let recursive = parse_flag(&q.recursive).unwrap_or(false);
    let typed = q.include_item_types.as_deref().is_some_and(|t| !t.is_empty());

    let entries = match scope {
        // Explicit ids may name anything, so look each one up.
        Scope::All if q.ids.is_some() => split_list(&q.ids)
            .iter()
            .filter_map(|id| resolve(&state.catalog, id))
            .map(|r| resolved_dto(state, user_id, &r))
            .collect(),
        // The root of the library is the list of collections.
        Scope::All if !typed && !recursive && q.search_term.is_none() => state
            .catalog
            .collections()
            .iter()
            .map(|c| collection_dto(state, user_id, c))
            .collect(),
        Scope::All => {
            let mut entries = catalog_entries(state, user_id, state.catalog.all_items(), kinds);
            if kinds.playlists {
                for p in state.repo.get_user_playlists(user_id).await? {
                    entries.push(playlist_dto(state, user_id, &p));
                }
            }
            entries
        }
        Scope::Collection(c) => {
            let items = c
                .items()
                .into_iter()
                .map(|item| ItemRef {
                    collection: c.clone(),
                    item,
                })
                .collect();
            catalog_entries(state, user_id, items, kinds)
        }
        Scope::Show(r) => {
            let seasons = state.catalog.seasons_of(r);
            if kinds.episodes || recursive {
                seasons
                    .iter()
                    .flat_map(|s| s.episodes())
                    .map(|e| episode_dto(state, user_id, &e))
                    .collect()
            } else {
                seasons.iter().map(|s| season_dto(state, user_id, s)).collect()
            }
        }
        Scope::Season(s) => s
            .episodes()
            .iter()
            .map(|e| episode_dto(state, user_id, e))
            .collect(),
        Scope::Playlist(p) => playlist_entries(state, user_id, p),
    };
    Ok(entries)
}

fn user_flag(dto: &BaseItemDto, f: impl Fn(&super::dto::UserItemDataDto) -> bool) -> bool {
    dto.user_data.as_ref().is_some_and(f)
}

fn any_ci(wanted: &[String], have: &[String]) -> bool {
    wanted
        .iter()
        .any(|w| have.iter().any(|h| h.eq_ignore_ascii_case(w)))
}

/// Apply every filter present in the query. Returns the search ranking when
/// a search term was given, for use as the default order.
async fn filter_entries(
    state: &AppState,
    entries: Vec<BaseItemDto>,
    q: &ItemsQuery,
) -> ApiResult<(Vec<BaseItemDto>, Option<HashMap<String, usize>>)> {
    let mut entries = entries;

    let term = q.search_term.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let ranking = match term {
        Some(term) => {
            let hits: HashMap<String, usize> = state
                .search
                .search(term, SEARCH_LIMIT)
                .await?
                .into_iter()
                .enumerate()
                .map(|(rank, id)| (id, rank))
                .collect();
            let lower = term.to_lowercase();
            entries.retain(|d| match d.item_type.as_str() {
                "Movie" | "Series" => hits.contains_key(&d.id),
                _ => d.name.to_lowercase().contains(&lower),
            });
            Some(hits)
        }
        None => None,
    };

    if let Some(fav) = parse_flag(&q.is_favorite) {
        entries.retain(|d| user_flag(d, |u| u.is_favorite) == fav);
    }
    if let Some(played) = parse_flag(&q.is_played) {
        entries.retain(|d| user_flag(d, |u| u.played) == played);
    }
    for f in split_list(&q.filters) {
        match f.to_ascii_lowercase().as_str() {
            "isfavorite" => entries.retain(|d| user_flag(d, |u| u.is_favorite)),
            "isplayed" => entries.retain(|d| user_flag(d, |u| u.played)),
            "isunplayed" => entries.retain(|d| !user_flag(d, |u| u.played)),
            "isresumable" => {
                entries.retain(|d| user_flag(d, |u| !u.played && u.playback_position_ticks > 0))
            }
            _ => {}
        }
    }

    let genres = split_list(&q.genres);
    if !genres.is_empty() {
        entries.retain(|d| any_ci(&genres, &d.genres));
    }
    let years: HashSet<i32> = split_list(&q.years)
        .iter()
        .filter_map(|y| y.parse().ok())
        .collect();
    if !years.is_empty() {
        entries.retain(|d| d.production_year.is_some_and(|y| years.contains(&y)));
    }
    let ratings = split_list(&q.official_ratings);
    if !ratings.is_empty() {
        entries.retain(|d| {
            d.official_rating
                .as_ref()
                .is_some_and(|r| ratings.iter().any(|w| w.eq_ignore_ascii_case(r)))
        });
    }
    let people: HashSet<String> = split_list(&q.person_ids).into_iter().collect();
    if !people.is_empty() {
        entries.retain(|d| d.people.iter().any(|p| people.contains(&p.id)));
    }
    let ids = split_list(&q.ids);
    if !ids.is_empty() {
        entries.retain(|d| ids.contains(&d.id));
    }
    if let Some(prefix) = q.name_starts_with.as_deref().filter(|p| !p.is_empty()) {
        let prefix = prefix.to_lowercase();
        entries.retain(|d| d.sort_name.starts_with(&prefix) || d.name.to_lowercase().starts_with(&prefix));
    }

    Ok((entries, ranking))
}

fn compare_by(key: &str, a: &BaseItemDto, b: &BaseItemDto) -> Ordering {
    match key.to_ascii_lowercase().as_str() {
        "sortname" => a.sort_name.cmp(&b.sort_name),
        "name" => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        "productionyear" => a.production_year.cmp(&b.production_year),
        "premieredate" => a.premiere_date.cmp(&b.premiere_date),
        "criticrating" | "communityrating" => a
            .community_rating
            .partial_cmp(&b.community_rating)
            .unwrap_or(Ordering::Equal),
        "datecreated" => a.date_created.cmp(&b.date_created),
        "dateplayed" | "datelastcontentadded" => {
            let played = |d: &BaseItemDto| d.user_data.as_ref().and_then(|u| u.last_played_date);
            played(a).cmp(&played(b))
        }
        "parentindexnumber" => a.parent_index_number.cmp(&b.parent_index_number),
        "indexnumber" => a
            .parent_index_number
            .cmp(&b.parent_index_number)
            .then(a.index_number.cmp(&b.index_number)),
        _ => Ordering::Equal,
    }
}

/// Stable multi-key sort. Each key takes the order at the same position in
/// `sortOrder`, or the last one given.
fn sort_entries(entries: &mut [BaseItemDto], q: &ItemsQuery) {
    let keys = split_list(&q.sort_by);
    if keys.is_empty() {
        return;
    }
    let orders = split_list(&q.sort_order);
    let descending: Vec<bool> = (0..keys.len())
        .map(|i| {
            orders
                .get(i)
                .or(orders.last())
                .is_some_and(|o| o.eq_ignore_ascii_case("Descending"))
        })
        .collect();

    entries.sort_by(|a, b| {
        keys.iter()
            .zip(&descending)
            .map(|(key, &desc)| {
                let o = compare_by(key, a, b);
                if desc {
                    o.reverse()
                } else {
                    o
                }
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

pub fn paginate(entries: Vec<BaseItemDto>, start_index: Option<usize>, limit: Option<usize>) -> ItemsResponse {
    let total = entries.len();
    let start = start_index.unwrap_or(0).min(total);
    let items: Vec<BaseItemDto> = entries
        .into_iter()
        .skip(start)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    ItemsResponse {
        items,
        total_record_count: total,
        start_index: start,
    }
}

/// Filter, sort and page already projected entries.
pub async fn finish_listing(
    state: &AppState,
    entries: Vec<BaseItemDto>,
    q: &ItemsQuery,
) -> ApiResult<ItemsResponse> {
    let (mut entries, ranking) = filter_entries(state, entries, q).await?;
    if q.sort_by.is_some() {
        sort_entries(&mut entries, q);
    } else if let Some(ranking) = ranking {
        entries.sort_by_key(|d| ranking.get(&d.id).copied().unwrap_or(usize::MAX));
    } else {
        let ids = split_list(&q.ids);
        if !ids.is_empty() {
            entries.sort_by_key(|d| ids.iter().position(|i| *i == d.id));
        }
    }
    Ok(paginate(entries, q.start_index, q.limit))
}

pub async fn list_items(state: &AppState, user_id: &str, q: &ItemsQuery) -> ApiResult<ItemsResponse> {
    let scope = resolve_scope(state, user_id, q.parent_id.as_deref()).await?;
    let entries = project(state, user_id, &scope, q).await?;
    finish_listing(state, entries, q).await
}

/// GET /Items, /Users/:user_id/Items
async fn get_items(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<ItemsQuery>,
) -> ApiResult<Json<ItemsResponse>> {
    Ok(Json(list_items(&state, &auth.user.id, &q).await?))
}

async fn item_by_id(state: &AppState, user_id: &str, item_id: &str) -> ApiResult<BaseItemDto> {
    if let Some(r) = resolve(&state.catalog, item_id) {
        return Ok(resolved_dto(state, user_id, &r));
    }
    match state.repo.get_playlist(item_id).await {
        Ok(p) if p.user_id == user_id => Ok(playlist_dto(state, user_id, &p)),
        Ok(_) | Err(DbError::NotFound) => Err(ApiError::not_found("item")),
        Err(e) => Err(e.into()),
    }
}

/// GET /Items/:item_id
async fn get_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<Json<BaseItemDto>> {
    Ok(Json(item_by_id(&state, &auth.user.id, &item_id).await?))
}

/// GET /Users/:user_id/Items/:item_id
async fn get_user_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((_user_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<BaseItemDto>> {
    Ok(Json(item_by_id(&state, &auth.user.id, &item_id).await?))
}

/// DELETE /Items/:item_id. Only the caller's own playlists can be deleted.
async fn delete_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
) -> ApiResult<StatusCode> {
    let playlist = state.repo.get_playlist(&item_id).await?;
    if playlist.user_id != auth.user.id {
        return Err(ApiError::not_found("playlist"));
    }
    state.repo.delete_playlist(&playlist.id).await?;
    tracing::info!("Deleted playlist '{}' ({})", playlist.name, playlist.id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestQuery {
    pub parent_id: Option<String>,
    pub include_item_types: Option<String>,
    pub limit: Option<usize>,
}

/// GET /Items/Latest, /Users/:user_id/Items/Latest
///
/// Movies and shows ordered by their newest video file. A bare array, not a
/// paged response.
async fn get_latest(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<LatestQuery>,
) -> ApiResult<Json<Vec<BaseItemDto>>> {
    let user_id = &auth.user.id;
    let limit = q.limit.unwrap_or(DEFAULT_LATEST_LIMIT);

    let mut items = match resolve_scope(&state, user_id, q.parent_id.as_deref()).await? {
        Scope::All => state.catalog.all_items(),
        Scope::Collection(c) => c
            .items()
            .into_iter()
            .map(|item| ItemRef {
                collection: c.clone(),
                item,
            })
            .collect(),
        _ => return Err(ApiError::BadRequest("latest needs a collection".to_string())),
    };

    let types = split_list(&q.include_item_types);
    let only_episodes = !types.is_empty() && types.iter().all(|t| t.eq_ignore_ascii_case("Episode"));
    if only_episodes {
        let mut episodes: Vec<_> = items
            .iter()
            .flat_map(|r| state.catalog.seasons_of(r))
            .flat_map(|s| s.episodes())
            .collect();
        episodes.sort_by(|a, b| b.episode().created().cmp(&a.episode().created()));
        let dtos = episodes
            .iter()
            .take(limit)
            .map(|e| episode_dto(&state, user_id, e))
            .collect();
        return Ok(Json(dtos));
    }

    if !types.is_empty() {
        let movies = types.iter().any(|t| t.eq_ignore_ascii_case("Movie"));
        let series = types.iter().any(|t| t.eq_ignore_ascii_case("Series"));
        items.retain(|r| if r.item.is_movie() { movies } else { series });
    }
    items.sort_by(|a, b| b.item.last_video.cmp(&a.item.last_video));
    let dtos = items
        .iter()
        .take(limit)
        .map(|r| item_dto(&state, user_id, r))
        .collect();
    Ok(Json(dtos))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeQuery {
    pub parent_id: Option<String>,
    pub start_index: Option<usize>,
    pub limit: Option<usize>,
}

/// GET /UserItems/Resume, /Users/:user_id/Items/Resume
///
/// Movies and episodes the user started but did not finish, most recent first.
async fn get_resume(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<ResumeQuery>,
) -> ApiResult<Json<ItemsResponse>> {
    let user_id = &auth.user.id;
    let collection = match resolve_scope(&state, user_id, q.parent_id.as_deref()).await? {
        Scope::Collection(c) => Some(c.id.clone()),
        _ => None,
    };

    let entries = state
        .repo
        .recently_watched(user_id, false)
        .iter()
        .filter_map(|id| {
            state
                .catalog
                .item(id)
                .filter(|r| r.item.is_movie())
                .map(Resolved::Item)
                .or_else(|| state.catalog.episode(id).map(Resolved::Episode))
        })
        .filter(|r| match (&collection, r) {
            (None, _) => true,
            (Some(c), Resolved::Item(i)) => &i.collection.id == c,
            (Some(c), Resolved::Episode(e)) => &e.collection.id == c,
            _ => false,
        })
        .map(|r| resolved_dto(&state, user_id, &r))
        .collect();
    Ok(Json(paginate(entries, q.start_index, q.limit)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarQuery {
    pub limit: Option<usize>,
}

/// GET /Items/:item_id/Similar
async fn get_similar(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(item_id): Path<String>,
    Query(q): Query<SimilarQuery>,
) -> ApiResult<Json<ItemsResponse>> {
    let raw = match resolve(&state.catalog, &item_id) {
        Some(Resolved::Item(r)) => r.item.id.clone(),
        Some(Resolved::Season(s)) => s.show.id.clone(),
        Some(Resolved::Episode(e)) => e.show.id.clone(),
        Some(Resolved::Collection(_)) => return Ok(Json(paginate(Vec::new(), None, None))),
        None => return Err(ApiError::not_found("item")),
    };
    let entries = state
        .search
        .similar(&raw, q.limit.unwrap_or(SIMILAR_LIMIT))
        .iter()
        .filter_map(|id| state.catalog.item(id))
        .map(|r| item_dto(&state, &auth.user.id, &r))
        .collect();
    Ok(Json(paginate(entries, None, None)))
}
