use axum::{
    extract::{Query, State},
    routing::get,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::dto::{BaseItemDto, ItemsResponse};
use super::items::paginate;
use super::Route;
use crate::services::idhash::id_hash;
use crate::AppState;

/// Upper bound on people considered per query.
const PERSON_SEARCH_LIMIT: usize = 100;

pub fn routes() -> Vec<Route> {
    vec![("/Persons", get(get_persons))]
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonsQuery {
    pub search_term: Option<String>,
    pub start_index: Option<usize>,
    pub limit: Option<usize>,
}

pub fn person_dto(server_id: &str, name: &str) -> BaseItemDto {
    let id = id_hash(name);
    BaseItemDto {
        name: name.to_string(),
        sort_name: name.to_lowercase(),
        server_id: server_id.to_string(),
        etag: id_hash(&id),
        id,
        item_type: "Person".to_string(),
        location_type: Some("FileSystem".to_string()),
        play_access: "Full".to_string(),
        ..Default::default()
    }
}

/// GET /Persons
async fn get_persons(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(q): Query<PersonsQuery>,
) -> Json<ItemsResponse> {
    let term = q.search_term.as_deref().unwrap_or_default();
    let entries = state
        .search
        .people(term, PERSON_SEARCH_LIMIT)
        .iter()
        .map(|name| person_dto(&state.config.server_id, name))
        .collect();
    Json(paginate(entries, q.start_index, q.limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_dto_id_matches_item_people() {
        let dto = person_dto("srv", "Humphrey Bogart");
        assert_eq!(dto.id, id_hash("Humphrey Bogart"));
        assert_eq!(dto.item_type, "Person");
        assert_eq!(dto.sort_name, "humphrey bogart");
    }
}
