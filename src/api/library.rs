use axum::{extract::State, routing::get, Json};
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::ids::collection_id;
use super::Route;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![("/Library/VirtualFolders", get(get_virtual_folders))]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VirtualFolderInfo {
    pub name: String,
    pub locations: Vec<String>,
    pub collection_type: String,
    pub item_id: String,
    pub primary_image_item_id: String,
    pub refresh_status: String,
}

/// GET /Library/VirtualFolders
async fn get_virtual_folders(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<Vec<VirtualFolderInfo>> {
    let folders = state
        .catalog
        .collections()
        .iter()
        .map(|c| VirtualFolderInfo {
            name: c.name.clone(),
            locations: vec![c.directory.display().to_string()],
            collection_type: c.kind.jellyfin_type().to_string(),
            item_id: collection_id(&c.id),
            primary_image_item_id: collection_id(&c.id),
            refresh_status: "Idle".to_string(),
        })
        .collect();
    Json(folders)
}
