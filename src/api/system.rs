use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::Route;
use crate::AppState;

/// Version reported to clients. Some refuse servers older than 10.8.
const JELLYFIN_VERSION: &str = "10.10.3";

pub fn routes() -> Vec<Route> {
    vec![
        ("/System/Info/Public", get(get_public_system_info)),
        ("/System/Info", get(get_system_info)),
        ("/System/Ping", get(ping).post(ping)),
    ]
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfo {
    pub server_name: String,
    pub version: String,
    pub product_name: String,
    pub id: String,
    pub operating_system: String,
    pub local_address: String,
    pub startup_wizard_completed: bool,
    pub has_pending_restart: bool,
    pub has_update_available: bool,
    pub can_self_restart: bool,
    pub supports_library_monitor: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicSystemInfo {
    pub server_name: String,
    pub version: String,
    pub product_name: String,
    pub id: String,
    pub local_address: String,
    pub startup_wizard_completed: bool,
}

fn local_address(state: &AppState) -> String {
    let scheme = if state.config.tls().is_some() { "https" } else { "http" };
    format!(
        "{}://{}:{}",
        scheme, state.config.listen.address, state.config.listen.port
    )
}

/// GET /System/Info/Public. No credentials needed.
async fn get_public_system_info(State(state): State<Arc<AppState>>) -> Json<PublicSystemInfo> {
    Json(PublicSystemInfo {
        server_name: state.config.server_name.clone(),
        version: JELLYFIN_VERSION.to_string(),
        product_name: "Jellyfin Server".to_string(),
        id: state.config.server_id.clone(),
        local_address: local_address(&state),
        startup_wizard_completed: true,
    })
}

/// GET /System/Info
async fn get_system_info(State(state): State<Arc<AppState>>, _auth: AuthUser) -> Json<SystemInfo> {
    Json(SystemInfo {
        server_name: state.config.server_name.clone(),
        version: JELLYFIN_VERSION.to_string(),
        product_name: "Jellyfin Server".to_string(),
        id: state.config.server_id.clone(),
        operating_system: std::env::consts::OS.to_string(),
        local_address: local_address(&state),
        startup_wizard_completed: true,
        has_pending_restart: false,
        has_update_available: false,
        can_self_restart: false,
        supports_library_monitor: false,
    })
}

async fn ping() -> StatusCode {
    StatusCode::OK
}
