// Endpoints for features that are not offered, answered so clients move on.

use axum::{routing::get, Json};

use super::Route;

pub fn routes() -> Vec<Route> {
    vec![("/QuickConnect/Enabled", get(quick_connect_enabled))]
}

/// GET /QuickConnect/Enabled. Clients expect a bare boolean.
async fn quick_connect_enabled() -> Json<bool> {
    Json(false)
}
