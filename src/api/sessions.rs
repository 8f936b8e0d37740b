// Sessions: one per access token. Remote control is not supported, so a
// session is little more than the device that holds the token.

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiResult;
use super::Route;
use crate::models::{AccessToken, User};
use crate::services::idhash::id_hash;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Sessions", get(get_sessions)),
        ("/Sessions/Capabilities", post(post_capabilities)),
        ("/Sessions/Capabilities/Full", post(post_capabilities)),
        ("/Sessions/Logout", post(logout)),
    ]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub client: String,
    pub device_name: String,
    pub device_id: String,
    pub application_version: String,
    pub remote_end_point: String,
    pub last_activity_date: DateTime<Utc>,
    pub is_active: bool,
    pub supports_remote_control: bool,
    pub supports_media_control: bool,
    pub playable_media_types: Vec<String>,
    pub supported_commands: Vec<String>,
}

impl SessionInfo {
    pub fn new(user: &User, token: &AccessToken) -> Self {
        Self {
            id: id_hash(&token.token),
            user_id: user.id.clone(),
            user_name: user.username.clone(),
            client: token.application_name.clone(),
            device_name: token.device_name.clone(),
            device_id: token.device_id.clone(),
            application_version: token.application_version.clone(),
            remote_end_point: token.remote_address.clone(),
            last_activity_date: token.last_used,
            is_active: true,
            supports_remote_control: false,
            supports_media_control: false,
            playable_media_types: vec!["Video".to_string()],
            supported_commands: Vec::new(),
        }
    }
}

/// GET /Sessions: the caller's own sessions.
async fn get_sessions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<SessionInfo>>> {
    let tokens = state.repo.get_user_tokens(&auth.user.id).await?;
    Ok(Json(
        tokens
            .iter()
            .map(|t| SessionInfo::new(&auth.user, t))
            .collect(),
    ))
}

/// POST /Sessions/Capabilities[/Full]. Accepted and ignored.
async fn post_capabilities(_auth: AuthUser) -> StatusCode {
    StatusCode::NO_CONTENT
}

/// POST /Sessions/Logout: revoke the token the request was made with.
async fn logout(State(state): State<Arc<AppState>>, auth: AuthUser) -> ApiResult<StatusCode> {
    state.repo.delete_access_token(&auth.token.token).await?;
    tracing::info!(
        "User {} logged out from {}",
        auth.user.username,
        auth.token.device_name
    );
    Ok(StatusCode::NO_CONTENT)
}
