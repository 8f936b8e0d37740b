use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use super::auth::{client_info, remote_addr, AuthUser};
use super::error::{ApiError, ApiResult};
use super::sessions::SessionInfo;
use super::Route;
use crate::models::User;
use crate::services::auth;
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Users/AuthenticateByName", post(authenticate_by_name)),
        ("/Users/Public", get(get_public_users)),
        ("/Users/Me", get(get_current_user)),
        ("/Users/:user_id", get(get_user)),
        ("/Users/:user_id/GroupingOptions", get(get_grouping_options)),
    ]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthenticateRequest {
    pub username: String,
    #[serde(default)]
    pub pw: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthenticationResult {
    pub user: UserDto,
    pub session_info: SessionInfo,
    pub access_token: String,
    pub server_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDto {
    pub id: String,
    pub name: String,
    pub server_id: String,
    pub has_password: bool,
    pub has_configured_password: bool,
    pub has_configured_easy_password: bool,
    pub enable_auto_login: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_date: Option<chrono::DateTime<chrono::Utc>>,
    pub policy: UserPolicy,
    pub configuration: UserConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserPolicy {
    pub is_administrator: bool,
    pub is_hidden: bool,
    pub is_disabled: bool,
    pub enable_all_folders: bool,
    pub enabled_folders: Vec<String>,
    pub enable_content_downloading: bool,
    pub enable_audio_playback_transcoding: bool,
    pub enable_video_playback_transcoding: bool,
    pub enable_playback_remuxing: bool,
    pub enable_media_playback: bool,
    pub authentication_provider_id: String,
    pub password_reset_provider_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserConfiguration {
    pub play_default_audio_track: bool,
    pub subtitle_language_preference: String,
    pub display_missing_episodes: bool,
    pub subtitle_mode: String,
    pub ordered_views: Vec<String>,
    pub my_media_excludes: Vec<String>,
    pub latest_items_excludes: Vec<String>,
    pub hide_played_in_latest: bool,
    pub remember_audio_selections: bool,
    pub remember_subtitle_selections: bool,
    pub enable_next_episode_auto_play: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupingOption {
    pub name: String,
    pub id: String,
}

impl UserDto {
    pub fn new(user: &User, server_id: &str) -> Self {
        let p = &user.properties;
        Self {
            id: user.id.clone(),
            name: user.username.clone(),
            server_id: server_id.to_string(),
            has_password: true,
            has_configured_password: true,
            has_configured_easy_password: false,
            enable_auto_login: false,
            last_login_date: user.last_login,
            last_activity_date: user.last_used,
            policy: UserPolicy {
                is_administrator: p.admin,
                is_hidden: true,
                is_disabled: p.disabled,
                enable_all_folders: p.enable_all_folders,
                enabled_folders: p.enabled_folders.clone(),
                enable_content_downloading: p.enable_downloads,
                enable_audio_playback_transcoding: false,
                enable_video_playback_transcoding: false,
                enable_playback_remuxing: false,
                enable_media_playback: true,
                authentication_provider_id:
                    "Jellyfin.Server.Implementations.Users.DefaultAuthenticationProvider"
                        .to_string(),
                password_reset_provider_id:
                    "Jellyfin.Server.Implementations.Users.DefaultPasswordResetProvider"
                        .to_string(),
            },
            configuration: UserConfiguration {
                play_default_audio_track: true,
                subtitle_language_preference: String::new(),
                display_missing_episodes: false,
                subtitle_mode: "Default".to_string(),
                ordered_views: p.ordered_views.clone(),
                my_media_excludes: p.my_media_excludes.clone(),
                latest_items_excludes: p.latest_items_excludes.clone(),
                hide_played_in_latest: true,
                remember_audio_selections: true,
                remember_subtitle_selections: true,
                enable_next_episode_auto_play: true,
            },
        }
    }
}

/// POST /Users/AuthenticateByName
async fn authenticate_by_name(
    State(state): State<Arc<AppState>>,
    conn: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<AuthenticateRequest>,
) -> ApiResult<Json<AuthenticationResult>> {
    let client = client_info(&headers);
    let remote = remote_addr(conn);

    let user = auth::authenticate(
        &state.repo,
        &req.username,
        &req.pw,
        state.config.autoregister,
    )
    .await
    .inspect_err(|e| tracing::info!("Login failed for '{}' from {}: {}", req.username, remote, e))?;

    let token = auth::issue_token(&state.repo, &user, &client, &remote).await?;
    tracing::info!(
        "User '{}' logged in from {} ({} on {})",
        user.username,
        remote,
        client.client,
        client.device
    );

    let server_id = &state.config.server_id;
    Ok(Json(AuthenticationResult {
        user: UserDto::new(&user, server_id),
        session_info: SessionInfo::new(&user, &token),
        access_token: token.token,
        server_id: server_id.clone(),
    }))
}

/// GET /Users/Public. Users are never listed on the login screen.
async fn get_public_users() -> Json<Vec<UserDto>> {
    Json(Vec::new())
}

/// GET /Users/Me
async fn get_current_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Json<UserDto> {
    Json(UserDto::new(&auth.user, &state.config.server_id))
}

/// GET /Users/:user_id
async fn get_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserDto>> {
    if user_id != auth.user.id {
        return Err(ApiError::not_found("user"));
    }
    Ok(Json(UserDto::new(&auth.user, &state.config.server_id)))
}

/// GET /Users/:user_id/GroupingOptions: one entry per collection.
async fn get_grouping_options(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<Vec<GroupingOption>> {
    let options = state
        .catalog
        .collections()
        .iter()
        .map(|c| GroupingOption {
            name: c.name.clone(),
            id: super::ids::collection_id(&c.id),
        })
        .collect();
    Json(options)
}
