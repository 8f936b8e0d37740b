// Devices of the calling user, derived from their access tokens.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ApiResult};
use super::Route;
use crate::models::{AccessToken, User};
use crate::AppState;

pub fn routes() -> Vec<Route> {
    vec![
        ("/Devices", get(get_devices).delete(delete_device)),
        ("/Devices/Info", get(get_device_info)),
        ("/Devices/Options", get(get_device_options)),
    ]
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQuery {
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub last_user_name: String,
    pub last_user_id: String,
    pub app_name: String,
    pub app_version: String,
    pub date_last_activity: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceList {
    pub items: Vec<DeviceInfo>,
    pub total_record_count: usize,
    pub start_index: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceOptions {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

/// One entry per device id, from its most recently used token.
/// `tokens` must be sorted most recent first.
fn devices(user: &User, tokens: &[AccessToken]) -> Vec<DeviceInfo> {
    let mut seen: Vec<&str> = Vec::new();
    let mut out = Vec::new();
    for t in tokens {
        if seen.contains(&t.device_id.as_str()) {
            continue;
        }
        seen.push(&t.device_id);
        out.push(DeviceInfo {
            id: t.device_id.clone(),
            name: t.device_name.clone(),
            last_user_name: user.username.clone(),
            last_user_id: user.id.clone(),
            app_name: t.application_name.clone(),
            app_version: t.application_version.clone(),
            date_last_activity: t.last_used,
        });
    }
    out
}

fn required_id(q: DeviceQuery) -> ApiResult<String> {
    q.id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing device id".to_string()))
}

async fn find_device(state: &AppState, auth: &AuthUser, id: &str) -> ApiResult<DeviceInfo> {
    let tokens = state.repo.get_user_tokens(&auth.user.id).await?;
    devices(&auth.user, &tokens)
        .into_iter()
        .find(|d| d.id == id)
        .ok_or_else(|| ApiError::not_found("device"))
}

/// GET /Devices
async fn get_devices(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<DeviceList>> {
    let tokens = state.repo.get_user_tokens(&auth.user.id).await?;
    let items = devices(&auth.user, &tokens);
    Ok(Json(DeviceList {
        total_record_count: items.len(),
        start_index: 0,
        items,
    }))
}

/// DELETE /Devices?id=: revoke every token of the device.
async fn delete_device(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<DeviceQuery>,
) -> ApiResult<StatusCode> {
    let id = required_id(q)?;
    let removed = state.repo.delete_device_tokens(&auth.user.id, &id).await?;
    if removed == 0 {
        return Err(ApiError::not_found("device"));
    }
    tracing::info!(
        "Revoked {} token(s) of device {} for {}",
        removed,
        id,
        auth.user.username
    );
    Ok(StatusCode::NO_CONTENT)
}

/// GET /Devices/Info?id=
async fn get_device_info(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<DeviceQuery>,
) -> ApiResult<Json<DeviceInfo>> {
    let id = required_id(q)?;
    Ok(Json(find_device(&state, &auth, &id).await?))
}

/// GET /Devices/Options?id=
async fn get_device_options(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(q): Query<DeviceQuery>,
) -> ApiResult<Json<DeviceOptions>> {
    let id = required_id(q)?;
    let device = find_device(&state, &auth, &id).await?;
    Ok(Json(DeviceOptions {
        device_id: device.id,
        custom_name: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(token: &str, device: &str, age_secs: i64) -> AccessToken {
        let at = Utc::now() - Duration::seconds(age_secs);
        AccessToken {
            token: token.to_string(),
            user_id: "u1".to_string(),
            device_id: device.to_string(),
            device_name: format!("{device} name"),
            application_name: "Infuse".to_string(),
            application_version: "8.0".to_string(),
            remote_address: String::new(),
            created: at,
            last_used: at,
        }
    }

    #[test]
    fn test_devices_dedup_keeps_most_recent() {
        let user = User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            password_hash: String::new(),
            created: Utc::now(),
            last_login: None,
            last_used: None,
            properties: Default::default(),
        };
        let tokens = vec![token("t1", "d1", 0), token("t2", "d2", 10), token("t3", "d1", 20)];
        let list = devices(&user, &tokens);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "d1");
        assert_eq!(list[0].date_last_activity, tokens[0].last_used);
        assert_eq!(list[1].id, "d2");
        assert_eq!(list[1].last_user_name, "alice");
    }
}
