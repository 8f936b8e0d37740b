// Display preferences. Clients require the endpoint; preferences are not
// stored, every request gets the defaults.

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::get,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::auth::AuthUser;
use super::Route;

pub fn routes() -> Vec<Route> {
    vec![(
        "/DisplayPreferences/:id",
        get(get_display_preferences).post(update_display_preferences),
    )]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayPreferencesQuery {
    pub user_id: Option<String>,
    pub client: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct DisplayPreferences {
    pub id: String,
    pub sort_by: String,
    pub remember_indexing: bool,
    pub primary_image_height: i32,
    pub primary_image_width: i32,
    pub custom_prefs: HashMap<String, String>,
    pub scroll_direction: String,
    pub show_backdrop: bool,
    pub remember_sorting: bool,
    pub sort_order: String,
    pub show_sidebar: bool,
    pub client: String,
}

impl DisplayPreferences {
    fn defaults(id: String, client: String) -> Self {
        let custom_prefs = [
            ("chromecastVersion", "stable"),
            ("skipForwardLength", "30000"),
            ("skipBackLength", "10000"),
            ("enableNextVideoInfoOverlay", "False"),
            ("tvhome", ""),
            ("dashboardTheme", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            id,
            sort_by: "SortName".to_string(),
            remember_indexing: false,
            primary_image_height: 250,
            primary_image_width: 250,
            custom_prefs,
            scroll_direction: "Horizontal".to_string(),
            show_backdrop: true,
            remember_sorting: false,
            sort_order: "Ascending".to_string(),
            show_sidebar: false,
            client,
        }
    }
}

/// GET /DisplayPreferences/:id
async fn get_display_preferences(
    _auth: AuthUser,
    Path(id): Path<String>,
    Query(q): Query<DisplayPreferencesQuery>,
) -> Json<DisplayPreferences> {
    let client = q.client.unwrap_or_else(|| "emby".to_string());
    Json(DisplayPreferences::defaults(id, client))
}

/// POST /DisplayPreferences/:id
async fn update_display_preferences(
    auth: AuthUser,
    Path(id): Path<String>,
) -> StatusCode {
    tracing::debug!(
        "Ignoring display preferences {} from {}",
        id,
        auth.user.username
    );
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_serialize_pascal_case() {
        let prefs = DisplayPreferences::defaults("usersettings".to_string(), "emby".to_string());
        let json = serde_json::to_value(&prefs).unwrap();
        assert_eq!(json["Id"], "usersettings");
        assert_eq!(json["SortBy"], "SortName");
        assert_eq!(json["CustomPrefs"]["skipForwardLength"], "30000");
    }
}
