use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub properties: UserProperties,
}

/// Policy and configuration flags, persisted as key/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProperties {
    pub admin: bool,
    pub disabled: bool,
    pub enable_all_folders: bool,
    pub enabled_folders: Vec<String>,
    pub enable_downloads: bool,
    pub ordered_views: Vec<String>,
    pub my_media_excludes: Vec<String>,
    pub latest_items_excludes: Vec<String>,
}

impl Default for UserProperties {
    fn default() -> Self {
        Self {
            admin: false,
            disabled: false,
            enable_all_folders: true,
            enabled_folders: Vec::new(),
            enable_downloads: true,
            ordered_views: Vec::new(),
            my_media_excludes: Vec::new(),
            latest_items_excludes: Vec::new(),
        }
    }
}

fn flag(v: bool) -> String {
    if v { "1" } else { "0" }.to_string()
}

fn list(v: &[String]) -> String {
    v.join(",")
}

fn parse_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl UserProperties {
    /// Storage form: booleans as "0"/"1", lists comma-joined.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("admin", flag(self.admin)),
            ("disabled", flag(self.disabled)),
            ("enableallfolders", flag(self.enable_all_folders)),
            ("enabledfolders", list(&self.enabled_folders)),
            ("enabledownloads", flag(self.enable_downloads)),
            ("orderedviews", list(&self.ordered_views)),
            ("mymediaexcludes", list(&self.my_media_excludes)),
            ("latestitemsexcludes", list(&self.latest_items_excludes)),
        ]
    }

    /// Apply one stored pair; unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) {
        let b = value == "1";
        match key {
            "admin" => self.admin = b,
            "disabled" => self.disabled = b,
            "enableallfolders" => self.enable_all_folders = b,
            "enabledfolders" => self.enabled_folders = parse_list(value),
            "enabledownloads" => self.enable_downloads = b,
            "orderedviews" => self.ordered_views = parse_list(value),
            "mymediaexcludes" => self.my_media_excludes = parse_list(value),
            "latestitemsexcludes" => self.latest_items_excludes = parse_list(value),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AccessToken {
    pub token: String,
    #[sqlx(rename = "userid")]
    pub user_id: String,
    #[sqlx(rename = "deviceid")]
    pub device_id: String,
    #[sqlx(rename = "devicename")]
    pub device_name: String,
    #[sqlx(rename = "applicationname")]
    pub application_name: String,
    #[sqlx(rename = "applicationversion")]
    pub application_version: String,
    #[sqlx(rename = "remoteaddress")]
    pub remote_address: String,
    pub created: DateTime<Utc>,
    #[sqlx(rename = "lastused")]
    pub last_used: DateTime<Utc>,
}

/// Per user, per item playback state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    /// Seconds.
    pub position: i64,
    /// 0 to 100.
    pub played_percentage: i32,
    pub played: bool,
    pub favorite: bool,
    pub timestamp: DateTime<Utc>,
}

impl UserData {
    /// Started but not finished. Items without a known runtime only have a
    /// position.
    pub fn in_progress(&self) -> bool {
        !self.played
            && (self.position > 0 || (self.played_percentage > 0 && self.played_percentage < 100))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    /// In play order.
    pub item_ids: Vec<String>,
}

/// One catalog item as the search index sees it.
#[derive(Debug, Clone, Default)]
pub struct SearchDocument {
    pub id: String,
    /// Collection the item lives in.
    pub parent_id: String,
    pub name: String,
    pub sort_name: String,
    pub overview: String,
    pub genres: Vec<String>,
    pub people: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_pairs() {
        let props = UserProperties {
            admin: true,
            enabled_folders: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let mut back = UserProperties {
            enable_all_folders: false,
            ..Default::default()
        };
        for (k, v) in props.to_pairs() {
            back.set(k, &v);
        }
        assert_eq!(back, props);
        assert!(props.to_pairs().contains(&("admin", "1".to_string())));
        assert!(props.to_pairs().contains(&("enabledfolders", "a,b".to_string())));
    }

    #[test]
    fn test_in_progress() {
        let mut ud = UserData {
            played_percentage: 40,
            ..Default::default()
        };
        assert!(ud.in_progress());
        ud.played = true;
        assert!(!ud.in_progress());

        let unknown_runtime = UserData {
            position: 600,
            ..Default::default()
        };
        assert!(unknown_runtime.in_progress());
        assert!(!UserData::default().in_progress());
    }
}
