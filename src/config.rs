// Configuration module for jellofin-server
// Handles the command line, the YAML configuration file and environment overrides

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::collection::CollectionType;
use crate::services::idhash::id_hash;

const APP_NAME: &str = "jellofin";

#[derive(Debug, Parser)]
#[command(name = "jellofin-server", version, about = "Jellyfin compatible media server")]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "jellofin-server.yaml")]
    pub config: PathBuf,
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub listen: ListenConfig,

    /// Base directory for the database and cache when those are not set
    pub appdir: Option<PathBuf>,

    pub cachedir: Option<PathBuf>,

    pub dbdir: Option<PathBuf>,

    pub database: DatabaseConfig,

    /// "stdout", "syslog", "none" or a file path
    pub logfile: Option<String>,

    pub collections: Vec<CollectionConfig>,

    pub jellyfin: JellyfinConfig,

    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub address: String,
    pub port: u16,
    pub tlscert: Option<PathBuf>,
    pub tlskey: Option<PathBuf>,
    /// CIDR networks allowed to connect. Empty allows everyone.
    pub ipacl: Vec<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8096,
            tlscert: None,
            tlskey: None,
            ipacl: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub sqlite: SqliteConfig,

    /// Seconds between user data flushes (default: 10)
    pub flushinterval_secs: u64,

    /// Seconds between access token flushes (default: 60)
    pub tokenflushinterval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite: SqliteConfig::default(),
            flushinterval_secs: 10,
            tokenflushinterval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub filename: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            filename: "jellofin.db".to_string(),
        }
    }
}

/// A media root
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,

    #[serde(rename = "type")]
    pub kind: CollectionType,

    pub directory: PathBuf,

    #[serde(default)]
    pub baseurl: Option<String>,

    #[serde(default)]
    pub hlsserver: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JellyfinConfig {
    pub servername: String,

    /// Create unknown users on first login
    pub autoregister: bool,

    /// JPEG quality for resized posters
    pub imagequalityposter: u8,

    /// Defaults to the hash of the server name
    pub serverid: Option<String>,
}

impl Default for JellyfinConfig {
    fn default() -> Self {
        Self {
            servername: "jellofin".to_string(),
            autoregister: false,
            imagequalityposter: 40,
            serverid: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Pause between items during background rescans (default: 500)
    pub itemdelay_ms: u64,

    /// Pause between background rescans (default: 60)
    pub interval_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            itemdelay_ms: 500,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogTarget {
    Stdout,
    Syslog,
    None,
    File(PathBuf),
}

impl LogTarget {
    fn parse(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            None | Some("") | Some("stdout") => LogTarget::Stdout,
            Some("syslog") => LogTarget::Syslog,
            Some("none") => LogTarget::None,
            Some(path) => LogTarget::File(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen: ListenConfig,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub log: LogTarget,
    pub collections: Vec<CollectionConfig>,
    pub server_name: String,
    pub server_id: String,
    pub autoregister: bool,
    pub image_quality_poster: u8,
    pub scanner: ScannerConfig,
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Read, resolve and validate the configuration file, then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file: ConfigFile = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        let mut config = Self::build(file)?;
        config.apply_env();
        Ok(config)
    }

    pub(crate) fn build(file: ConfigFile) -> Result<Self> {
        Self::validate(&file)?;

        let cache_dir = match (&file.cachedir, &file.appdir) {
            (Some(dir), _) => dir.clone(),
            (None, Some(app)) => app.join("cache"),
            (None, None) => dirs::cache_dir()
                .map(|d| d.join(APP_NAME))
                .unwrap_or_else(|| PathBuf::from("cache")),
        };
        let db_dir = file
            .dbdir
            .clone()
            .or_else(|| file.appdir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let server_id = file
            .jellyfin
            .serverid
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| id_hash(&file.jellyfin.servername));

        Ok(Self {
            listen: file.listen,
            cache_dir,
            db_path: db_dir.join(&file.database.sqlite.filename),
            log: LogTarget::parse(file.logfile.as_deref()),
            collections: file.collections,
            server_name: file.jellyfin.servername,
            server_id,
            autoregister: file.jellyfin.autoregister,
            image_quality_poster: file.jellyfin.imagequalityposter,
            scanner: file.scanner,
            database: file.database,
        })
    }

    fn validate(file: &ConfigFile) -> Result<()> {
        let mut ids = HashSet::new();
        for c in &file.collections {
            if c.name.trim().is_empty() {
                bail!("collection with directory {} has no name", c.directory.display());
            }
            let id = c.id.clone().unwrap_or_else(|| id_hash(&c.name));
            if !ids.insert(id.clone()) {
                bail!("duplicate collection id '{}' ({})", id, c.name);
            }
        }
        if file.listen.tlscert.is_some() != file.listen.tlskey.is_some() {
            bail!("listen.tlscert and listen.tlskey must be set together");
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(address) = Self::env_address() {
            self.listen.address = address;
        }
        if let Some(port) = Self::env_port() {
            self.listen.port = port;
        }
        if let Ok(dir) = std::env::var("JELLOFIN_DBDIR") {
            self.db_path = PathBuf::from(dir).join(&self.database.sqlite.filename);
        }
        if let Ok(dir) = std::env::var("JELLOFIN_CACHEDIR") {
            self.cache_dir = PathBuf::from(dir);
        }
    }

    fn env_port() -> Option<u16> {
        std::env::var("JELLOFIN_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
    }

    fn env_address() -> Option<String> {
        std::env::var("JELLOFIN_ADDRESS").ok()
    }

    pub fn tls(&self) -> Option<(&Path, &Path)> {
        match (&self.listen.tlscert, &self.listen.tlskey) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    pub fn log_config(&self) {
        tracing::info!("Server '{}' (id {})", self.server_name, self.server_id);
        tracing::info!("Database: {}", self.db_path.display());
        tracing::info!("Cache directory: {}", self.cache_dir.display());
        for c in &self.collections {
            tracing::info!(
                "Collection '{}' ({}) at {}",
                c.name,
                c.kind.jellyfin_type(),
                c.directory.display()
            );
        }
        if self.autoregister {
            tracing::info!("Auto registration of new users: ENABLED");
        }
        if !self.listen.ipacl.is_empty() {
            tracing::info!("IP allow list: {}", self.listen.ipacl.join(", "));
        }
    }
}
