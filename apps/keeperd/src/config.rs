use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use keeper_core::{ArchiveFormat, RetentionPolicy, StoreKind};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTarget {
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    #[serde(default)]
    pub webdav_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub allow_insecure: bool,
}

impl Default for UploadTarget {
    fn default() -> Self {
        Self {
            remote_path: default_remote_path(),
            webdav_url: String::new(),
            username: String::new(),
            password: String::new(),
            allow_insecure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Fallback locale for the save-query banner when `server.properties`
    /// does not name one.
    #[serde(default = "default_language")]
    pub language: String,
    /// Max age in days for swept normal-store artifacts; -1 disables.
    #[serde(default = "default_max_storage_days")]
    pub max_storage_days: i64,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_permanent_dir")]
    pub permanent_dir: PathBuf,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_query_retries")]
    pub query_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default)]
    pub format: ArchiveFormat,
    #[serde(default)]
    pub compress_level: u32,
    #[serde(default = "default_max_wait_for_zip_secs")]
    pub max_wait_for_zip_secs: u64,
    /// Path to the external compression tool.
    #[serde(default = "default_seven_zip")]
    pub seven_zip: PathBuf,
    /// Path to the copy/cleanup/upload/recover/stats helper executable.
    #[serde(default = "default_helper")]
    pub helper: PathBuf,
    #[serde(default = "default_server_root")]
    pub server_root: PathBuf,
    #[serde(default = "default_server_exe")]
    pub server_exe: String,
    #[serde(default)]
    pub upload: UploadTarget,
    /// External notification channel for recovery announcements. When set,
    /// the recovery launcher does not issue the server stop itself.
    #[serde(default)]
    pub notify_webhook: Option<String>,
    /// Identities allowed to trigger operations from the command layer.
    #[serde(default)]
    pub allowlist: Vec<String>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            max_storage_days: default_max_storage_days(),
            backup_dir: default_backup_dir(),
            permanent_dir: default_permanent_dir(),
            scratch_dir: default_scratch_dir(),
            query_retries: default_query_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            format: ArchiveFormat::default(),
            compress_level: 0,
            max_wait_for_zip_secs: default_max_wait_for_zip_secs(),
            seven_zip: default_seven_zip(),
            helper: default_helper(),
            server_root: default_server_root(),
            server_exe: default_server_exe(),
            upload: UploadTarget::default(),
            notify_webhook: None,
            allowlist: Vec::new(),
        }
    }
}

impl KeeperConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age_days: self.max_storage_days,
        }
    }

    pub fn store_dir(&self, kind: StoreKind) -> &Path {
        match kind {
            StoreKind::Normal => &self.backup_dir,
            StoreKind::Permanent => &self.permanent_dir,
        }
    }

    pub fn compress_deadline(&self) -> Duration {
        Duration::from_secs(self.max_wait_for_zip_secs)
    }
}

/// Load the config file, creating it with defaults on first run so the
/// operator has something to edit.
pub fn load_or_init(path: &Path) -> Result<KeeperConfig, String> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|err| format!("Failed to parse config {}: {err}", path.display())),
        Err(_) => {
            let config = KeeperConfig::default();
            save(path, &config)?;
            info!("created default config at {}", path.display());
            Ok(config)
        }
    }
}

pub fn save(path: &Path, config: &KeeperConfig) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create config dir: {err}"))?;
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| format!("Failed to serialize config: {err}"))?;
    fs::write(path, payload).map_err(|err| format!("Failed to write config: {err}"))
}

pub fn default_config_path() -> Result<PathBuf, String> {
    if let Some(base) = dirs::data_dir() {
        return Ok(base.join("keeper").join("config.json"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".keeper").join("config.json"));
    }
    Err("Unable to resolve a writable data directory".to_string())
}

fn default_remote_path() -> String {
    "/backup".to_string()
}

fn default_language() -> String {
    "en_US".to_string()
}

fn default_max_storage_days() -> i64 {
    7
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backup")
}

fn default_permanent_dir() -> PathBuf {
    PathBuf::from("./backup/permanent_backup")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("./backup_tmp")
}

fn default_query_retries() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_initial_delay_ms() -> u64 {
    50
}

fn default_max_wait_for_zip_secs() -> u64 {
    1800
}

fn default_seven_zip() -> PathBuf {
    PathBuf::from("./7za")
}

fn default_helper() -> PathBuf {
    PathBuf::from("./keeper-helper")
}

fn default_server_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_server_exe() -> String {
    "bedrock_server".to_string()
}
