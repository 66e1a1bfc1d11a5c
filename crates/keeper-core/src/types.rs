use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Destination class for finished artifacts. The two stores have independent
/// retention rules: permanent backups are never swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Normal,
    Permanent,
}

impl StoreKind {
    pub fn is_permanent(self) -> bool {
        matches!(self, StoreKind::Permanent)
    }

    pub fn label(self) -> &'static str {
        match self {
            StoreKind::Normal => "backup",
            StoreKind::Permanent => "permanent backup",
        }
    }
}

/// One backup invocation. Created per request and discarded when the run ends.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub store: StoreKind,
    pub requester: Option<String>,
    pub issued_at_ms: u64,
}

impl BackupRequest {
    pub fn new(store: StoreKind, requester: Option<String>) -> Self {
        Self {
            store,
            requester,
            issued_at_ms: now_millis(),
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Where a run currently sits in the hold/query/resume exchange. Owned by the
/// orchestrator for the duration of a run; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuiescePhase {
    Idle,
    Held,
    Querying(u32),
    Acknowledged,
    Resumed,
    Failed,
}

/// Max age for swept artifacts. `-1` disables the sweep entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age_days: i64,
}

impl RetentionPolicy {
    pub const DISABLED: RetentionPolicy = RetentionPolicy { max_age_days: -1 };

    pub fn is_enabled(self) -> bool {
        self.max_age_days != -1
    }
}

/// Archive container formats supported by the external compression tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    #[serde(rename = "7z")]
    SevenZ,
    Tar,
    Gzip,
    Bzip2,
    Xz,
}

impl ArchiveFormat {
    /// Canonical file extension, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Gzip => "gz",
            ArchiveFormat::Bzip2 => "bz2",
            ArchiveFormat::Xz => "xz",
        }
    }

    /// Type switch understood by the 7-Zip command line.
    pub fn type_switch(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "-tzip",
            ArchiveFormat::SevenZ => "-t7z",
            ArchiveFormat::Tar => "-ttar",
            ArchiveFormat::Gzip => "-tgzip",
            ArchiveFormat::Bzip2 => "-tbzip2",
            ArchiveFormat::Xz => "-txz",
        }
    }
}

impl Default for ArchiveFormat {
    fn default() -> Self {
        ArchiveFormat::Zip
    }
}

/// A finished artifact as listed from a store directory.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub name: String,
    pub size_bytes: u64,
    pub created: Option<SystemTime>,
}

/// Outcome of a successful backup run.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub archive: PathBuf,
    pub size_bytes: u64,
    pub duration: Duration,
    pub attempts: u32,
}

/// JSON contract of the helper's `stats` verb: one entry per inspected
/// directory (world, normal store, permanent store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryStats {
    pub path: String,
    pub size: u64,
    pub file_count: u64,
}

/// Reject names that could escape the store directory or collide with
/// device-style reserved names. Checked before any filesystem call.
pub fn is_valid_artifact_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '\'' | '<' | '>' | '|'))
    {
        return false;
    }
    !is_reserved_device_name(name)
}

fn is_reserved_device_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "con" | "prn" | "aux" | "nul" => true,
        _ => {
            lower.len() == 4
                && (lower.starts_with("com") || lower.starts_with("lpt"))
                && lower.as_bytes()[3].is_ascii_digit()
        }
    }
}
