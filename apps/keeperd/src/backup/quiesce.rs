use std::path::Path;
use std::sync::Arc;

use keeper_rcon::ServerConsole;
use tracing::{debug, warn};

/// Stock English banner the server prints once the held files are
/// consistent. Used whenever the locale resources cannot be read.
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Data saved. Files are now ready to be copied.";

/// Prefix-anchored matcher for the save-query acknowledgement. The banner
/// text varies by locale and server version, so the pattern is data
/// assembled from the language resources rather than a constant.
#[derive(Debug, Clone)]
pub struct SuccessPattern {
    prefix: String,
}

impl SuccessPattern {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// Match the response against the pattern anchored at the start. On a
    /// match, the remainder (the acknowledged file list) is returned trimmed.
    pub fn strip(&self, response: &str) -> Option<String> {
        response
            .strip_prefix(&self.prefix)
            .map(|rest| rest.trim().to_string())
    }
}

/// Resolve the localized banner from the vanilla resource pack.
pub async fn load_success_pattern(server_root: &Path, language: &str) -> SuccessPattern {
    let path = server_root
        .join("resource_packs")
        .join("vanilla")
        .join("texts")
        .join(format!("{language}.lang"));

    match tokio::fs::read_to_string(&path).await {
        Ok(content) => match extract_success_message(&content) {
            Some(message) => SuccessPattern::new(message),
            None => {
                // A present-but-unusable lang file is a configuration
                // problem worth surfacing, not a silent fallback.
                warn!(
                    "commands.save-all.success not found in {}; using the stock banner",
                    path.display()
                );
                SuccessPattern::new(DEFAULT_SUCCESS_MESSAGE)
            }
        },
        Err(err) => {
            debug!(
                "language file {} unreadable ({err}); using the stock banner",
                path.display()
            );
            SuccessPattern::new(DEFAULT_SUCCESS_MESSAGE)
        }
    }
}

pub fn extract_success_message(content: &str) -> Option<String> {
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        if key.trim() != "commands.save-all.success" {
            continue;
        }
        let value = value.split('#').next().unwrap_or(value).trim();
        if value.is_empty() {
            return None;
        }
        return Some(value.to_string());
    }
    None
}

#[derive(Debug)]
pub enum PollOutcome {
    /// The banner matched; the payload is the raw acknowledged file list.
    Ready(String),
    NotReady,
    ProtocolError(String),
}

/// Drives the hold / poll / resume exchange against the live server console.
pub struct QuiesceClient {
    console: Arc<dyn ServerConsole>,
    pattern: SuccessPattern,
}

impl QuiesceClient {
    pub fn new(console: Arc<dyn ServerConsole>, pattern: SuccessPattern) -> Self {
        Self { console, pattern }
    }

    pub fn pattern(&self) -> &SuccessPattern {
        &self.pattern
    }

    /// Freeze the persistence layer. The server acknowledges asynchronously;
    /// readiness is observed through `poll_ready`.
    pub async fn hold(&self) -> Result<(), String> {
        self.console
            .execute("save hold")
            .await
            .map(|_| ())
            .map_err(|err| format!("save hold failed: {err}"))
    }

    pub async fn poll_ready(&self) -> PollOutcome {
        match self.console.execute("save query").await {
            Ok(response) => match self.pattern.strip(&response) {
                Some(artifacts) => PollOutcome::Ready(artifacts),
                None => PollOutcome::NotReady,
            },
            Err(err) => PollOutcome::ProtocolError(err.to_string()),
        }
    }

    /// Release the freeze. Idempotent by contract of the server: resuming
    /// when nothing is held is a no-op.
    pub async fn resume(&self) -> Result<(), String> {
        self.console
            .execute("save resume")
            .await
            .map(|_| ())
            .map_err(|err| format!("save resume failed: {err}"))
    }
}
