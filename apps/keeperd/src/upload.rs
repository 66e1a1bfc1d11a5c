use std::path::Path;

use keeper_core::BackupError;
use tokio::fs;
use tracing::info;

use crate::config::UploadTarget;
use crate::runner::{ProcessRunner, redacted_command_line};

/// Push an archive to the configured WebDAV share via the helper's `upload`
/// verb. Credentials travel only on the helper's argument vector; the logged
/// command line always carries them masked.
pub async fn upload(
    runner: &dyn ProcessRunner,
    helper: &Path,
    artifact: &Path,
    target: &UploadTarget,
) -> Result<String, BackupError> {
    if !fs::try_exists(artifact).await.unwrap_or(false) {
        return Err(BackupError::ArtifactMissing(
            artifact.display().to_string(),
        ));
    }
    if target.webdav_url.is_empty() {
        return Err(BackupError::Config(
            "upload requested but no webdav_url is configured".to_string(),
        ));
    }

    let args: Vec<String> = vec![
        "upload".to_string(),
        artifact.display().to_string(),
        target.remote_path.clone(),
        target.webdav_url.clone(),
        target.username.clone(),
        target.password.clone(),
        target.allow_insecure.to_string(),
    ];
    info!(
        "running {}",
        redacted_command_line(helper, &args, &[&target.username, &target.password])
    );
    let output = runner.run(helper, &args, None).await?;
    Ok(clean_helper_output(&output.stdout))
}

/// The helper logs through its own frontend; strip the timestamp/level
/// prefixes and any ANSI colour codes so the last line can be shown as-is.
pub fn clean_helper_output(raw: &str) -> String {
    let mut cleaned = Vec::new();
    for line in raw.lines() {
        let line = strip_ansi(line);
        let line = strip_log_prefix(&line);
        let line = line.trim();
        if !line.is_empty() {
            cleaned.push(line.to_string());
        }
    }
    cleaned.join("\n")
}

fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            // CSI sequence: skip until the final byte in `@`..=`~`.
            if let Some('[') = chars.clone().next() {
                chars.next();
                for follow in chars.by_ref() {
                    if ('@'..='~').contains(&follow) {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(ch);
    }
    out
}

/// Drop a leading `[timestamp] [LEVEL] ` pair when present.
fn strip_log_prefix(line: &str) -> String {
    let mut rest = line.trim_start();
    for _ in 0..2 {
        if rest.starts_with('[') {
            match rest.find(']') {
                Some(end) => rest = rest[end + 1..].trim_start(),
                None => break,
            }
        }
    }
    rest.to_string()
}
