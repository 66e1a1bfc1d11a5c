use std::path::Path;
use std::time::Duration;

use keeper_core::{BackupError, DirectoryStats};
use tracing::info;

use crate::runner::{ProcessRunner, redacted_command_line};

/// Collect size/file-count figures for the world and both stores via the
/// helper's `stats` verb. Its stdout is the one documented JSON contract.
pub async fn collect(
    runner: &dyn ProcessRunner,
    helper: &Path,
    world_dir: &Path,
    backup_dir: &Path,
    permanent_dir: &Path,
) -> Result<Vec<DirectoryStats>, BackupError> {
    let args: Vec<String> = vec![
        "stats".to_string(),
        world_dir.display().to_string(),
        backup_dir.display().to_string(),
        permanent_dir.display().to_string(),
    ];
    info!("running {}", redacted_command_line(helper, &args, &[]));
    let output = runner.run(helper, &args, None).await?;
    serde_json::from_str(output.stdout.trim())
        .map_err(|err| BackupError::Config(format!("stats output was not valid JSON: {err}")))
}

pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    if bytes >= GIB {
        format!("{:.2} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis >= 60_000 {
        format!("{:.2}min", millis as f64 / 60_000.0)
    } else if millis >= 1000 {
        format!("{:.2}s", millis as f64 / 1000.0)
    } else {
        format!("{millis} ms")
    }
}
