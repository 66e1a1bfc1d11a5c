use std::path::Path;

use keeper_core::{ArchiveFormat, BackupError, RetentionPolicy};
use tracing::{debug, info};

use crate::runner::{ProcessRunner, redacted_command_line};

/// Delete artifacts in `dir` older than the policy's cutoff, via the
/// helper's `cleanup` verb. Only files carrying the configured archive
/// extension are candidates; everything else in the directory is left
/// alone. A disabled policy never invokes the helper.
pub async fn sweep(
    runner: &dyn ProcessRunner,
    helper: &Path,
    dir: &Path,
    policy: RetentionPolicy,
    format: ArchiveFormat,
) -> Result<(), BackupError> {
    if !policy.is_enabled() {
        debug!("retention disabled; nothing to sweep");
        return Ok(());
    }

    let args: Vec<String> = vec![
        "cleanup".to_string(),
        dir.display().to_string(),
        policy.max_age_days.to_string(),
        format.extension().to_string(),
    ];
    info!("running {}", redacted_command_line(helper, &args, &[]));
    runner
        .run(helper, &args, None)
        .await
        .map_err(|err| BackupError::Sweep(err.to_string()))?;
    Ok(())
}
