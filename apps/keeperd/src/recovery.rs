use std::process::Stdio;

use keeper_core::{BackupError, StoreKind, is_valid_artifact_name};
use tokio::process::Command;
use tracing::{info, warn};

use crate::backup::Engine;
use crate::notify::Severity;
use crate::store::ensure_extension;

/// A recovery helper was launched and detached; the hosting process may now
/// exit without taking the restore down with it.
#[derive(Debug)]
pub struct RecoveryHandoff {
    pub pid: u32,
}

/// Hand the server over to the external recovery helper: stop the live
/// process (unless an external channel owns that announcement), then spawn
/// the helper detached so it can restore the archive and relaunch the
/// server after this process has exited.
pub async fn launch_recovery(
    engine: &Engine,
    name: &str,
    store: StoreKind,
    requester: Option<&str>,
) -> Result<RecoveryHandoff, BackupError> {
    // Restoring over a world that is mid-copy would corrupt both; the
    // in-flight guard covers recovery as well.
    let _flight = engine
        .try_begin()
        .map_err(|_| BackupError::RecoveryBlocked)?;

    if !is_valid_artifact_name(name) {
        return Err(BackupError::InvalidName(name.to_string()));
    }
    let config = engine.config();
    let name = ensure_extension(name, config.format);
    let artifact = engine.store_dir(store).join(&name);
    if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
        return Err(BackupError::ArtifactMissing(name));
    }
    if !tokio::fs::try_exists(&config.helper).await.unwrap_or(false) {
        return Err(BackupError::RestoreToolMissing(
            config.helper.display().to_string(),
        ));
    }

    engine.notifier.notify(
        Severity::Warn,
        &format!("recovering from {name}; the server is going down and will be back shortly"),
        requester,
    );

    // Connected clients must be off before the world files are replaced;
    // the disconnect happens whether or not a webhook announces the outage.
    if let Err(err) = engine
        .console
        .execute("kick @a The server is restoring a backup, please rejoin shortly")
        .await
    {
        warn!("client disconnect failed before recovery: {err}");
    }

    // With a webhook configured the external channel announces the outage
    // and the helper stops the server itself; otherwise we stop it here so
    // the world files are closed before the restore begins.
    if config.notify_webhook.is_none() {
        if let Err(err) = engine.console.execute("stop").await {
            warn!("stop command failed before recovery: {err}");
        }
    }

    let args: Vec<String> = vec![
        "recover".to_string(),
        artifact.display().to_string(),
        config.server_root.display().to_string(),
        engine.world_name().to_string(),
        config.server_exe.clone(),
        config.seven_zip.display().to_string(),
    ];

    // Detached on purpose: the helper must outlive this process, so there
    // is no kill_on_drop and no wait here.
    let child = Command::new(&config.helper)
        .args(&args)
        .current_dir(&config.server_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| {
            BackupError::Process(keeper_core::ProcessError::LaunchFailed {
                program: config.helper.display().to_string(),
                source,
            })
        })?;

    let pid = child
        .id()
        .ok_or_else(|| BackupError::Config("recovery helper exited before handoff".to_string()))?;
    info!("recovery helper launched with pid {pid}");
    Ok(RecoveryHandoff { pid })
}
