pub mod ops;
pub mod quiesce;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use keeper_core::{BackupError, BackupReport, BackupRequest, StoreKind};
use keeper_rcon::ServerConsole;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::KeeperConfig;
use crate::notify::Notifier;
use crate::runner::ProcessRunner;
use quiesce::SuccessPattern;

/// The backup engine: configuration plus the collaborators the orchestration
/// state machine drives. One engine per live server process.
pub struct Engine {
    pub(crate) config: KeeperConfig,
    pub(crate) world_name: String,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) console: Arc<dyn ServerConsole>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) pattern: SuccessPattern,
    flight: Arc<Mutex<()>>,
}

impl Engine {
    pub fn new(
        config: KeeperConfig,
        world_name: String,
        runner: Arc<dyn ProcessRunner>,
        console: Arc<dyn ServerConsole>,
        notifier: Arc<dyn Notifier>,
        pattern: SuccessPattern,
    ) -> Self {
        Self {
            config,
            world_name,
            runner,
            console,
            notifier,
            pattern,
            flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn world_name(&self) -> &str {
        &self.world_name
    }

    pub fn store_dir(&self, kind: StoreKind) -> &Path {
        self.config.store_dir(kind)
    }

    pub(crate) fn scratch_dir(&self) -> &Path {
        &self.config.scratch_dir
    }

    pub(crate) fn world_dir(&self) -> PathBuf {
        self.config
            .server_root
            .join("worlds")
            .join(&self.world_name)
    }

    /// Single-flight guard: at most one run may hold this at any instant.
    /// Concurrent callers are rejected immediately, never queued.
    pub(crate) fn try_begin(&self) -> Result<OwnedMutexGuard<()>, BackupError> {
        self.flight
            .clone()
            .try_lock_owned()
            .map_err(|_| BackupError::AlreadyInProgress)
    }

    pub async fn run_backup(&self, request: BackupRequest) -> Result<BackupReport, BackupError> {
        ops::run_backup(self, request).await
    }
}
