use thiserror::Error;

/// Failures from running an external helper or compression process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("executable not found: {0}")]
    NotFound(String),

    #[error("failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exceeded the {seconds}s deadline and was terminated")]
    Timeout { program: String, seconds: u64 },

    #[error("{program} exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },
}

/// Run-scoped failure taxonomy. Nothing here is fatal to the hosting
/// process; every variant maps to exactly one operator-visible notification.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("a backup is already in progress")]
    AlreadyInProgress,

    #[error("server rejected the save hold")]
    HoldRejected,

    #[error("save query never matched \"{pattern}\" after {attempts} attempts")]
    QueryExhausted { attempts: u32, pattern: String },

    #[error("world copy failed: {0}")]
    CopyFailed(String),

    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("compression exceeded the {seconds}s deadline")]
    CompressTimeout { seconds: u64 },

    #[error("retention sweep failed: {0}")]
    Sweep(String),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("an artifact named {0} already exists")]
    NameCollision(String),

    #[error("artifact {0} not found in the source store")]
    SourceMissing(String),

    #[error("artifact {0} already exists in the destination store")]
    DestinationCollision(String),

    #[error("cannot start recovery while a backup is in progress")]
    RecoveryBlocked,

    #[error("backup artifact not found: {0}")]
    ArtifactMissing(String),

    #[error("restore tool not found: {0}")]
    RestoreToolMissing(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}
