pub mod errors;
pub mod types;

pub use errors::{BackupError, ProcessError};
pub use types::{
    ArchiveFormat, ArtifactInfo, BackupReport, BackupRequest, DirectoryStats, QuiescePhase,
    RetentionPolicy, StoreKind, is_valid_artifact_name, now_millis,
};
