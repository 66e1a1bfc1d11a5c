use std::path::Path;

use keeper_core::{ArchiveFormat, ArtifactInfo, BackupError, is_valid_artifact_name};
use tokio::fs;
use tracing::info;

use crate::runner::{ProcessRunner, redacted_command_line};

/// Append the configured archive extension when the name lacks it.
pub fn ensure_extension(name: &str, format: ArchiveFormat) -> String {
    let suffix = format!(".{}", format.extension());
    if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

/// Resolve a user-supplied name to a path inside the store. Validation
/// comes first so the name can never traverse out of the directory.
pub fn artifact_path(
    dir: &Path,
    name: &str,
    format: ArchiveFormat,
) -> Result<std::path::PathBuf, BackupError> {
    if !is_valid_artifact_name(name) {
        return Err(BackupError::InvalidName(name.to_string()));
    }
    Ok(dir.join(ensure_extension(name, format)))
}

/// Artifacts in a store, filtered to the configured extension and sorted by
/// name. Anything else living in the directory is invisible here.
pub async fn list(dir: &Path, format: ArchiveFormat) -> Result<Vec<ArtifactInfo>, BackupError> {
    let suffix = format!(".{}", format.extension());
    let mut artifacts = Vec::new();

    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|err| BackupError::io("reading store directory", err))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| BackupError::io("reading store directory", err))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(&suffix) {
            continue;
        }
        let metadata = entry
            .metadata()
            .await
            .map_err(|err| BackupError::io("reading artifact metadata", err))?;
        if !metadata.is_file() {
            continue;
        }
        artifacts.push(ArtifactInfo {
            name,
            size_bytes: metadata.len(),
            created: metadata.created().or_else(|_| metadata.modified()).ok(),
        });
    }

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

pub async fn remove(dir: &Path, name: &str, format: ArchiveFormat) -> Result<(), BackupError> {
    if !is_valid_artifact_name(name) {
        return Err(BackupError::InvalidName(name.to_string()));
    }
    let name = ensure_extension(name, format);
    let path = dir.join(&name);
    if !fs::try_exists(&path).await.unwrap_or(false) {
        return Err(BackupError::ArtifactMissing(name));
    }
    fs::remove_file(&path)
        .await
        .map_err(|err| BackupError::io("removing artifact", err))
}

/// Rename within a store. Move-only: an existing destination is rejected,
/// never overwritten, and the source is left untouched on any failure.
pub async fn rename(
    dir: &Path,
    old: &str,
    new: &str,
    format: ArchiveFormat,
) -> Result<String, BackupError> {
    if !is_valid_artifact_name(old) {
        return Err(BackupError::InvalidName(old.to_string()));
    }
    if !is_valid_artifact_name(new) {
        return Err(BackupError::InvalidName(new.to_string()));
    }

    let old_name = ensure_extension(old, format);
    let new_name = ensure_extension(new, format);
    let from = dir.join(&old_name);
    let to = dir.join(&new_name);

    if !fs::try_exists(&from).await.unwrap_or(false) {
        return Err(BackupError::ArtifactMissing(old_name));
    }
    if fs::try_exists(&to).await.unwrap_or(false) {
        return Err(BackupError::NameCollision(new_name));
    }

    fs::rename(&from, &to)
        .await
        .map_err(|err| BackupError::io("renaming artifact", err))?;
    Ok(new_name)
}

/// Cross-store copy (optionally deleting the source) via the helper's
/// `copy` verb. Never a merge: a destination collision rejects the whole
/// request before anything is touched.
pub async fn transfer(
    runner: &dyn ProcessRunner,
    helper: &Path,
    name: &str,
    from_dir: &Path,
    to_dir: &Path,
    delete_source: bool,
    format: ArchiveFormat,
) -> Result<(), BackupError> {
    if !is_valid_artifact_name(name) {
        return Err(BackupError::InvalidName(name.to_string()));
    }
    let name = ensure_extension(name, format);
    let source = from_dir.join(&name);
    let target = to_dir.join(&name);

    if !fs::try_exists(&source).await.unwrap_or(false) {
        return Err(BackupError::SourceMissing(name));
    }
    if fs::try_exists(&target).await.unwrap_or(false) {
        return Err(BackupError::DestinationCollision(name));
    }

    let mut args: Vec<String> = vec![
        "copy".to_string(),
        source.display().to_string(),
        target.display().to_string(),
    ];
    if delete_source {
        args.push("--delete".to_string());
    }
    info!("running {}", redacted_command_line(helper, &args, &[]));
    runner.run(helper, &args, None).await?;
    Ok(())
}
