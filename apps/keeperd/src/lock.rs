use fs2::FileExt;
use std::{fs::File, fs::OpenOptions, path::Path};

/// Advisory single-instance lock for the whole process. Held for the
/// lifetime of the guard; distinct from the per-run backup guard.
pub struct InstanceLock {
    _file: File,
}

pub fn acquire(path: &Path) -> std::io::Result<InstanceLock> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;

    file.try_lock_exclusive()?;
    Ok(InstanceLock { _file: file })
}
