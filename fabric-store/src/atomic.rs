//! Shared write-temp-then-rename helper with exclusive locking and 0600
//! permissions, used by both the managed-model store and the runtime
//! override sidecar.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize: {0}")]
    Serialize(String),
    #[error("deserialize: {0}")]
    Deserialize(String),
    #[error("unsupported schema version {found}, expected <= {max}")]
    UnsupportedSchemaVersion { found: u32, max: u32 },
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads and exclusively locks `path` for the duration of the closure,
/// returning `None` content when the file does not exist yet. The lock is
/// released when the returned `File` is dropped.
pub fn read_locked(path: &Path) -> Result<Option<String>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    file.lock_exclusive().map_err(|e| io_err(path, e))?;
    let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    FileExt::unlock(&file).map_err(|e| io_err(path, e))?;
    Ok(Some(content))
}

/// Atomically replaces `path` with `content`: writes to a sibling temp
/// file under an exclusive lock, sets `0600` permissions, then renames
/// over the destination.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut tmp_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state")
        .to_string();
    tmp_name.push_str(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| io_err(&tmp_path, e))?;
        file.lock_exclusive().map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        set_owner_read_write(&file, &tmp_path)?;
        FileExt::unlock(&file).map_err(|e| io_err(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_read_write(file: &File, path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_owner_read_write(_file: &File, _path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_locked_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        assert!(read_locked(&path).unwrap().is_none());
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        write_atomic(&path, "hello: world\n").unwrap();
        let content = read_locked(&path).unwrap().unwrap();
        assert_eq!(content, "hello: world\n");
    }

    #[cfg(unix)]
    #[test]
    fn write_atomic_sets_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        write_atomic(&path, "a: 1\n").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn write_atomic_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        write_atomic(&path, "a: 1\n").unwrap();
        write_atomic(&path, "a: 2\n").unwrap();
        assert_eq!(read_locked(&path).unwrap().unwrap(), "a: 2\n");
    }

    #[test]
    fn no_leftover_tmp_file_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        write_atomic(&path, "a: 1\n").unwrap();
        let tmp = path.with_file_name("state.yaml.tmp");
        assert!(!tmp.exists());
    }
}
