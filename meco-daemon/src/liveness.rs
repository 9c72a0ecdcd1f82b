//! The liveness record: the PID of the running service, kept in a file so a
//! separate `meco on` / `meco off` invocation can find it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, DaemonError};

/// Read / write / delete access to the liveness record.
///
/// Implementations do no locking; callers own any check-then-act sequence.
pub trait LivenessStore {
    /// `Ok(None)` when no record exists.
    fn read(&self) -> Result<Option<u32>, DaemonError>;
    fn write(&self, pid: u32) -> Result<(), DaemonError>;
    /// Returns `false` if there was nothing to remove.
    fn remove(&self) -> Result<bool, DaemonError>;
}

impl<T: LivenessStore + ?Sized> LivenessStore for &T {
    fn read(&self) -> Result<Option<u32>, DaemonError> {
        (**self).read()
    }

    fn write(&self, pid: u32) -> Result<(), DaemonError> {
        (**self).write(pid)
    }

    fn remove(&self) -> Result<bool, DaemonError> {
        (**self).remove()
    }
}

/// File-backed record holding the PID as decimal text.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LivenessStore for PidFile {
    fn read(&self) -> Result<Option<u32>, DaemonError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&self.path, err)),
        };
        raw.trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| DaemonError::InvalidPidRecord {
                path: self.path.clone(),
                content: raw,
            })
    }

    fn write(&self, pid: u32) -> Result<(), DaemonError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::write(&self.path, pid.to_string()).map_err(|e| io_err(&self.path, e))
    }

    fn remove(&self) -> Result<bool, DaemonError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(&self.path, err)),
        }
    }
}

/// Remove the record only while it still names `pid`.
///
/// A service shutting down must not delete a record that a newer instance has
/// already claimed.
pub fn remove_if_owned(store: &impl LivenessStore, pid: u32) -> Result<bool, DaemonError> {
    match store.read() {
        Ok(Some(current)) if current == pid => store.remove(),
        Ok(_) => Ok(false),
        Err(DaemonError::InvalidPidRecord { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_record_reads_as_none() {
        let dir = TempDir::new().expect("tempdir");
        let record = PidFile::new(dir.path().join("meco_server.pid"));
        assert_eq!(record.read().expect("read"), None);
        assert!(!record.remove().expect("remove"), "nothing to remove");
    }

    #[test]
    fn write_read_remove_cycle() {
        let dir = TempDir::new().expect("tempdir");
        let record = PidFile::new(dir.path().join("run").join("meco_server.pid"));

        record.write(4242).expect("write");
        assert_eq!(fs::read_to_string(record.path()).expect("raw"), "4242");
        assert_eq!(record.read().expect("read"), Some(4242));

        assert!(record.remove().expect("remove"));
        assert!(!record.path().exists());
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let dir = TempDir::new().expect("tempdir");
        let record = PidFile::new(dir.path().join("meco_server.pid"));
        fs::write(record.path(), "  917\n").expect("write");
        assert_eq!(record.read().expect("read"), Some(917));
    }

    #[test]
    fn garbage_record_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let record = PidFile::new(dir.path().join("meco_server.pid"));
        fs::write(record.path(), "not-a-pid").expect("write");

        let err = record.read().unwrap_err();
        assert!(matches!(err, DaemonError::InvalidPidRecord { .. }), "got: {err}");
        assert!(err.to_string().contains("not-a-pid"));
    }

    #[test]
    fn remove_if_owned_leaves_foreign_record() {
        let dir = TempDir::new().expect("tempdir");
        let record = PidFile::new(dir.path().join("meco_server.pid"));

        record.write(100).expect("write");
        assert!(!remove_if_owned(&record, 200).expect("foreign"));
        assert_eq!(record.read().expect("read"), Some(100));

        assert!(remove_if_owned(&record, 100).expect("owned"));
        assert_eq!(record.read().expect("read"), None);
    }
}
