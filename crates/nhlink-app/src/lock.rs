//! Machine-wide lock held by the session hosting the relay broker

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use nhlink_core::prelude::*;

const LOCK_FILENAME: &str = "broker.lock";

/// Exclusive, non-blocking fs2 lock on `<state_dir>/broker.lock`.
///
/// Released by [`release`](Self::release), on drop, and by the panic hook.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl SessionLock {
    /// Take the lock, or `Ok(None)` if another process holds it.
    pub fn try_acquire(state_dir: &Path) -> Result<Option<Self>> {
        std::fs::create_dir_all(state_dir)
            .map_err(|e| Error::lock(state_dir, format!("create dir: {}", e)))?;
        let path = state_dir.join(LOCK_FILENAME);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::lock(&path, e.to_string()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("Acquired session lock {:?}", path);
                Ok(Some(Self {
                    path,
                    file: Mutex::new(Some(file)),
                }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                debug!("Session lock {:?} held elsewhere", path);
                Ok(None)
            }
            Err(e) => Err(Error::lock(&path, e.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Unlock. Safe to call more than once.
    pub fn release(&self) {
        let taken = self.file.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(file) = taken {
            if let Err(e) = FileExt::unlock(&file) {
                warn!("Failed to unlock {:?}: {}", self.path, e);
            }
            info!("Released session lock {:?}", self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_is_contended() {
        let temp = tempdir().unwrap();
        let first = SessionLock::try_acquire(temp.path()).unwrap().unwrap();
        assert!(first.is_held());

        assert!(SessionLock::try_acquire(temp.path()).unwrap().is_none());

        first.release();
        assert!(!first.is_held());
        let second = SessionLock::try_acquire(temp.path()).unwrap();
        assert!(second.is_some());
    }

    #[test]
    fn test_drop_releases() {
        let temp = tempdir().unwrap();
        {
            let _lock = SessionLock::try_acquire(temp.path()).unwrap().unwrap();
        }
        assert!(SessionLock::try_acquire(temp.path()).unwrap().is_some());
    }

    #[test]
    fn test_release_is_idempotent() {
        let temp = tempdir().unwrap();
        let lock = SessionLock::try_acquire(temp.path()).unwrap().unwrap();
        lock.release();
        lock.release();
        assert!(!lock.is_held());
    }
}
