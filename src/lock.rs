use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{AuditError, Result};

pub const ROOT_LOCK_NAME: &str = ".audit.lock";

/// Exclusive advisory lock on an audit root, held for the duration of a batch pass or sweep.
/// Released on Drop (fs2 unlocks when the fd closes).
pub struct RootLockGuard {
    _file: File,
    lock_path: PathBuf,
}

impl RootLockGuard {
    /// Acquire the lock, blocking while another process holds it.
    pub fn acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| AuditError::io(root, e))?;
        let lock_path = root.join(ROOT_LOCK_NAME);
        let file = File::create(&lock_path).map_err(|e| AuditError::io(&lock_path, e))?;

        if file.try_lock_exclusive().is_err() {
            tracing::debug!(lock = %lock_path.display(), "audit root busy, waiting for lock");
            file.lock_exclusive()
                .map_err(|e| AuditError::io(&lock_path, e))?;
        }

        Ok(Self {
            _file: file,
            lock_path,
        })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_lock_file_in_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("audit");
        let guard = RootLockGuard::acquire(&root).unwrap();
        assert_eq!(guard.lock_path(), root.join(ROOT_LOCK_NAME));
        assert!(guard.lock_path().exists());
    }

    #[test]
    fn sequential_acquire_succeeds() {
        let tmp = TempDir::new().unwrap();
        {
            let _g1 = RootLockGuard::acquire(tmp.path()).unwrap();
        }
        {
            let _g2 = RootLockGuard::acquire(tmp.path()).unwrap();
        }
    }

    #[test]
    fn concurrent_holders_are_serialized() {
        let tmp = TempDir::new().unwrap();
        let root = Arc::new(tmp.path().to_path_buf());
        let barrier = Arc::new(Barrier::new(4));
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let root = Arc::clone(&root);
            let barrier = Arc::clone(&barrier);
            let inside = Arc::clone(&inside);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                let _guard = RootLockGuard::acquire(&root).unwrap();
                let before = inside.fetch_add(1, Ordering::SeqCst);
                assert_eq!(before, 0, "two holders inside the lock at once");
                std::thread::sleep(std::time::Duration::from_millis(10));
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
