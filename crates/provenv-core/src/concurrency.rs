use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive advisory lock held for the duration of a mutating run.
///
/// Two provenv processes on the same host targeting the same environment
/// serialize on this file. Other tools touching the registry are not covered.
pub struct ProvisionLock {
    lock_file: File,
}

impl ProvisionLock {
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(lock_path)?;

        file.lock_exclusive().map_err(|e| CoreError::Lock {
            path: lock_path.display().to_string(),
            source: e,
        })?;

        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for ProvisionLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    let lock_err = |e| CoreError::Lock {
        path: lock_path.display().to_string(),
        source: e,
    };
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(lock_err)?;
    }

    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(lock_err)
}

/// `<state_dir>/locks/<env>.lock`
pub fn lock_path(state_dir: &Path, env: &str) -> PathBuf {
    state_dir.join("locks").join(format!("{env}.lock"))
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current step...");
    });
}

/// Flag raised by the first Ctrl-C. A [`Provisioner`](crate::Provisioner)
/// polls it between steps and before each retry.
pub fn shutdown_flag() -> &'static AtomicBool {
    &SHUTDOWN_REQUESTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "audio-features");

        {
            let _lock = ProvisionLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "audio-features");

        let _lock = ProvisionLock::acquire(&path).unwrap();
        let result = ProvisionLock::try_acquire(&path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path(), "audio-features");

        {
            let _lock = ProvisionLock::acquire(&path).unwrap();
        }

        let lock2 = ProvisionLock::try_acquire(&path).unwrap();
        assert!(lock2.is_some());
    }

    #[test]
    fn locks_are_per_environment() {
        let dir = tempfile::tempdir().unwrap();
        let _a = ProvisionLock::acquire(&lock_path(dir.path(), "a")).unwrap();
        let b = ProvisionLock::try_acquire(&lock_path(dir.path(), "b")).unwrap();
        assert!(b.is_some());
    }

    #[test]
    fn lock_path_layout() {
        assert_eq!(
            lock_path(Path::new("/state"), "audio-features"),
            PathBuf::from("/state/locks/audio-features.lock")
        );
    }
}
