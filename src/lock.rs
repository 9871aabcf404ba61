//! Advisory file Lock Manager (spec §4.C).
//!
//! Locking is implemented on top of OS `flock` semantics via the `file-lock`
//! crate: the lock is held for the lifetime of a `FileLock` guard and the
//! kernel releases it automatically if the holding process dies, which is
//! exactly the "stale lock reclaimable" guarantee the spec asks for — no
//! manual PID bookkeeping is required for correctness. A PID/timestamp is
//! still written into the lock file's contents purely as an operator
//! diagnostic for `health`.
//!
//! Acquisition is polled rather than blocking so a `timeout` can be
//! enforced; `with_lock` itself is the single place the Claim Engine and
//! Retention Engine route all their writes through, so at most one lock is
//! ever held at a time (locks are not reentrant).

use crate::error::{SwarmError, SwarmResult};
use file_lock::{FileLock, FileOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct LockManager;

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self
    }

    /// Acquires the lock paired with `protected_path`, runs `f` to
    /// completion on a blocking thread, and guarantees the lock is released
    /// whether `f` succeeds, returns an error, or panics.
    #[instrument(skip(self, f))]
    pub async fn with_lock<F, T>(&self, protected_path: &Path, timeout: Duration, f: F) -> SwarmResult<T>
    where
        F: FnOnce() -> SwarmResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let lock_path = lock_file_path(protected_path);
        let deadline = Instant::now() + timeout;

        loop {
            match try_acquire(&lock_path) {
                Ok(guard) => {
                    debug!(path = ?protected_path, "lock acquired");
                    let lock_path_for_blocking = lock_path.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        let mut guard = guard;
                        let result = f();
                        if let Err(e) = guard.unlock() {
                            warn!(path = ?lock_path_for_blocking, error = %e, "failed to release lock file");
                        }
                        result
                    })
                    .await;

                    return match outcome {
                        Ok(result) => result,
                        Err(join_err) => Err(SwarmError::io(
                            lock_path,
                            io::Error::new(io::ErrorKind::Other, join_err.to_string()),
                        )),
                    };
                }
                Err(_busy) => {
                    if Instant::now() >= deadline {
                        return Err(SwarmError::LockTimeout {
                            path: protected_path.to_path_buf(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
    }
}

fn lock_file_path(protected: &Path) -> PathBuf {
    let mut name = protected.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn try_acquire(lock_path: &Path) -> io::Result<FileLock> {
    let options = FileOptions::new().write(true).create(true).truncate(true);
    let path_str = lock_path
        .to_str()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "non-utf8 lock path"))?;
    let mut lock = FileLock::lock(path_str, false, options)?;
    let _ = std::io::Write::write_all(&mut lock.file, format!("pid={}\n", std::process::id()).as_bytes());
    Ok(lock)
}
