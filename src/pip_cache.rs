//! Shared pip cache locking
//!
//! Multiple build contexts may share one pip cache directory. pip's cache
//! index does not tolerate concurrent writers, so the dependency-install
//! stage holds an exclusive flock on a sentinel file inside the cache for
//! its duration. Within a single pipeline run there is only one writer;
//! the lock matters when separate builds overlap.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

/// Exclusive hold on the shared pip cache. Released on drop.
pub struct CacheLock {
    #[cfg(unix)]
    _guard: nix::fcntl::Flock<fs::File>,
}

impl CacheLock {
    /// Create the cache directory if needed and take the exclusive lock,
    /// blocking until it is available.
    pub fn acquire(cache_dir: &Path) -> Result<Self> {
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("failed to create pip cache dir {}", cache_dir.display()))?;
        let lock_path = cache_dir.join(".provision-lock");

        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use nix::fcntl::{Flock, FlockArg};

                let lock_file = fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&lock_path)
                    .with_context(|| {
                        format!("failed to open cache lock file {}", lock_path.display())
                    })?;

                info!("acquiring exclusive lock on {}", lock_path.display());
                let guard = Flock::lock(lock_file, FlockArg::LockExclusive).map_err(|(_, err)| {
                    anyhow::anyhow!("failed to acquire exclusive pip cache lock: {err}")
                })?;
                Ok(CacheLock { _guard: guard })
            } else {
                // No advisory locking here; builds on these platforms are
                // assumed to be the only writer.
                let _ = lock_path;
                Ok(CacheLock {})
            }
        }
    }
}
