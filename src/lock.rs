use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

/// Locks older than this are left over from a crashed run.
const STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// Exclusive lock file held across a cycle's read-decide-write sequence.
/// Released on drop.
#[derive(Debug)]
pub struct CycleLock {
    path: PathBuf,
}

impl CycleLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !is_stale(path) {
                    bail!(
                        "Another run holds {}; refusing to overlap. \
                         Remove the file if no other run is active.",
                        path.display()
                    );
                }
                Self::take_over(path)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create lock {}", path.display())),
        }
    }

    /// Moves the stale lock aside with a rename, so only one run can claim
    /// it, then competes for a fresh lock through `create_new` like any
    /// other run.
    fn take_over(path: &Path) -> Result<Self> {
        let aside = path.with_extension(format!("stale.{}", std::process::id()));

        match fs::rename(path, &aside) {
            Ok(()) => {
                // Another run may have replaced the stale lock between our
                // check and the rename. Its lock is fresh: hand it back.
                if !is_stale(&aside) {
                    let _ = fs::hard_link(&aside, path);
                    let _ = fs::remove_file(&aside);
                    bail!(
                        "Another run took over {} first; refusing to overlap.",
                        path.display()
                    );
                }
                warn!(path = %path.display(), "Taking over stale lock file");
                fs::remove_file(&aside)
                    .with_context(|| format!("Failed to remove stale lock {}", aside.display()))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Stale lock already removed by another run");
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to move stale lock {}", path.display()));
            }
        }

        Self::create(path).with_context(|| format!("Failed to create lock {}", path.display()))
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            drop(file);
            let _ = fs::remove_file(path);
            return Err(e);
        }
        debug!(path = %path.display(), "Lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_AFTER)
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock file");
        } else {
            debug!(path = %self.path.display(), "Lock released");
        }
    }
}
