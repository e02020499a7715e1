//! Scratch Space Manager - 高速临时存储管理
//!
//! Intermediate artifacts (event streams, reconstructions, Y4M copies) are
//! large and rewritten for every work item, so they live on a fast,
//! usually memory-backed root such as `/dev/shm`. The manager owns one
//! session directory under that root for the whole run; every work item
//! gets its own region inside it:
//!
//! ```text
//! <root>/adder_sweep_<timestamp>_<pid>_<seq>/
//!     0001_t000_clips_a.mp4/
//!     0002_t000_clips_b.mp4/
//!     0003_t010_clips_a.mp4/
//! ```
//!
//! The 1-based sweep index makes region names unique within a session, so
//! the same file at two thresholds can never share a path.

use crate::error::{HarnessError, Result};
use crate::sweep::WorkItem;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

const SESSION_PREFIX: &str = "adder_sweep";
const MAX_NAME_CHARS: usize = 80;

static SESSION_SEQ: AtomicU32 = AtomicU32::new(0);

#[derive(Debug)]
pub struct ScratchManager {
    session: PathBuf,
}

impl ScratchManager {
    /// Verify the root and create this run's session directory.
    ///
    /// Fails with `StorageUnavailable` when the root does not exist, is not a
    /// directory, or cannot be written to.
    pub fn open(root: &Path) -> Result<Self> {
        let unavailable = |reason: String| HarnessError::StorageUnavailable {
            path: root.to_path_buf(),
            reason,
        };

        let metadata = fs::metadata(root).map_err(|e| unavailable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }

        // 写入探测：只读挂载或权限不足时在启动阶段就失败
        tempfile::Builder::new()
            .prefix(".adder_sweep_write_check")
            .tempfile_in(root)
            .map_err(|e| unavailable(format!("not writable: {}", e)))?;

        let session = root.join(format!(
            "{}_{}_{}_{}",
            SESSION_PREFIX,
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            std::process::id(),
            SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir(&session)
            .map_err(|e| unavailable(format!("cannot create {}: {}", session.display(), e)))?;

        info!(root = %root.display(), session = %session.display(), "Scratch storage ready");
        Ok(Self { session })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session
    }

    /// Create the empty region for `item`.
    pub fn acquire(&self, item: &WorkItem) -> Result<ScratchRegion> {
        let path = self.session.join(region_name(item));
        // create_dir (not create_dir_all) so an existing path is an error, never reused
        fs::create_dir(&path).map_err(|e| HarnessError::StorageUnavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!(region = %path.display(), "Acquired scratch region");
        Ok(ScratchRegion {
            path,
            released: false,
        })
    }

    /// Remove the session directory if nothing was retained inside it.
    pub fn close(self) -> Result<()> {
        let retained = fs::read_dir(&self.session)
            .map(|entries| entries.count())
            .unwrap_or(0);
        if retained > 0 {
            info!(
                session = %self.session.display(),
                retained,
                "Scratch session kept, it still holds retained regions"
            );
            return Ok(());
        }
        fs::remove_dir(&self.session).map_err(|source| HarnessError::CleanupFailed {
            path: self.session.clone(),
            source,
        })
    }
}

/// `<index:04>_t<threshold:03>_<sanitized file>`
pub fn region_name(item: &WorkItem) -> String {
    let sanitized: String = item
        .file
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_CHARS)
        .collect();
    format!(
        "{:04}_t{:03}_{}",
        item.index,
        item.threshold.value(),
        sanitized
    )
}

/// One work item's scratch subtree. Removed on `release()`, or best-effort
/// on drop if neither `release()` nor `retain()` was called.
#[derive(Debug)]
pub struct ScratchRegion {
    path: PathBuf,
    released: bool,
}

impl ScratchRegion {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_dir_all(&self.path).map_err(|source| HarnessError::CleanupFailed {
            path: self.path.clone(),
            source,
        })?;
        debug!(region = %self.path.display(), "Released scratch region");
        Ok(())
    }

    /// Leave the region on disk for inspection and return its path.
    pub fn retain(mut self) -> PathBuf {
        self.released = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchRegion {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(region = %self.path.display(), error = %e, "Failed to remove scratch region on drop");
        }
    }
}
