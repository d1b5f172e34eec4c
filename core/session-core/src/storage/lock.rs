//! Companion lock directory for the file backend.
//!
//! A lock is held by whoever managed to create `<record>.lock/`. Directory
//! creation is atomic on every filesystem we care about, which is what makes
//! this usable across processes without any other coordination.
//!
//! ```text
//! session.lock/
//! └── owner.json   # { owner, pid, created }
//! ```
//!
//! # Stale Locks
//!
//! A process can die between acquire and release. A lock is stale when its
//! owner pid is gone, or when it is older than `stale_after_ms`. A directory
//! without readable metadata is only stale once its mtime is that old, since
//! the owner may still be writing `owner.json`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::debug;

const OWNER_FILE: &str = "owner.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LockMeta {
    pub owner: String,
    pub pid: u32,
    /// Wall clock milliseconds at acquisition.
    pub created: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct LockDir {
    path: PathBuf,
    stale_after_ms: u64,
}

pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl LockDir {
    /// Lock directory sitting next to `record_file`.
    pub fn for_file(record_file: &Path, stale_after_ms: u64) -> Self {
        let mut name = record_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        Self {
            path: record_file.with_file_name(name),
            stale_after_ms,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One acquisition attempt. Never blocks.
    pub fn try_acquire(&self, owner: &str) -> bool {
        match fs::create_dir(&self.path) {
            Ok(()) => self.claim(owner),
            Err(ref e) if e.kind() == ErrorKind::AlreadyExists => {
                match self.read_meta() {
                    Some(meta) if meta.owner == owner => return true,
                    Some(meta) if !self.is_meta_stale(&meta) => return false,
                    None if !self.is_dir_stale() => return false,
                    _ => {}
                }

                debug!(path = %self.path.display(), "Taking over stale session lock");
                let _ = fs::remove_dir_all(&self.path);
                fs::create_dir(&self.path).is_ok() && self.claim(owner)
            }
            Err(e) => {
                debug!(error = %e, path = %self.path.display(), "Session lock unavailable");
                false
            }
        }
    }

    /// Releases the lock only if `owner` still holds it.
    pub fn release(&self, owner: &str) {
        match self.read_meta() {
            Some(meta) if meta.owner == owner => {
                if let Err(e) = fs::remove_dir_all(&self.path) {
                    debug!(error = %e, "Failed to release session lock");
                }
            }
            _ => debug!(owner = %owner, "Session lock no longer ours, leaving it"),
        }
    }

    pub fn read_meta(&self) -> Option<LockMeta> {
        let content = fs::read_to_string(self.path.join(OWNER_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn claim(&self, owner: &str) -> bool {
        let meta = LockMeta {
            owner: owner.to_string(),
            pid: std::process::id(),
            created: now_ms(),
        };
        match self.write_meta(&meta) {
            Ok(()) => true,
            Err(e) => {
                // Clean up on metadata write failure
                debug!(error = %e, "Failed to write session lock metadata");
                let _ = fs::remove_dir_all(&self.path);
                false
            }
        }
    }

    pub(crate) fn write_meta(&self, meta: &LockMeta) -> std::io::Result<()> {
        let content = serde_json::to_string(meta).map_err(std::io::Error::other)?;
        fs::write(self.path.join(OWNER_FILE), content)
    }

    fn is_meta_stale(&self, meta: &LockMeta) -> bool {
        if !is_pid_alive(meta.pid) {
            return true;
        }
        now_ms().saturating_sub(meta.created) > self.stale_after_ms as i64
    }

    fn is_dir_stale(&self) -> bool {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            // Can't tell how old it is; someone else is likely mid-acquire.
            Err(_) => return false,
        };
        let mtime_ms = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        now.saturating_sub(mtime_ms) > self.stale_after_ms as i64
    }
}
