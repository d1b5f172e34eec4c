//! Primary backend: one file holding the encoded record.
//!
//! Writes go through a temp file + rename so a sibling reading concurrently
//! sees either the old record or the new one, never a torn write. This is the
//! only backend that can host the companion lock.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::warn;

use super::lock::LockDir;
use super::SessionStorage;
use crate::codec;
use crate::config::LockOptions;
use crate::error::{Result, SessionError};
use crate::record::SessionRecord;

const PROBE_CONTENT: &str = "probe=1";

#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    lock: LockDir,
}

impl FileStorage {
    pub fn new(path: PathBuf, lock: &LockOptions) -> Self {
        let lock = LockDir::for_file(&path, lock.stale_after_ms);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Writes, reads back and removes a probe file next to `path`.
    pub fn check_availability(path: &Path) -> bool {
        let Some(dir) = path.parent() else {
            return false;
        };
        let probe = dir.join(format!(".probe-{}", std::process::id()));
        let available = fs::create_dir_all(dir).is_ok()
            && fs::write(&probe, PROBE_CONTENT).is_ok()
            && fs::read_to_string(&probe).is_ok_and(|c| c == PROBE_CONTENT);
        let _ = fs::remove_file(&probe);
        available
    }

    fn ensure_parent(&self) -> Result<&Path> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| SessionError::io("session file has no parent", ErrorKind::NotFound.into()))?;
        fs::create_dir_all(parent)
            .map_err(|e| SessionError::io(format!("creating {}", parent.display()), e))?;
        Ok(parent)
    }
}

impl SessionStorage for FileStorage {
    fn retrieve(&self) -> SessionRecord {
        match fs::read_to_string(&self.path) {
            Ok(content) => codec::decode(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => SessionRecord::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read session file, treating as no session");
                SessionRecord::new()
            }
        }
    }

    fn persist(&self, record: &SessionRecord) -> Result<()> {
        let content = codec::encode(record)?;
        let parent = self.ensure_parent()?;

        let mut temp_file = NamedTempFile::new_in(parent)
            .map_err(|e| SessionError::io("creating temp session file", e))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| SessionError::io("writing temp session file", e))?;
        temp_file
            .flush()
            .map_err(|e| SessionError::io("flushing temp session file", e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| SessionError::io("committing session file", e.error))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::io("removing session file", e)),
        }
    }

    fn supports_lock(&self) -> bool {
        true
    }

    fn try_lock(&self, owner: &str) -> bool {
        if self.ensure_parent().is_err() {
            return false;
        }
        self.lock.try_acquire(owner)
    }

    fn release_lock(&self, owner: &str) {
        self.lock.release(owner);
    }
}
