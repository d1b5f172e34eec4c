//! Engine options and storage paths.
//!
//! Options live in `~/.session-store/config.json`; every field is optional and
//! falls back to the defaults below. Paths are centralized in
//! [`StorageConfig`] so tests can point a whole engine at a temp dir.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

pub const ONE_SECOND_MS: u64 = 1_000;
pub const ONE_MINUTE_MS: u64 = 60 * ONE_SECOND_MS;
pub const ONE_HOUR_MS: u64 = 60 * ONE_MINUTE_MS;

/// Absolute session lifetime, counted from `created`.
pub const SESSION_TIME_OUT_DELAY: u64 = 4 * ONE_HOUR_MS;
/// Watch loop period and throttle window.
pub const POLL_DELAY: u64 = ONE_SECOND_MS;

pub const LOCK_RETRY_DELAY: u64 = 10;
pub const LOCK_MAX_ATTEMPTS: u32 = 100;
pub const LOCK_MAX_WAIT: u64 = ONE_SECOND_MS;
pub const LOCK_STALE_AFTER: u64 = 5 * ONE_SECOND_MS;

/// What the watch loop does when it finds an active session for this product
/// that the local cache doesn't hold yet (typically written by a sibling).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchAdoption {
    /// Adopt it and fire `renewed` if it carries an id.
    #[default]
    Notify,
    /// Adopt it without notifying.
    Silent,
    /// Leave the cache alone until the next explicit call.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    pub retry_delay_ms: u64,
    pub max_attempts: u32,
    /// Total spin budget; once spent the cycle proceeds without the lock.
    pub max_wait_ms: u64,
    /// File locks older than this are considered abandoned.
    pub stale_after_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retry_delay_ms: LOCK_RETRY_DELAY,
            max_attempts: LOCK_MAX_ATTEMPTS,
            max_wait_ms: LOCK_MAX_WAIT,
            stale_after_ms: LOCK_STALE_AFTER,
        }
    }
}

impl LockOptions {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStoreOptions {
    pub poll_interval_ms: u64,
    pub session_timeout_ms: u64,
    /// Use the key-value store when the primary file store is unavailable.
    pub allow_fallback: bool,
    pub watch_adoption: WatchAdoption,
    pub lock: LockOptions,
}

impl Default for SessionStoreOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_DELAY,
            session_timeout_ms: SESSION_TIME_OUT_DELAY,
            allow_fallback: true,
            watch_adoption: WatchAdoption::default(),
            lock: LockOptions::default(),
        }
    }
}

impl SessionStoreOptions {
    pub fn poll_interval(&self) -> i64 {
        self.poll_interval_ms.max(1) as i64
    }

    pub fn session_timeout(&self) -> i64 {
        self.session_timeout_ms as i64
    }
}

/// Reads options, failing on I/O or parse errors.
pub fn read_options(path: &Path) -> Result<SessionStoreOptions> {
    let content = fs::read_to_string(path)
        .map_err(|e| SessionError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&content).map_err(|e| SessionError::ConfigMalformed {
        path: path.to_path_buf(),
        details: e.to_string(),
    })
}

/// Loads options, returning defaults if the file doesn't exist or is malformed.
pub fn load_options(path: &Path) -> SessionStoreOptions {
    if !path.exists() {
        return SessionStoreOptions::default();
    }
    match read_options(path) {
        Ok(options) => options,
        Err(err) => {
            tracing::warn!(error = %err, "Ignoring session store config, using defaults");
            SessionStoreOptions::default()
        }
    }
}

/// Saves options as pretty JSON, creating the parent directory if needed.
pub fn save_options(path: &Path, options: &SessionStoreOptions) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SessionError::io(format!("creating {}", parent.display()), e))?;
    }
    let content = serde_json::to_string_pretty(options)
        .map_err(|e| SessionError::json("serializing options", e))?;
    fs::write(path, content).map_err(|e| SessionError::io(format!("writing {}", path.display()), e))
}

/// Central configuration for all session store paths.
///
/// Production code uses `StorageConfig::from_home()` which points to
/// `~/.session-store/`. Tests use `StorageConfig::with_root(temp_dir)`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(SessionError::NoHomeDir)?;
        Ok(Self {
            root: home.join(".session-store"),
        })
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Primary backend: the encoded record, nothing else.
    pub fn session_file(&self) -> PathBuf {
        self.root.join("session")
    }

    /// Fallback backend: JSON key-value map.
    pub fn key_value_file(&self) -> PathBuf {
        self.root.join("local-storage.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
