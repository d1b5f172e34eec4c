//! Fallback backend: a versioned JSON key-value file.
//!
//! Stands in for browser local storage: several unrelated keys may live in the
//! same file, the session is just one of them. There is no companion lock, so
//! two contexts writing at once can lose an update; the watch loop repairs
//! that within one polling interval.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": { "_session": "created=...&id=...&rum=1" }
//! }
//! ```

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use super::SessionStorage;
use crate::codec;
use crate::error::{Result, SessionError};
use crate::record::SessionRecord;

pub const SESSION_STORE_KEY: &str = "_session";

const FILE_VERSION: u32 = 1;
const PROBE_KEY: &str = "_session_probe";

#[derive(Debug, Serialize, Deserialize)]
struct KeyValueFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

impl Default for KeyValueFile {
    fn default() -> Self {
        KeyValueFile {
            version: FILE_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyValueStorage {
    path: PathBuf,
    key: String,
}

impl KeyValueStorage {
    pub fn new(path: PathBuf) -> Self {
        Self::with_key(path, SESSION_STORE_KEY)
    }

    pub fn with_key(path: PathBuf, key: &str) -> Self {
        Self {
            path,
            key: key.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets, reads back and removes a probe entry.
    pub fn check_availability(path: &Path) -> bool {
        let probe = KeyValueStorage::with_key(path.to_path_buf(), PROBE_KEY);
        let written = probe.set_entry(PROBE_KEY.to_string()).is_ok()
            && probe.load().entries.get(PROBE_KEY).map(String::as_str) == Some(PROBE_KEY);
        let removed = probe.remove_entry().is_ok();
        written && removed
    }

    /// Defensive read: a missing, empty, corrupt or foreign-version file all
    /// load as an empty map.
    fn load(&self) -> KeyValueFile {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return KeyValueFile::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read key-value store, treating as empty");
                return KeyValueFile::default();
            }
        };

        if content.trim().is_empty() {
            return KeyValueFile::default();
        }

        match serde_json::from_str::<KeyValueFile>(&content) {
            Ok(file) if file.version == FILE_VERSION => file,
            Ok(file) => {
                warn!(
                    version = file.version,
                    expected = FILE_VERSION,
                    "Unsupported key-value store version, treating as empty"
                );
                KeyValueFile::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse key-value store, treating as empty");
                KeyValueFile::default()
            }
        }
    }

    fn save(&self, file: &KeyValueFile) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            SessionError::io("key-value store has no parent", ErrorKind::NotFound.into())
        })?;
        fs::create_dir_all(parent)
            .map_err(|e| SessionError::io(format!("creating {}", parent.display()), e))?;

        let content = serde_json::to_string_pretty(file)
            .map_err(|e| SessionError::json("serializing key-value store", e))?;
        let mut temp_file = NamedTempFile::new_in(parent)
            .map_err(|e| SessionError::io("creating temp key-value file", e))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| SessionError::io("writing temp key-value file", e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| SessionError::io("committing key-value file", e.error))?;
        Ok(())
    }

    fn set_entry(&self, value: String) -> Result<()> {
        let mut file = self.load();
        file.entries.insert(self.key.clone(), value);
        self.save(&file)
    }

    fn remove_entry(&self) -> Result<()> {
        let mut file = self.load();
        if file.entries.remove(&self.key).is_none() {
            return Ok(());
        }
        self.save(&file)
    }
}

impl SessionStorage for KeyValueStorage {
    fn retrieve(&self) -> SessionRecord {
        self.load()
            .entries
            .get(&self.key)
            .map(|raw| codec::decode(raw))
            .unwrap_or_default()
    }

    fn persist(&self, record: &SessionRecord) -> Result<()> {
        self.set_entry(codec::encode(record)?)
    }

    fn clear(&self) -> Result<()> {
        self.remove_entry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record() -> SessionRecord {
        [("id", "abc"), ("created", "10"), ("logs", "1")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_round_trip_and_no_lock() {
        let temp = tempdir().unwrap();
        let storage = KeyValueStorage::new(temp.path().join("kv.json"));
        assert!(!storage.supports_lock());
        assert!(!storage.try_lock("me"));

        storage.persist(&record()).unwrap();
        assert_eq!(storage.retrieve(), record());
    }

    #[test]
    fn test_other_keys_are_preserved() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("kv.json");
        std::fs::write(
            &path,
            r#"{"version":1,"entries":{"theme":"dark"}}"#,
        )
        .unwrap();

        let storage = KeyValueStorage::new(path.clone());
        storage.persist(&record()).unwrap();
        storage.clear().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"theme\": \"dark\""));
        assert!(!content.contains(SESSION_STORE_KEY));
    }

    #[test]
    fn test_corrupt_or_foreign_files_read_as_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("kv.json");
        let storage = KeyValueStorage::new(path.clone());

        std::fs::write(&path, "{invalid json}").unwrap();
        assert!(storage.retrieve().is_empty());

        std::fs::write(&path, "").unwrap();
        assert!(storage.retrieve().is_empty());

        std::fs::write(&path, r#"{"version":2,"entries":{"_session":"id=x"}}"#).unwrap();
        assert!(storage.retrieve().is_empty());

        std::fs::write(&path, r#"{"version":1,"entries":{"_session":"%%%"}}"#).unwrap();
        assert!(storage.retrieve().is_empty());
    }

    #[test]
    fn test_availability_probe_leaves_no_trace() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("kv.json");
        assert!(KeyValueStorage::check_availability(&path));
        assert!(KeyValueStorage::new(path.clone()).load().entries.is_empty());

        let blocker = temp.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();
        assert!(!KeyValueStorage::check_availability(&blocker.join("kv.json")));
    }
}
