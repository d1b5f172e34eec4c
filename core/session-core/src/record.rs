//! The shared session record.
//!
//! A flat string map. Three keys are reserved; every other key belongs to a
//! product and holds that product's last tracking type.
//!
//! ```text
//! id=01HZX...&created=1717000000000&expire=1717000900000&rum=1&logs=0
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ID_KEY: &str = "id";
pub const CREATED_KEY: &str = "created";
pub const EXPIRE_KEY: &str = "expire";

/// `{}` means "no session".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRecord {
    entries: BTreeMap<String, String>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn id(&self) -> Option<&str> {
        self.get(ID_KEY)
    }

    pub fn created(&self) -> Option<&str> {
        self.get(CREATED_KEY)
    }

    pub fn expire(&self) -> Option<&str> {
        self.get(EXPIRE_KEY)
    }

    /// Active iff neither the absolute timeout nor the sliding deadline has
    /// passed. Missing timestamps don't count against the record (older
    /// writers never stored them); unparsable ones do.
    pub fn is_active(&self, now_ms: i64, timeout_ms: i64) -> bool {
        let created_ok = match self.created() {
            None => true,
            Some(raw) => raw
                .parse::<i64>()
                .is_ok_and(|created| {
                    now_ms
                        .checked_sub(created)
                        .is_some_and(|age| age < timeout_ms)
                }),
        };
        let expire_ok = match self.expire() {
            None => true,
            Some(raw) => raw.parse::<i64>().is_ok_and(|expire| now_ms < expire),
        };
        created_ok && expire_ok
    }

    /// Returns the record unchanged if active, `{}` otherwise.
    pub fn into_active(self, now_ms: i64, timeout_ms: i64) -> Self {
        if self.is_active(now_ms, timeout_ms) {
            self
        } else {
            SessionRecord::new()
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SessionRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        SessionRecord {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
