//! String form of [`SessionRecord`]: `key=value` entries joined with `&`.
//!
//! Decoding is lenient (entries that don't match the grammar are dropped, so
//! garbage decodes to `{}`). Encoding is strict: anything the decoder would
//! drop is rejected up front, which keeps persisted records lossless.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SessionError};
use crate::record::SessionRecord;

const ENTRY_SEPARATOR: char = '&';

static ENTRY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9_]+)=([a-zA-Z0-9_.:\-]+)$").expect("valid regex"));

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid regex"));

/// True if `key` survives an encode/decode round trip as an entry key.
pub fn is_valid_key(key: &str) -> bool {
    KEY_PATTERN.is_match(key)
}

pub fn encode(record: &SessionRecord) -> Result<String> {
    let mut entries = Vec::with_capacity(record.len());
    for (key, value) in record.iter() {
        let entry = format!("{}={}", key, value);
        if !ENTRY_PATTERN.is_match(&entry) {
            return Err(SessionError::InvalidEntry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        entries.push(entry);
    }
    Ok(entries.join("&"))
}

pub fn decode(raw: &str) -> SessionRecord {
    let mut record = SessionRecord::new();
    for entry in raw.trim().split(ENTRY_SEPARATOR) {
        if let Some(captures) = ENTRY_PATTERN.captures(entry) {
            record.set(&captures[1], &captures[2]);
        } else if !entry.is_empty() {
            tracing::debug!(entry = %entry, "Dropping malformed session entry");
        }
    }
    record
}
