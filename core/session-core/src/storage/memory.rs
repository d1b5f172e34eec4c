//! In-process shared backend.
//!
//! Clones share one cell, so several `SessionStore`s in the same process (or
//! the same test) behave like sibling contexts on one shared resource. The
//! stored value is the encoded string, not the record, so the codec is
//! exercised exactly as it is against a real backend.

use std::sync::{Arc, Mutex, MutexGuard};

use super::SessionStorage;
use crate::codec;
use crate::error::Result;
use crate::record::SessionRecord;

#[derive(Debug, Default)]
struct MemoryCell {
    value: Option<String>,
    lock_owner: Option<String>,
    reads: usize,
    writes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    cell: Arc<Mutex<MemoryCell>>,
    lockable: bool,
}

impl MemoryStorage {
    /// A backend without lock support (like the key-value fallback).
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that can host the companion lock.
    pub fn with_lock() -> Self {
        Self {
            cell: Arc::default(),
            lockable: true,
        }
    }

    fn cell(&self) -> MutexGuard<'_, MemoryCell> {
        self.cell.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raw stored string, bypassing the codec.
    pub fn raw(&self) -> Option<String> {
        self.cell().value.clone()
    }

    /// Overwrites the stored string, bypassing the codec and the counters.
    pub fn set_raw(&self, raw: &str) {
        self.cell().value = Some(raw.to_string());
    }

    pub fn lock_owner(&self) -> Option<String> {
        self.cell().lock_owner.clone()
    }

    pub fn read_count(&self) -> usize {
        self.cell().reads
    }

    pub fn write_count(&self) -> usize {
        self.cell().writes
    }
}

impl SessionStorage for MemoryStorage {
    fn retrieve(&self) -> SessionRecord {
        let mut cell = self.cell();
        cell.reads += 1;
        cell.value
            .as_deref()
            .map(codec::decode)
            .unwrap_or_default()
    }

    fn persist(&self, record: &SessionRecord) -> Result<()> {
        let encoded = codec::encode(record)?;
        let mut cell = self.cell();
        cell.writes += 1;
        cell.value = Some(encoded);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut cell = self.cell();
        cell.writes += 1;
        cell.value = None;
        Ok(())
    }

    fn supports_lock(&self) -> bool {
        self.lockable
    }

    fn try_lock(&self, owner: &str) -> bool {
        if !self.lockable {
            return false;
        }
        let mut cell = self.cell();
        match cell.lock_owner.as_deref() {
            None => {
                cell.lock_owner = Some(owner.to_string());
                true
            }
            Some(current) => current == owner,
        }
    }

    fn release_lock(&self, owner: &str) {
        let mut cell = self.cell();
        if cell.lock_owner.as_deref() == Some(owner) {
            cell.lock_owner = None;
        }
    }
}
