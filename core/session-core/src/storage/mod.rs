//! Storage strategies for the shared session record.
//!
//! # Backends
//!
//! - [`FileStorage`]: primary. One file, atomic writes, companion lock dir.
//! - [`KeyValueStorage`]: fallback. A JSON key-value file, no lock.
//! - [`MemoryStorage`]: in-process sharing between stores (tests, embedding).
//!
//! The strategy is picked once at startup ([`select_strategy_type`]) and the
//! engine is generic over it, so there is no per-call dispatch.
//!
//! # Contract
//!
//! `retrieve` never fails: absence, I/O errors and corruption all read as
//! `{}`. `persist` and `clear` report errors, but the serializer only logs
//! them. Only the serializer talks to a backend.

mod file;
mod key_value;
pub(crate) mod lock;
mod memory;

use std::fmt;

pub use file::FileStorage;
pub use key_value::{KeyValueStorage, SESSION_STORE_KEY};
pub use memory::MemoryStorage;

use crate::config::{SessionStoreOptions, StorageConfig};
use crate::error::Result;
use crate::record::SessionRecord;

pub trait SessionStorage {
    fn retrieve(&self) -> SessionRecord;

    fn persist(&self, record: &SessionRecord) -> Result<()>;

    fn clear(&self) -> Result<()>;

    /// Whether this backend can host an exclusive lock.
    fn supports_lock(&self) -> bool {
        false
    }

    /// Single non-blocking attempt. Re-acquiring a lock already held by
    /// `owner` succeeds.
    fn try_lock(&self, _owner: &str) -> bool {
        false
    }

    /// No-op unless `owner` holds the lock.
    fn release_lock(&self, _owner: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStrategyType {
    File,
    KeyValue,
}

impl fmt::Display for StoreStrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStrategyType::File => write!(f, "file"),
            StoreStrategyType::KeyValue => write!(f, "key-value"),
        }
    }
}

/// Prefers the file backend; falls back to the key-value store only when
/// allowed and available. `None` means no usable backend.
pub fn select_strategy_type(
    config: &StorageConfig,
    options: &SessionStoreOptions,
) -> Option<StoreStrategyType> {
    choose_strategy_type(
        FileStorage::check_availability(&config.session_file()),
        options.allow_fallback,
        || KeyValueStorage::check_availability(&config.key_value_file()),
    )
}

fn choose_strategy_type(
    file_available: bool,
    allow_fallback: bool,
    key_value_available: impl FnOnce() -> bool,
) -> Option<StoreStrategyType> {
    if file_available {
        Some(StoreStrategyType::File)
    } else if allow_fallback && key_value_available() {
        Some(StoreStrategyType::KeyValue)
    } else {
        None
    }
}

/// A backend chosen at startup.
#[derive(Debug, Clone)]
pub enum StoreStrategy {
    File(FileStorage),
    KeyValue(KeyValueStorage),
}

impl StoreStrategy {
    pub fn init(
        strategy_type: StoreStrategyType,
        config: &StorageConfig,
        options: &SessionStoreOptions,
    ) -> Self {
        match strategy_type {
            StoreStrategyType::File => {
                StoreStrategy::File(FileStorage::new(config.session_file(), &options.lock))
            }
            StoreStrategyType::KeyValue => {
                StoreStrategy::KeyValue(KeyValueStorage::new(config.key_value_file()))
            }
        }
    }

    pub fn strategy_type(&self) -> StoreStrategyType {
        match self {
            StoreStrategy::File(_) => StoreStrategyType::File,
            StoreStrategy::KeyValue(_) => StoreStrategyType::KeyValue,
        }
    }
}

impl SessionStorage for StoreStrategy {
    fn retrieve(&self) -> SessionRecord {
        match self {
            StoreStrategy::File(s) => s.retrieve(),
            StoreStrategy::KeyValue(s) => s.retrieve(),
        }
    }

    fn persist(&self, record: &SessionRecord) -> Result<()> {
        match self {
            StoreStrategy::File(s) => s.persist(record),
            StoreStrategy::KeyValue(s) => s.persist(record),
        }
    }

    fn clear(&self) -> Result<()> {
        match self {
            StoreStrategy::File(s) => s.clear(),
            StoreStrategy::KeyValue(s) => s.clear(),
        }
    }

    fn supports_lock(&self) -> bool {
        match self {
            StoreStrategy::File(s) => s.supports_lock(),
            StoreStrategy::KeyValue(s) => s.supports_lock(),
        }
    }

    fn try_lock(&self, owner: &str) -> bool {
        match self {
            StoreStrategy::File(s) => s.try_lock(owner),
            StoreStrategy::KeyValue(s) => s.try_lock(owner),
        }
    }

    fn release_lock(&self, owner: &str) {
        match self {
            StoreStrategy::File(s) => s.release_lock(owner),
            StoreStrategy::KeyValue(s) => s.release_lock(owner),
        }
    }
}
