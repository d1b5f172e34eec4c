//! # session-core
//!
//! Keeps one small session record consistent across independent contexts
//! (processes, threads, test fixtures) that share nothing but a storage
//! backend.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime and no background threads. Every
//!   read-modify-write cycle runs to completion inside one call; callers drive
//!   time through [`SessionStore::poll`].
//! - **One owner per cache**: each context owns its [`SessionStore`]; contexts
//!   only ever talk through the backend.
//! - **Graceful degradation**: missing or corrupt records read as `{}`, a busy
//!   lock degrades to a lock-free cycle, failed writes are logged. Nothing in
//!   normal operation returns an error to the caller.
//! - **Bounded staleness**: a cache may lag the shared record by at most one
//!   polling interval.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use session_core::{SessionStore, StorageConfig, StoreStrategy, TrackingDecision};
//!
//! let config = StorageConfig::from_home()?;
//! let options = session_core::load_options(&config.config_file());
//! let strategy_type = session_core::select_strategy_type(&config, &options).unwrap();
//! let storage = StoreStrategy::init(strategy_type, &config, &options);
//!
//! let mut store = SessionStore::builder(storage, "rum", |_: Option<&str>| {
//!     TrackingDecision::tracked("1")
//! })
//! .options(options)
//! .start()?;
//!
//! store.renewed().subscribe(|_| println!("new session"));
//! store.expand_or_renew_session();
//! loop {
//!     store.poll();
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod observable;
pub mod operations;
pub mod providers;
pub mod record;
pub mod session_store;
pub mod storage;
pub mod throttle;
pub mod timer;

// Re-export commonly used items at crate root
pub use config::{
    load_options, read_options, save_options, LockOptions, SessionStoreOptions, StorageConfig,
    WatchAdoption, POLL_DELAY, SESSION_TIME_OUT_DELAY,
};
pub use error::{Result, SessionError};
pub use observable::{Observable, Subscription};
pub use operations::{OperationSerializer, SessionOperation};
pub use providers::{Clock, IdGenerator, ManualClock, SequenceIds, SystemClock, UlidGenerator};
pub use record::SessionRecord;
pub use session_store::{SessionClassifier, SessionStore, SessionStoreBuilder, TrackingDecision};
pub use storage::{
    select_strategy_type, FileStorage, KeyValueStorage, MemoryStorage, SessionStorage,
    StoreStrategy, StoreStrategyType, SESSION_STORE_KEY,
};
