//! Read-modify-write cycles against the shared record.
//!
//! Every write to a backend goes through [`OperationSerializer`]. One cycle:
//!
//! ```text
//! [lock] → retrieve → process → [persist] → [unlock] → after(settled)
//! ```
//!
//! The section between retrieve and persist is synchronous, which keeps the
//! window for a sibling's write to slip in as small as possible. The lock is
//! advisory: it is only attempted when the backend supports it, spin-retried
//! within a bounded budget, and abandoned (with a warning) once the budget is
//! spent. Without it two contexts can race and one write is lost; the next
//! watch cycle resynchronizes both.

use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::LockOptions;
use crate::providers::SharedIds;
use crate::record::SessionRecord;
use crate::storage::SessionStorage;

pub trait SessionOperation {
    /// `None` leaves the stored record untouched.
    fn process(&mut self, current: &SessionRecord) -> Option<SessionRecord>;

    /// Sees the settled record whether or not a write happened.
    fn after(&mut self, _settled: &SessionRecord) {}
}

impl<F> SessionOperation for F
where
    F: FnMut(&SessionRecord) -> Option<SessionRecord>,
{
    fn process(&mut self, current: &SessionRecord) -> Option<SessionRecord> {
        self(current)
    }
}

pub struct OperationSerializer<S> {
    storage: S,
    lock: LockOptions,
    ids: SharedIds,
}

impl<S: SessionStorage> OperationSerializer<S> {
    pub fn new(storage: S, lock: LockOptions, ids: SharedIds) -> Self {
        Self { storage, lock, ids }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Reads without a cycle. Used once at startup to seed a cache.
    pub fn retrieve(&self) -> SessionRecord {
        self.storage.retrieve()
    }

    /// Runs one cycle and returns the settled record.
    pub fn run<O: SessionOperation + ?Sized>(&self, operation: &mut O) -> SessionRecord {
        let token = if self.storage.supports_lock() {
            self.acquire_lock()
        } else {
            None
        };

        let current = self.storage.retrieve();
        let next = operation.process(&current);
        if let Some(next) = &next {
            if let Err(err) = self.storage.persist(next) {
                warn!(
                    error = %err,
                    "Failed to persist session, cache follows candidate until next watch cycle"
                );
            }
        }

        if let Some(token) = &token {
            self.storage.release_lock(token);
        }

        let settled = next.unwrap_or(current);
        operation.after(&settled);
        settled
    }

    /// Clears the shared record.
    pub fn clear(&self) {
        if let Err(err) = self.storage.clear() {
            warn!(error = %err, "Failed to clear session");
        }
    }

    fn acquire_lock(&self) -> Option<String> {
        let token = self.ids.new_id();
        let started = Instant::now();
        let attempts = self.lock.max_attempts.max(1);

        for attempt in 1..=attempts {
            if self.storage.try_lock(&token) {
                if attempt > 1 {
                    debug!(attempt, "Session lock acquired after retry");
                }
                return Some(token);
            }
            if attempt == attempts || started.elapsed() >= self.lock.max_wait() {
                break;
            }
            thread::sleep(self.lock.retry_delay());
        }

        warn!(
            waited_ms = started.elapsed().as_millis() as u64,
            "Session lock not acquired, continuing without it"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::SequenceIds;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn fast_lock() -> LockOptions {
        LockOptions {
            retry_delay_ms: 1,
            max_attempts: 3,
            max_wait_ms: 50,
            ..LockOptions::default()
        }
    }

    fn serializer(storage: &MemoryStorage) -> OperationSerializer<MemoryStorage> {
        OperationSerializer::new(storage.clone(), fast_lock(), Arc::new(SequenceIds::new("lock-")))
    }

    fn keep() -> impl FnMut(&SessionRecord) -> Option<SessionRecord> {
        |_| None
    }

    fn write(record: SessionRecord) -> impl FnMut(&SessionRecord) -> Option<SessionRecord> {
        move |_| Some(record.clone())
    }

    struct Recording {
        next: Option<SessionRecord>,
        seen: Option<SessionRecord>,
        settled: Option<SessionRecord>,
    }

    impl SessionOperation for Recording {
        fn process(&mut self, current: &SessionRecord) -> Option<SessionRecord> {
            self.seen = Some(current.clone());
            self.next.clone()
        }

        fn after(&mut self, settled: &SessionRecord) {
            self.settled = Some(settled.clone());
        }
    }

    #[test]
    fn test_none_skips_write_and_settles_current() {
        let storage = MemoryStorage::new();
        storage.persist(&[("id", "x")].into_iter().collect()).unwrap();
        let mut op = Recording {
            next: None,
            seen: None,
            settled: None,
        };

        let settled = serializer(&storage).run(&mut op);

        assert_eq!(settled.id(), Some("x"));
        assert_eq!(op.settled, Some(settled));
        assert_eq!(storage.write_count(), 1);
        assert_eq!(storage.read_count(), 1);
    }

    #[test]
    fn test_candidate_is_persisted_and_settled() {
        let storage = MemoryStorage::new();
        let candidate: SessionRecord = [("rum", "1")].into_iter().collect();
        let mut op = Recording {
            next: Some(candidate.clone()),
            seen: None,
            settled: None,
        };

        serializer(&storage).run(&mut op);

        assert_eq!(op.seen, Some(SessionRecord::new()));
        assert_eq!(op.settled, Some(candidate.clone()));
        assert_eq!(storage.retrieve(), candidate);
    }

    #[test]
    fn test_closures_are_operations() {
        let storage = MemoryStorage::new();
        let mut op = |current: &SessionRecord| {
            let mut next = current.clone();
            next.set("logs", "0");
            Some(next)
        };
        let settled = serializer(&storage).run(&mut op);
        assert_eq!(settled.get("logs"), Some("0"));
    }

    #[test]
    fn test_lock_is_released_after_cycle() {
        let storage = MemoryStorage::with_lock();
        serializer(&storage).run(&mut keep());
        assert_eq!(storage.lock_owner(), None);
    }

    #[test]
    fn test_held_lock_degrades_to_lock_free_cycle() {
        let storage = MemoryStorage::with_lock();
        assert!(storage.try_lock("sibling"));

        let settled = serializer(&storage).run(&mut write([("rum", "1")].into_iter().collect()));

        assert_eq!(settled.get("rum"), Some("1"));
        assert_eq!(storage.retrieve().get("rum"), Some("1"));
        // The sibling's lock is not ours to release
        assert_eq!(storage.lock_owner().as_deref(), Some("sibling"));
    }

    #[test]
    fn test_failed_persist_is_absorbed() {
        let storage = MemoryStorage::new();
        let settled =
            serializer(&storage).run(&mut write([("rum", "not valid")].into_iter().collect()));
        assert_eq!(settled.get("rum"), Some("not valid"));
        assert_eq!(storage.raw(), None);
    }

    #[test]
    fn test_clear_empties_backend() {
        let storage = MemoryStorage::new();
        storage.persist(&[("id", "x")].into_iter().collect()).unwrap();
        serializer(&storage).clear();
        assert!(storage.retrieve().is_empty());
    }
}
