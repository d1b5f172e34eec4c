//! Session lifecycle for one context.
//!
//! Different session concepts:
//! - **tracked**: the record has an id and is extended as the user navigates
//! - **not tracked**: the record holds this product's entry but no id
//! - **inactive**: nothing stored, or the stored record timed out
//!
//! # State Machine (per product)
//!
//! ```text
//!            classifier: tracked (mints id)
//! INACTIVE ─────────────────────────────────▶ TRACKED
//!    │  ▲                                        │
//!    │  └── timeout / expire() / sibling id ◀────┘
//!    │
//!    └── classifier: not tracked ──▶ NOT_TRACKED
//! ```
//!
//! A context's cache is only trusted for one polling interval; the watch
//! cycle then re-reads the shared record, clears it if it timed out, and
//! reconciles the cache. A cache whose id or product entry disagrees with
//! the shared record is *outdated*: it resets to `{}` and `expired` fires,
//! even when the shared record is itself active under another identity. The
//! next watch cycle then adopts that identity (see [`WatchAdoption`]).
//!
//! # Driving Time
//!
//! Nothing here spawns threads or timers. Call [`SessionStore::poll`]
//! regularly (the `session-hook watch` loop sleeps until
//! [`SessionStore::next_deadline`]); it runs the watch cycle once per
//! interval and flushes a throttled renewal when its window closes.

use std::sync::Arc;

use tracing::debug;

use crate::codec;
use crate::config::{SessionStoreOptions, WatchAdoption};
use crate::error::{Result, SessionError};
use crate::observable::Observable;
use crate::operations::{OperationSerializer, SessionOperation};
use crate::providers::{
    Clock, IdGenerator, SharedClock, SharedIds, SystemClock, UlidGenerator,
};
use crate::record::{SessionRecord, CREATED_KEY, EXPIRE_KEY, ID_KEY};
use crate::storage::SessionStorage;
use crate::throttle::{Throttle, ThrottleEdges};
use crate::timer::IntervalTimer;

/// A product's verdict on the session, from its previously stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingDecision {
    pub tracking_type: String,
    pub is_tracked: bool,
}

impl TrackingDecision {
    pub fn tracked(tracking_type: impl Into<String>) -> Self {
        Self {
            tracking_type: tracking_type.into(),
            is_tracked: true,
        }
    }

    pub fn not_tracked(tracking_type: impl Into<String>) -> Self {
        Self {
            tracking_type: tracking_type.into(),
            is_tracked: false,
        }
    }
}

pub trait SessionClassifier: Send {
    fn classify(&self, raw_tracking_type: Option<&str>) -> TrackingDecision;
}

impl<F> SessionClassifier for F
where
    F: Fn(Option<&str>) -> TrackingDecision + Send,
{
    fn classify(&self, raw_tracking_type: Option<&str>) -> TrackingDecision {
        self(raw_tracking_type)
    }
}

/// Cache plus everything needed to reconcile it. Kept apart from the
/// serializer so an operation can borrow it mutably during a cycle.
struct Tracker<C> {
    product_key: String,
    classifier: C,
    cache: SessionRecord,
    clock: SharedClock,
    ids: SharedIds,
    timeout_ms: i64,
    adoption: WatchAdoption,
    renewed: Observable<()>,
    expired: Observable<()>,
}

impl<C: SessionClassifier> Tracker<C> {
    fn is_active(&self, record: &SessionRecord) -> bool {
        record.is_active(self.clock.now_ms(), self.timeout_ms)
    }

    fn has_session_in_cache(&self) -> bool {
        self.cache.get(&self.product_key).is_some()
    }

    fn is_cache_outdated(&self, record: &SessionRecord) -> bool {
        self.cache.id() != record.id()
            || self.cache.get(&self.product_key) != record.get(&self.product_key)
    }

    /// Inactive records become `{}`; a cache holding this product either
    /// follows the record or, if outdated, expires.
    fn synchronize(&mut self, record: SessionRecord) -> SessionRecord {
        let record = if self.is_active(&record) {
            record
        } else {
            SessionRecord::new()
        };

        if self.has_session_in_cache() {
            if self.is_cache_outdated(&record) {
                self.expire_cache();
            } else {
                self.cache = record.clone();
            }
        }
        record
    }

    fn expand_or_renew_state(&self, record: &mut SessionRecord) -> bool {
        let decision = self.classifier.classify(record.get(&self.product_key));
        record.set(self.product_key.as_str(), decision.tracking_type);

        if decision.is_tracked && record.id().is_none() {
            let id = self.ids.new_id();
            debug!(product = %self.product_key, id = %id, "Minted session id");
            record.set(ID_KEY, id);
            record.set(CREATED_KEY, self.clock.now_ms().to_string());
        }
        decision.is_tracked
    }

    fn expire_cache(&mut self) {
        debug!(product = %self.product_key, id = ?self.cache.id(), "Session expired in cache");
        self.cache = SessionRecord::new();
        self.expired.notify(&());
    }

    fn renew_cache(&mut self, record: SessionRecord) {
        debug!(product = %self.product_key, id = ?record.id(), "Session renewed in cache");
        self.cache = record;
        self.renewed.notify(&());
    }

    /// Watch-cycle adoption of a session this context hasn't seen yet.
    fn adopt(&mut self, record: &SessionRecord) {
        if record.get(&self.product_key).is_none() {
            return;
        }
        match self.adoption {
            WatchAdoption::Ignore => {}
            WatchAdoption::Silent => self.cache = record.clone(),
            WatchAdoption::Notify if record.id().is_some() => self.renew_cache(record.clone()),
            WatchAdoption::Notify => self.cache = record.clone(),
        }
    }
}

struct ExpandOrRenew<'a, C> {
    tracker: &'a mut Tracker<C>,
    is_tracked: bool,
}

impl<C: SessionClassifier> SessionOperation for ExpandOrRenew<'_, C> {
    fn process(&mut self, current: &SessionRecord) -> Option<SessionRecord> {
        let mut record = self.tracker.synchronize(current.clone());
        self.is_tracked = self.tracker.expand_or_renew_state(&mut record);
        Some(record)
    }

    fn after(&mut self, settled: &SessionRecord) {
        if self.is_tracked && !self.tracker.has_session_in_cache() {
            self.tracker.renew_cache(settled.clone());
        }
        self.tracker.cache = settled.clone();
    }
}

struct Expand<'a, C> {
    tracker: &'a mut Tracker<C>,
}

impl<C: SessionClassifier> SessionOperation for Expand<'_, C> {
    fn process(&mut self, current: &SessionRecord) -> Option<SessionRecord> {
        if self.tracker.has_session_in_cache() {
            Some(self.tracker.synchronize(current.clone()))
        } else {
            None
        }
    }
}

/// Active record: no write, just reconcile. Inactive record: clear it.
struct Watch<'a, C> {
    tracker: &'a mut Tracker<C>,
}

impl<C: SessionClassifier> SessionOperation for Watch<'_, C> {
    fn process(&mut self, current: &SessionRecord) -> Option<SessionRecord> {
        if self.tracker.is_active(current) {
            None
        } else {
            Some(SessionRecord::new())
        }
    }

    fn after(&mut self, settled: &SessionRecord) {
        let had_session = self.tracker.has_session_in_cache();
        let settled = self.tracker.synchronize(settled.clone());
        if !had_session {
            self.tracker.adopt(&settled);
        }
    }
}

pub struct SessionStoreBuilder<S, C> {
    storage: S,
    product_key: String,
    classifier: C,
    options: SessionStoreOptions,
    clock: SharedClock,
    ids: SharedIds,
}

impl<S: SessionStorage, C: SessionClassifier> SessionStoreBuilder<S, C> {
    pub fn options(mut self, options: SessionStoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Seeds the cache from the backend and arms the watch timer. Fails if
    /// the product key could never be stored.
    pub fn start(self) -> Result<SessionStore<S, C>> {
        if !is_valid_product_key(&self.product_key) {
            return Err(SessionError::InvalidProductKey {
                key: self.product_key,
            });
        }
        let options = self.options;
        let now = self.clock.now_ms();
        let poll_interval = options.poll_interval();
        let serializer =
            OperationSerializer::new(self.storage, options.lock.clone(), Arc::new(UlidGenerator));

        let cache = serializer
            .retrieve()
            .into_active(now, options.session_timeout());
        debug!(product = %self.product_key, id = ?cache.id(), "Session store started");

        Ok(SessionStore {
            serializer,
            tracker: Tracker {
                product_key: self.product_key,
                classifier: self.classifier,
                cache,
                clock: self.clock,
                ids: self.ids,
                timeout_ms: options.session_timeout(),
                adoption: options.watch_adoption,
                renewed: Observable::new(),
                expired: Observable::new(),
            },
            renew_throttle: Throttle::new(poll_interval, ThrottleEdges::default()),
            watch_timer: IntervalTimer::start(poll_interval, now),
        })
    }
}

fn is_valid_product_key(key: &str) -> bool {
    codec::is_valid_key(key) && ![ID_KEY, CREATED_KEY, EXPIRE_KEY].contains(&key)
}

/// One context's view of the shared session.
pub struct SessionStore<S, C> {
    serializer: OperationSerializer<S>,
    tracker: Tracker<C>,
    renew_throttle: Throttle,
    watch_timer: IntervalTimer,
}

impl<S: SessionStorage, C: SessionClassifier> SessionStore<S, C> {
    /// Defaults: system clock, ULID ids, default options.
    pub fn builder(storage: S, product_key: &str, classifier: C) -> SessionStoreBuilder<S, C> {
        SessionStoreBuilder {
            storage,
            product_key: product_key.to_string(),
            classifier,
            options: SessionStoreOptions::default(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator),
        }
    }

    /// Extends the session, creating one if the classifier tracks this
    /// product. Throttled to one cycle per polling interval; calls inside a
    /// window are applied once when it closes (on `poll`).
    pub fn expand_or_renew_session(&mut self) {
        if self.renew_throttle.invoke(self.tracker.clock.now_ms()) {
            self.run_expand_or_renew();
        }
    }

    /// Extends the session only if this context already holds it. Never
    /// creates one, and never writes when the cache lacks this product.
    pub fn expand_session(&mut self) {
        self.serializer.run(&mut Expand {
            tracker: &mut self.tracker,
        });
    }

    /// Last record this context observed or wrote. Never touches storage.
    pub fn session(&self) -> &SessionRecord {
        &self.tracker.cache
    }

    /// Clears the shared record and expires the cache.
    pub fn expire(&mut self) {
        self.serializer.clear();
        self.tracker.synchronize(SessionRecord::new());
    }

    /// Stops the watch loop and drops any pending throttled renewal. Explicit
    /// calls keep working.
    pub fn stop(&mut self) {
        debug!(product = %self.tracker.product_key, "Session store stopped");
        self.watch_timer.cancel();
        self.renew_throttle.cancel();
    }

    pub fn is_watching(&self) -> bool {
        self.watch_timer.is_active()
    }

    /// Runs whatever timed work is due.
    pub fn poll(&mut self) {
        let now = self.tracker.clock.now_ms();
        if self.renew_throttle.take_due(now) {
            self.run_expand_or_renew();
        }
        if self.watch_timer.fire_if_due(now) {
            self.watch_session();
        }
    }

    /// Earliest time at which `poll` has something to do.
    pub fn next_deadline(&self) -> Option<i64> {
        match (self.renew_throttle.deadline(), self.watch_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn renewed(&mut self) -> &mut Observable<()> {
        &mut self.tracker.renewed
    }

    pub fn expired(&mut self) -> &mut Observable<()> {
        &mut self.tracker.expired
    }

    pub fn storage(&self) -> &S {
        self.serializer.storage()
    }

    fn run_expand_or_renew(&mut self) {
        self.serializer.run(&mut ExpandOrRenew {
            tracker: &mut self.tracker,
            is_tracked: false,
        });
    }

    fn watch_session(&mut self) {
        self.serializer.run(&mut Watch {
            tracker: &mut self.tracker,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ManualClock, SequenceIds};
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: i64 = 1_700_000_000_000;
    const TIMEOUT: u64 = 900_000;

    type TestStore = SessionStore<MemoryStorage, fn(Option<&str>) -> TrackingDecision>;

    fn always_tracked(_: Option<&str>) -> TrackingDecision {
        TrackingDecision::tracked("1")
    }

    fn never_tracked(_: Option<&str>) -> TrackingDecision {
        TrackingDecision::not_tracked("0")
    }

    fn options() -> SessionStoreOptions {
        SessionStoreOptions {
            session_timeout_ms: TIMEOUT,
            ..Default::default()
        }
    }

    fn start(
        storage: &MemoryStorage,
        clock: &ManualClock,
        classifier: fn(Option<&str>) -> TrackingDecision,
    ) -> TestStore {
        SessionStore::builder(storage.clone(), "rum", classifier)
            .options(options())
            .clock(clock.clone())
            .ids(SequenceIds::new("id-"))
            .start()
            .unwrap()
    }

    fn counter(observable: &mut Observable<()>) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        observable.subscribe(move |_| {
            handle.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_renew_mints_id_and_fires_renewed() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        let renewed = counter(store.renewed());

        store.expand_or_renew_session();

        assert_eq!(store.session().id(), Some("id-1"));
        assert_eq!(store.session().created(), Some(T0.to_string().as_str()));
        assert_eq!(store.session().get("rum"), Some("1"));
        assert_eq!(storage.retrieve(), *store.session());
        assert_eq!(renewed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_renew_keeps_id_without_event() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        let renewed = counter(store.renewed());

        store.expand_or_renew_session();
        clock.advance(2_000);
        store.expand_or_renew_session();

        assert_eq!(store.session().id(), Some("id-1"));
        assert_eq!(renewed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_untracked_product_has_entry_but_no_id() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, never_tracked);
        let renewed = counter(store.renewed());

        store.expand_or_renew_session();

        assert_eq!(store.session().get("rum"), Some("0"));
        assert_eq!(store.session().id(), None);
        assert_eq!(renewed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_burst_of_renewals_is_one_cycle_then_trailing() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        let (reads, writes) = (storage.read_count(), storage.write_count());

        for _ in 0..10 {
            store.expand_or_renew_session();
            clock.advance(50);
        }

        assert_eq!(storage.read_count() - reads, 1);
        assert!(storage.write_count() - writes <= 1);

        clock.set(T0 + 1_000);
        store.poll();
        // One trailing cycle plus one watch cycle
        assert_eq!(storage.read_count() - reads, 3);
        assert_eq!(store.session().id(), Some("id-1"));
    }

    #[test]
    fn test_expire_clears_backend_and_cache() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        let expired = counter(store.expired());

        store.expand_or_renew_session();
        store.expire();

        assert!(store.session().is_empty());
        assert!(storage.retrieve().is_empty());
        assert_eq!(expired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expire_without_session_is_silent() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        let expired = counter(store.expired());

        store.expire();
        assert!(store.session().is_empty());
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_expand_without_cached_session_never_writes() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        let writes = storage.write_count();

        store.expand_session();

        assert_eq!(storage.write_count(), writes);
        assert!(storage.raw().is_none());
        assert!(store.session().is_empty());
    }

    #[test]
    fn test_expand_with_cached_session_rewrites_it() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        store.expand_or_renew_session();
        let writes = storage.write_count();

        store.expand_session();

        assert_eq!(storage.write_count(), writes + 1);
        assert_eq!(storage.retrieve().id(), Some("id-1"));
    }

    #[test]
    fn test_watch_clears_timed_out_session_once() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        let expired = counter(store.expired());

        store.expand_or_renew_session();
        clock.set(T0 + TIMEOUT as i64 + 1);
        store.poll();

        assert!(store.session().is_empty());
        assert!(storage.retrieve().is_empty());
        assert_eq!(expired.load(Ordering::SeqCst), 1);

        clock.advance(1_000);
        store.poll();
        assert_eq!(expired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_watch_keeps_active_session_without_writing() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        store.expand_or_renew_session();
        let writes = storage.write_count();

        clock.advance(1_000);
        store.poll();

        assert_eq!(storage.write_count(), writes);
        assert_eq!(store.session().id(), Some("id-1"));
    }

    #[test]
    fn test_foreign_id_outdates_cache() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        let expired = counter(store.expired());
        let renewed = counter(store.renewed());
        store.expand_or_renew_session();

        let created = T0.to_string();
        storage
            .persist(
                &[("id", "sibling"), ("created", created.as_str()), ("rum", "1")]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        clock.advance(1_000);
        store.poll();
        assert!(store.session().is_empty());
        assert_eq!(expired.load(Ordering::SeqCst), 1);

        clock.advance(1_000);
        store.poll();
        assert_eq!(store.session().id(), Some("sibling"));
        assert_eq!(renewed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_start_ignores_inactive_stored_session() {
        let storage = MemoryStorage::new();
        storage.set_raw(&format!("id=old&created={}&rum=1", T0 - TIMEOUT as i64 - 1));
        let clock = ManualClock::new(T0);

        let store = start(&storage, &clock, always_tracked);
        assert!(store.session().is_empty());
    }

    #[test]
    fn test_start_adopts_active_stored_session() {
        let storage = MemoryStorage::new();
        storage.set_raw(&format!("id=live&created={}&rum=1", T0 - 10));
        let clock = ManualClock::new(T0);

        let store = start(&storage, &clock, always_tracked);
        assert_eq!(store.session().id(), Some("live"));
    }

    #[test]
    fn test_stop_halts_watch_cycles() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        store.stop();
        assert!(!store.is_watching());
        assert_eq!(store.next_deadline(), None);

        let reads = storage.read_count();
        clock.advance(10_000);
        store.poll();
        assert_eq!(storage.read_count(), reads);
    }

    #[test]
    fn test_next_deadline_tracks_earliest_work() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        assert_eq!(store.next_deadline(), Some(T0 + 1_000));

        clock.advance(300);
        store.expand_or_renew_session();
        assert_eq!(store.next_deadline(), Some(T0 + 1_000));
    }

    #[test]
    fn test_classifier_sees_previous_tracking_type() {
        let storage = MemoryStorage::new();
        storage.set_raw("rum=2");
        let clock = ManualClock::new(T0);
        let mut store = SessionStore::builder(storage.clone(), "rum", |raw: Option<&str>| {
            match raw {
                Some("2") => TrackingDecision::tracked("2"),
                _ => TrackingDecision::not_tracked("0"),
            }
        })
        .clock(clock.clone())
        .ids(SequenceIds::new("id-"))
        .start()
        .unwrap();

        store.expand_or_renew_session();
        assert_eq!(store.session().get("rum"), Some("2"));
        assert_eq!(store.session().id(), Some("id-1"));
    }

    #[test]
    fn test_unstorable_product_key_is_rejected() {
        let storage = MemoryStorage::new();
        for key in ["my-product", "", "id", "created", "expire"] {
            let classifier: fn(Option<&str>) -> TrackingDecision = always_tracked;
            let result = SessionStore::builder(storage.clone(), key, classifier).start();
            assert!(matches!(result, Err(SessionError::InvalidProductKey { .. })));
        }
        assert_eq!(storage.read_count(), 0);
    }

    #[test]
    fn test_corrupt_created_starts_empty_and_recovers() {
        let storage = MemoryStorage::new();
        storage.set_raw("id=x&created=-9223372036854775808&rum=1");
        let clock = ManualClock::new(T0);
        let mut store = start(&storage, &clock, always_tracked);
        assert!(store.session().is_empty());

        clock.advance(1_000);
        store.poll();
        assert!(storage.retrieve().is_empty());

        store.expand_or_renew_session();
        assert_eq!(store.session().id(), Some("id-1"));
        assert_eq!(storage.retrieve(), *store.session());
    }
}
