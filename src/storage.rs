//! Instance caches and disposal tracking
//!
//! Every scope owns an [`InstanceCache`] keyed by instance identity and a
//! [`DisposalTracker`]. Cache slots are single-assignment cells, so a value is
//! constructed at most once per slot even when many threads race on first
//! access; losers wait for and receive the winner's value.

use crate::descriptor::DisposeFn;
use crate::factory::BoxFuture;
use crate::instance::InstanceId;
use crate::provider::Object;
use crate::Result;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// One cache slot.
///
/// Synchronous and asynchronous construction use separate cells; a slot
/// holds a value in at most one of them because an instance is either built
/// through a synchronous or an asynchronous plan.
#[derive(Default)]
struct Slot {
    sync: once_cell::sync::OnceCell<Object>,
    deferred: tokio::sync::OnceCell<Object>,
}

impl Slot {
    #[inline]
    fn get(&self) -> Option<&Object> {
        self.sync.get().or_else(|| self.deferred.get())
    }
}

/// Thread-safe instance cache keyed by [`InstanceId`].
///
/// Uses `DashMap` with `ahash`; the shard guard is released before a value
/// is built so construction never runs under a map lock.
pub struct InstanceCache {
    slots: DashMap<InstanceId, Arc<Slot>, RandomState>,
}

impl InstanceCache {
    /// Create an empty cache.
    ///
    /// Uses 8 shards: scopes are created often and typically hold few values.
    #[inline]
    pub fn new() -> Self {
        Self {
            slots: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    #[inline]
    fn slot(&self, id: &InstanceId) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(id.clone()).or_default().value())
    }

    /// Cached value for `id`, if built.
    #[inline]
    pub fn get(&self, id: &InstanceId) -> Option<Object> {
        self.slots.get(id).and_then(|slot| slot.get().cloned())
    }

    #[inline]
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.get(id).is_some()
    }

    /// Return the cached value or build it exactly once.
    ///
    /// `build` reports whether the value was freshly constructed through the
    /// returned flag so callers register disposal only for the winner.
    pub fn get_or_try_init<F>(&self, id: &InstanceId, build: F) -> Result<(Object, bool)>
    where
        F: FnOnce() -> Result<Object>,
    {
        let slot = self.slot(id);
        if let Some(value) = slot.get() {
            return Ok((Arc::clone(value), false));
        }

        let mut created = false;
        let value = slot.sync.get_or_try_init(|| {
            #[cfg(feature = "logging")]
            trace!(target: "lamar", instance = %id, "Building cached instance");

            created = true;
            build()
        })?;
        Ok((Arc::clone(value), created))
    }

    /// Asynchronous variant of [`get_or_try_init`](Self::get_or_try_init).
    pub async fn get_or_try_init_async<F>(&self, id: &InstanceId, build: F) -> Result<(Object, bool)>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Object>>,
    {
        let slot = self.slot(id);
        if let Some(value) = slot.get() {
            return Ok((Arc::clone(value), false));
        }

        let mut created = false;
        let value = slot
            .deferred
            .get_or_try_init(|| {
                created = true;
                build()
            })
            .await?;
        Ok((Arc::clone(value), created))
    }

    /// Number of built values.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached value.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

impl Default for InstanceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCache")
            .field("count", &self.len())
            .finish()
    }
}

// =============================================================================
// Disposal
// =============================================================================

#[derive(Default)]
struct Tracked {
    values: Vec<(Object, DisposeFn)>,
    closed: bool,
}

/// Values awaiting disposal, in construction order.
///
/// Once drained by [`dispose_all`](Self::dispose_all) the tracker is closed:
/// values tracked afterwards are disposed on the spot.
#[derive(Default)]
pub struct DisposalTracker {
    entries: Mutex<Tracked>,
}

impl DisposalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `value` for disposal, or dispose it right away when the tracker
    /// is closed.
    ///
    /// Returns whether the value was kept for later.
    pub fn track(&self, value: Object, dispose: DisposeFn) -> bool {
        let mut entries = self.entries.lock();
        if entries.closed {
            drop(entries);
            dispose(&value);
            return false;
        }
        entries.values.push((value, dispose));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().values.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.entries.lock().closed
    }

    /// Dispose every tracked value in reverse construction order and close
    /// the tracker.
    ///
    /// The list is taken out of the lock before any hook runs, so a hook may
    /// touch the tracker again without deadlocking.
    pub fn dispose_all(&self) -> usize {
        let entries = {
            let mut tracked = self.entries.lock();
            tracked.closed = true;
            std::mem::take(&mut tracked.values)
        };
        let count = entries.len();
        for (value, dispose) in entries.into_iter().rev() {
            dispose(&value);
        }
        count
    }
}

impl std::fmt::Debug for DisposalTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalTracker")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{downcast, object};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct TestService {
        value: i32,
    }

    #[test]
    fn test_cache_builds_once() {
        let cache = InstanceCache::new();
        let id = InstanceId::new("r1");

        let (first, created) = cache
            .get_or_try_init(&id, || Ok(object(TestService { value: 42 })))
            .unwrap();
        assert!(created);

        let (second, created) = cache
            .get_or_try_init(&id, || Ok(object(TestService { value: 0 })))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(downcast::<TestService>(second).unwrap().value, 42);
    }

    #[test]
    fn test_failed_build_leaves_slot_empty() {
        let cache = InstanceCache::new();
        let id = InstanceId::new("r1");

        let result = cache.get_or_try_init(&id, || Err(crate::DiError::Internal("boom".into())));
        assert!(result.is_err());
        assert!(!cache.contains(&id));
    }

    #[test]
    fn test_concurrent_first_access_builds_once() {
        let cache = Arc::new(InstanceCache::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let id = InstanceId::new("r7");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                let id = id.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_try_init(&id, || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok(object(TestService { value: 1 }))
                        })
                        .unwrap()
                        .0
                })
            })
            .collect();

        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_async_cache_builds_once() {
        let cache = InstanceCache::new();
        let id = InstanceId::new("r2");

        let (first, created) = cache
            .get_or_try_init_async(&id, || Box::pin(async { Ok(object(TestService { value: 5 })) }))
            .await
            .unwrap();
        assert!(created);

        let (second, _) = cache
            .get_or_try_init(&id, || Ok(object(TestService { value: 6 })))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_disposal_runs_in_reverse_order() {
        let tracker = DisposalTracker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            tracker.track(
                object(i),
                Arc::new(move |value: &Object| {
                    order.lock().push(*value.downcast_ref::<i32>().unwrap());
                }),
            );
        }

        assert_eq!(tracker.dispose_all(), 3);
        assert_eq!(*order.lock(), vec![2, 1, 0]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_closed_tracker_disposes_late_values_immediately() {
        let tracker = DisposalTracker::new();
        let disposed = Arc::new(AtomicUsize::new(0));
        let hook = {
            let disposed = Arc::clone(&disposed);
            Arc::new(move |_: &Object| {
                disposed.fetch_add(1, Ordering::SeqCst);
            }) as DisposeFn
        };

        assert!(tracker.track(object(1), Arc::clone(&hook)));
        assert_eq!(tracker.dispose_all(), 1);
        assert!(tracker.is_closed());

        assert!(!tracker.track(object(2), hook));
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert!(tracker.is_empty());
        assert_eq!(tracker.dispose_all(), 0);
    }
}
