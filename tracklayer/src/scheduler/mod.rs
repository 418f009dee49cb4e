//! Bounded, recency-first request scheduling.
//!
//! Panning and zooming invalidate interest in old fetches faster than those
//! fetches complete, so the scheduler drains its pending work as a stack:
//! the most recently requested tile, the one the user is looking at right
//! now, starts first. Old pending entries may starve under sustained churn;
//! that is the intended trade-off, favoring perceived responsiveness over
//! fairness.
//!
//! Concurrency is capped per scheduler instance. The default cap of 6
//! matches typical per-host connection limits. To share one cap across
//! several pyramids (even with different payload types), construct a single
//! scheduler and hand the same `Arc` to every store: requests are keyed by
//! namespaced strings and the work is type-erased.
//!
//! An in-flight fetch is not cancellable: [`RequestScheduler::remove_pending`]
//! only prevents a fetch that has not started, and a started fetch always
//! runs to settlement. No timeout is imposed; a stalled fetch occupies its
//! concurrency slot indefinitely, which is a documented limitation rather
//! than a silent failure.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::telemetry::SchedulerMetrics;

/// Default cap on concurrently running fetches.
pub const DEFAULT_MAX_ACTIVE_REQUESTS: usize = 6;

/// Work submitted to the scheduler: invoked once when the request starts,
/// returns a future that resolves when the fetch has settled (either way).
pub type LoadFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Identifies one request across every store sharing a scheduler.
///
/// Stores namespace their tiles with their own label so two pyramids never
/// collide on the same tile key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    /// Builds a key from a store label and a tile key.
    pub fn new(store_label: &str, tile_key: &str) -> Self {
        Self(format!("{}/{}", store_label, tile_key))
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of fetches running at once. Must be at least 1.
    pub max_active_requests: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_active_requests: DEFAULT_MAX_ACTIVE_REQUESTS,
        }
    }
}

struct SchedulerState {
    /// Pending requests, most recently pushed last (drained from the back).
    pending: Vec<(RequestKey, LoadFn)>,
    /// Keys of requests currently in flight.
    active: HashSet<RequestKey>,
}

/// Bounds concurrent fetches and reorders pending work by recency.
///
/// See the [module docs](self) for the scheduling discipline.
pub struct RequestScheduler {
    max_active: usize,
    state: Mutex<SchedulerState>,
    metrics: Arc<SchedulerMetrics>,
}

impl RequestScheduler {
    /// Creates a scheduler with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if `max_active_requests` is zero: a zero cap can never drain
    /// and is a construction-time programming error.
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Self::with_metrics(config, Arc::new(SchedulerMetrics::new()))
    }

    /// Creates a scheduler reporting into an externally owned metrics sink.
    pub fn with_metrics(config: SchedulerConfig, metrics: Arc<SchedulerMetrics>) -> Arc<Self> {
        assert!(
            config.max_active_requests > 0,
            "max_active_requests must be at least 1"
        );
        Arc::new(Self {
            max_active: config.max_active_requests,
            state: Mutex::new(SchedulerState {
                pending: Vec::new(),
                active: HashSet::new(),
            }),
            metrics,
        })
    }

    /// Submits a request.
    ///
    /// If the key is already in flight this is a no-op: the transport cannot
    /// cancel or re-prioritize a started fetch. If the key is already
    /// pending, the old entry is replaced and the request moves to the top
    /// of the stack. Otherwise the request is pushed on top and the queue is
    /// drained.
    ///
    /// Must be called from within a tokio runtime: started work is spawned
    /// onto the current runtime.
    pub fn load(self: &Arc<Self>, key: RequestKey, load_fn: LoadFn) {
        {
            let mut state = self.state.lock();
            if state.active.contains(&key) {
                trace!(request = %key, "Request already in flight, ignoring");
                return;
            }
            if let Some(pos) = state.pending.iter().position(|(k, _)| *k == key) {
                // A tile is never queued twice; the fresh submission wins and
                // jumps to the top.
                state.pending.remove(pos);
                self.metrics.request_replaced();
            } else {
                self.metrics.request_queued();
            }
            state.pending.push((key, load_fn));
        }
        self.drain();
    }

    /// Moves a pending request to the top of the stack so it is dequeued
    /// next. No-op when the key is active or unknown.
    pub fn bring_to_front(&self, key: &RequestKey) {
        let mut state = self.state.lock();
        if state.active.contains(key) {
            return;
        }
        if let Some(pos) = state.pending.iter().position(|(k, _)| k == key) {
            let entry = state.pending.remove(pos);
            state.pending.push(entry);
        }
    }

    /// Drops a pending request without running it.
    ///
    /// Returns `true` if an entry was removed. No-op (returning `false`)
    /// when the key is active or unknown; an in-flight fetch always runs to
    /// settlement.
    pub fn remove_pending(&self, key: &RequestKey) -> bool {
        let mut state = self.state.lock();
        if let Some(pos) = state.pending.iter().position(|(k, _)| k == key) {
            state.pending.remove(pos);
            self.metrics.request_removed();
            true
        } else {
            false
        }
    }

    /// Number of requests waiting to start.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of requests currently in flight.
    pub fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Metrics sink shared with this scheduler.
    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    /// Starts pending work until the active set is full or the stack runs
    /// dry. Newest entries start first.
    fn drain(self: &Arc<Self>) {
        loop {
            let (key, load_fn) = {
                let mut state = self.state.lock();
                if state.active.len() >= self.max_active {
                    return;
                }
                let Some((key, load_fn)) = state.pending.pop() else {
                    return;
                };
                state.active.insert(key.clone());
                self.metrics.request_started(state.active.len());
                (key, load_fn)
            };

            trace!(request = %key, "Starting fetch");
            // Invoke outside the lock: the closure may settle synchronously
            // and re-enter the scheduler through tile observers.
            let future = load_fn();
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                future.await;
                scheduler.settle(key);
            });
        }
    }

    /// Called when a started request settles; frees its slot and re-drains.
    fn settle(self: &Arc<Self>, key: RequestKey) {
        {
            let mut state = self.state.lock();
            if !state.active.remove(&key) {
                debug!(request = %key, "Settled request was not active");
            }
            self.metrics.request_settled();
        }
        self.drain();
    }
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RequestScheduler")
            .field("max_active", &self.max_active)
            .field("pending", &state.pending.len())
            .field("active", &state.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    /// Test double that records the order fetches start in and holds each
    /// one open until explicitly released.
    struct FetchProbe {
        started: Mutex<Vec<String>>,
    }

    impl FetchProbe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: Mutex::new(Vec::new()),
            })
        }

        /// Builds a load function that never settles until `release` fires.
        fn held_fetch(self: &Arc<Self>, name: &str) -> (LoadFn, oneshot::Sender<()>) {
            let (release_tx, release_rx) = oneshot::channel();
            let probe = Arc::clone(self);
            let name = name.to_string();
            let load: LoadFn = Box::new(move || -> BoxFuture<'static, ()> {
                // The synchronous part of the closure runs inside drain, so
                // the recorded order is the start order.
                probe.started.lock().push(name);
                Box::pin(async move {
                    let _ = release_rx.await;
                })
            });
            (load, release_tx)
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().clone()
        }
    }

    fn key(name: &str) -> RequestKey {
        RequestKey::new("test", name)
    }

    fn scheduler(max_active: usize) -> Arc<RequestScheduler> {
        RequestScheduler::new(SchedulerConfig {
            max_active_requests: max_active,
        })
    }

    #[tokio::test]
    async fn test_most_recent_requests_start_first() {
        let scheduler = scheduler(2);
        let probe = FetchProbe::new();
        let mut releases = Vec::new();

        for name in ["t1", "t2", "t3", "t4", "t5"] {
            let (load, release) = probe.held_fetch(name);
            scheduler.load(key(name), load);
            releases.push(release);
        }

        // With a cap of 2 the two newest queued entries win the slots: t1
        // and t2 start immediately (slots were free), then the stack holds
        // t3..t5 with t5 on top.
        assert_eq!(probe.started(), vec!["t1", "t2"]);
        assert_eq!(scheduler.active_len(), 2);
        assert_eq!(scheduler.pending_len(), 3);

        // Release one slot: the most recently pushed pending entry starts.
        releases.remove(0).send(()).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(probe.started(), vec!["t1", "t2", "t5"]);
    }

    #[tokio::test]
    async fn test_lifo_under_full_queue() {
        let scheduler = scheduler(1);
        let probe = FetchProbe::new();

        let (first, first_release) = probe.held_fetch("t1");
        scheduler.load(key("t1"), first);

        let mut releases = vec![first_release];
        for name in ["t2", "t3", "t4"] {
            let (load, release) = probe.held_fetch(name);
            scheduler.load(key(name), load);
            releases.push(release);
        }

        // Drain order after t1: newest first.
        for release in releases {
            let _ = release.send(());
            tokio::task::yield_now().await;
        }
        // t2 never got its release consumed in order; drive remaining work.
        tokio::task::yield_now().await;
        assert_eq!(probe.started(), vec!["t1", "t4", "t3", "t2"]);
    }

    #[tokio::test]
    async fn test_bring_to_front_promotes_pending_entry() {
        let scheduler = scheduler(1);
        let probe = FetchProbe::new();

        let (blocker, release) = probe.held_fetch("blocker");
        scheduler.load(key("blocker"), blocker);

        // Keep the release handles alive: dropping a sender would settle its
        // fetch early and free the slot.
        let mut held = Vec::new();
        for name in ["t1", "t2", "t3"] {
            let (load, r) = probe.held_fetch(name);
            scheduler.load(key(name), load);
            held.push(r);
        }

        scheduler.bring_to_front(&key("t1"));
        release.send(()).unwrap();
        tokio::task::yield_now().await;

        assert_eq!(probe.started(), vec!["blocker", "t1"]);
    }

    #[tokio::test]
    async fn test_bring_to_front_ignores_active_and_unknown() {
        let scheduler = scheduler(1);
        let probe = FetchProbe::new();

        let (load, _release) = probe.held_fetch("t1");
        scheduler.load(key("t1"), load);

        // Neither call may disturb the queue.
        scheduler.bring_to_front(&key("t1"));
        scheduler.bring_to_front(&key("missing"));
        assert_eq!(scheduler.active_len(), 1);
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_remove_pending_drops_entry_without_running_it() {
        let scheduler = scheduler(1);
        let probe = FetchProbe::new();

        let (blocker, release) = probe.held_fetch("blocker");
        scheduler.load(key("blocker"), blocker);

        let (load, _r) = probe.held_fetch("t1");
        scheduler.load(key("t1"), load);

        assert!(scheduler.remove_pending(&key("t1")));
        assert!(!scheduler.remove_pending(&key("t1")));
        // Removing an active request is refused.
        assert!(!scheduler.remove_pending(&key("blocker")));

        release.send(()).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(probe.started(), vec!["blocker"]);
    }

    #[tokio::test]
    async fn test_duplicate_load_replaces_and_promotes() {
        let scheduler = scheduler(1);
        let probe = FetchProbe::new();

        let (blocker, release) = probe.held_fetch("blocker");
        scheduler.load(key("blocker"), blocker);

        let mut held = Vec::new();
        for name in ["t1", "t2"] {
            let (load, r) = probe.held_fetch(name);
            scheduler.load(key(name), load);
            held.push(r);
        }
        // Re-submitting t1 replaces the stale entry and jumps the stack.
        let (load, r) = probe.held_fetch("t1");
        scheduler.load(key("t1"), load);
        held.push(r);

        assert_eq!(scheduler.pending_len(), 2);

        release.send(()).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(probe.started(), vec!["blocker", "t1"]);
    }

    #[tokio::test]
    async fn test_load_while_active_is_ignored() {
        let scheduler = scheduler(2);
        let probe = FetchProbe::new();

        let (load, _release) = probe.held_fetch("t1");
        scheduler.load(key("t1"), load);
        assert_eq!(scheduler.active_len(), 1);

        let (dup, _r) = probe.held_fetch("t1-dup");
        scheduler.load(key("t1"), dup);

        assert_eq!(scheduler.active_len(), 1);
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(probe.started(), vec!["t1"]);
    }

    #[tokio::test]
    async fn test_settlement_frees_slot_for_next_request() {
        let scheduler = scheduler(1);
        let probe = FetchProbe::new();

        let (first, release) = probe.held_fetch("t1");
        scheduler.load(key("t1"), first);
        let (second, _r) = probe.held_fetch("t2");
        scheduler.load(key("t2"), second);

        assert_eq!(scheduler.active_len(), 1);
        release.send(()).unwrap();
        tokio::task::yield_now().await;

        assert_eq!(probe.started(), vec!["t1", "t2"]);
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[test]
    #[should_panic(expected = "max_active_requests")]
    fn test_zero_cap_is_rejected() {
        let _ = RequestScheduler::new(SchedulerConfig {
            max_active_requests: 0,
        });
    }
}
