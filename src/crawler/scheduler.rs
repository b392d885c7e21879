//! Polite request scheduler.
//!
//! Producers enqueue [`Request`]s at a priority; a single dispatch loop hands
//! them to worker tasks no faster than a randomized, load-adaptive rate and
//! never more than `max_in_flight` at a time. Every completion is broadcast to
//! all subscribers as a [`Delivery`]; producers recognise their own requests by
//! priority class and tag.
//!
//! Pending queue, in-flight set, response cache, rate timer and subscriber list
//! share one mutex. The lock is never held across an `.await`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::crawler::cache::{canonical_key, ResponseCache};
use crate::crawler::fetcher::{Fetcher, HttpFetcher, DEFAULT_USER_AGENT};
use crate::crawler::request::{Request, RequestId, Response, Tag};
use crate::crawler::throttle::{self, Throttle, MIN_RATE_FLOOR};
use crate::error::FetchError;
use crate::utils::metrics::MetricsCollector;

/// Smallest allowed per-request timeout, in seconds
pub const TIMEOUT_FLOOR: f64 = 0.5;

/// How long the dispatcher sleeps when it has nothing to do and is not woken
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Tunable knobs of the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Lower bound of the dispatch interval in seconds
    pub min_rate: f64,

    /// Upper bound of the dispatch interval in seconds
    pub max_rate: f64,

    /// Per-request timeout in seconds
    pub timeout: f64,

    /// Maximum number of requests in flight (unbounded if `None`)
    pub max_in_flight: Option<usize>,

    /// Lifetime of cached responses in seconds
    pub cache_ttl: u64,

    /// Scale the interval with queue depth
    pub adaptive: bool,

    /// User agent injected into requests that do not set one
    pub user_agent: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_rate: 0.5,
            max_rate: 1.5,
            timeout: 5.0,
            max_in_flight: None,
            cache_ttl: 900,
            adaptive: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SchedulerSettings {
    /// Apply the floors: `min_rate >= 0.25`, `max_rate >= min_rate`,
    /// `timeout >= 0.5`, `max_in_flight >= 1`.
    pub fn normalized(mut self) -> Self {
        self.min_rate = self.min_rate.max(MIN_RATE_FLOOR);
        self.max_rate = self.max_rate.max(self.min_rate);
        self.timeout = self.timeout.max(TIMEOUT_FLOOR);
        self.max_in_flight = self.max_in_flight.map(|n| n.max(1));
        self
    }

    /// Per-request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}

/// One completed request, as seen by subscribers.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The request exactly as it was enqueued
    pub request: Arc<Request>,

    /// `None` on transport failure
    pub response: Option<Arc<Response>>,

    /// True when served from the response cache
    pub from_cache: bool,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.response.as_ref().map_or(false, |r| r.is_success())
    }
}

/// Observable state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    /// Not started yet
    Idle,
    /// Running with nothing pending
    Empty,
    /// Running, waiting for the rate window or a free worker
    Waiting,
    /// Running and handing out work
    Dispatching,
    /// Stopped for good
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Heap entry: ordered by priority, then by enqueue sequence
struct Queued {
    priority: i32,
    seq: u64,
    request: Arc<Request>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap is a max-heap: the lowest (priority, seq) must compare greatest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SchedulerState {
    phase: Phase,
    waiting: bool,
    settings: SchedulerSettings,
    pending: BinaryHeap<Queued>,
    in_flight: HashMap<RequestId, Arc<Request>>,
    cache: ResponseCache,
    throttle: Throttle,
    subscribers: Vec<mpsc::UnboundedSender<Delivery>>,
    next_seq: u64,
}

impl SchedulerState {
    fn emit(&mut self, delivery: Delivery) {
        self.subscribers
            .retain(|subscriber| subscriber.send(delivery.clone()).is_ok());
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Notify,
    fetcher: Arc<dyn Fetcher>,
    metrics: MetricsCollector,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the dispatch loop does next
enum Step {
    Exit,
    /// A cache hit was emitted under the lock
    Delivered(Arc<Request>),
    Dispatch(Arc<Request>, Duration),
    Wait(Option<Duration>),
}

/// Handle to a request scheduler. Cloning shares the same scheduler.
#[derive(Clone)]
pub struct RequestScheduler {
    shared: Arc<Shared>,
}

impl RequestScheduler {
    /// Create an idle scheduler that performs HTTP through `fetcher`
    pub fn new(settings: SchedulerSettings, fetcher: Arc<dyn Fetcher>) -> Self {
        let settings = settings.normalized();
        let cache = ResponseCache::new(Duration::from_secs(settings.cache_ttl));

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState {
                    phase: Phase::Idle,
                    waiting: false,
                    settings,
                    pending: BinaryHeap::new(),
                    in_flight: HashMap::new(),
                    cache,
                    throttle: Throttle::new(),
                    subscribers: Vec::new(),
                    next_seq: 0,
                }),
                wake: Notify::new(),
                fetcher,
                metrics: MetricsCollector::new(),
            }),
        }
    }

    /// Create an idle scheduler backed by a `reqwest` client
    pub fn with_http(settings: SchedulerSettings) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(settings.user_agent.clone())?;
        Ok(Self::new(settings, Arc::new(fetcher)))
    }

    /// Spawn the dispatch loop. Must be called from within a tokio runtime.
    /// Returns `None` if the scheduler was already started or stopped.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        {
            let mut state = self.shared.lock();
            if state.phase != Phase::Idle {
                warn!("Scheduler start ignored: already {:?}", state.phase);
                return None;
            }
            state.phase = Phase::Running;
        }

        info!("Request scheduler started");
        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(dispatch_loop(shared)))
    }

    /// Place a request in the pending queue. Never fails; after `stop` the
    /// request is accepted but never dispatched.
    pub fn enqueue(&self, request: Request) -> Arc<Request> {
        let request = Arc::new(request);
        {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(Queued {
                priority: request.priority,
                seq,
                request: Arc::clone(&request),
            });
            trace!(
                "Enqueued {} {} at priority {} (pending: {})",
                request.id(),
                request.url,
                request.priority,
                state.pending.len()
            );
        }
        self.shared.wake.notify_one();
        request
    }

    /// Drop every pending and in-flight request in `priority` (any if `None`)
    /// whose tag contains `tag`. In-flight calls finish but their responses
    /// are discarded. Returns the number of requests removed.
    pub fn clear(&self, priority: Option<i32>, tag: &Tag) -> usize {
        let mut state = self.shared.lock();

        let before = state.pending.len() + state.in_flight.len();
        state
            .pending
            .retain(|queued| !queued.request.matches(priority, tag));
        state
            .in_flight
            .retain(|_, request| !request.matches(priority, tag));
        let removed = before - (state.pending.len() + state.in_flight.len());

        if removed > 0 {
            debug!(
                "Cleared {} request(s) (priority: {:?}, tag: {:?})",
                removed, priority, tag
            );
        }
        drop(state);
        self.shared.wake.notify_one();
        removed
    }

    /// True if any pending or in-flight request matches the filters
    pub fn contains(&self, priority: Option<i32>, tag: &Tag) -> bool {
        let state = self.shared.lock();
        state
            .pending
            .iter()
            .any(|queued| queued.request.matches(priority, tag))
            || state
                .in_flight
                .values()
                .any(|request| request.matches(priority, tag))
    }

    /// Set the lower interval bound (floored at 0.25 s); disables the adaptive policy
    pub fn set_min_rate(&self, seconds: f64) {
        self.update_settings(|settings| {
            settings.min_rate = seconds.max(MIN_RATE_FLOOR);
            settings.max_rate = settings.max_rate.max(settings.min_rate);
            settings.adaptive = false;
        });
    }

    /// Set the upper interval bound (never below the lower one); disables the adaptive policy
    pub fn set_max_rate(&self, seconds: f64) {
        self.update_settings(|settings| {
            settings.max_rate = seconds.max(settings.min_rate);
            settings.adaptive = false;
        });
    }

    /// Set the per-request timeout (floored at 0.5 s)
    pub fn set_timeout(&self, seconds: f64) {
        self.update_settings(|settings| settings.timeout = seconds.max(TIMEOUT_FLOOR));
    }

    /// Limit the number of concurrent requests (`None` = unbounded)
    pub fn set_max_in_flight(&self, limit: Option<usize>) {
        self.update_settings(|settings| settings.max_in_flight = limit.map(|n| n.max(1)));
    }

    /// Re-enable or disable the queue-depth based interval
    pub fn set_adaptive(&self, adaptive: bool) {
        self.update_settings(|settings| settings.adaptive = adaptive);
    }

    fn update_settings<F: FnOnce(&mut SchedulerSettings)>(&self, update: F) {
        {
            let mut state = self.shared.lock();
            update(&mut state.settings);
            let ttl = Duration::from_secs(state.settings.cache_ttl);
            state.cache.set_ttl(ttl);
        }
        self.shared.wake.notify_one();
    }

    /// Current settings
    pub fn settings(&self) -> SchedulerSettings {
        self.shared.lock().settings.clone()
    }

    /// Stop dispatching for good. Pending requests stay queued, responses
    /// arriving from now on are discarded and all subscriptions end.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            state.subscribers.clear();
            info!(
                "Request scheduler stopped ({} pending, {} in flight)",
                state.pending.len(),
                state.in_flight.len()
            );
        }
        self.shared.wake.notify_one();
    }

    /// Receive every delivery from now on. The stream ends when the scheduler stops.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.shared.lock();
        if state.phase != Phase::Stopped {
            state.subscribers.push(tx);
        }
        rx
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.shared.lock();
        match state.phase {
            Phase::Idle => SchedulerStatus::Idle,
            Phase::Stopped => SchedulerStatus::Stopped,
            Phase::Running if state.pending.is_empty() => SchedulerStatus::Empty,
            Phase::Running if state.waiting => SchedulerStatus::Waiting,
            Phase::Running => SchedulerStatus::Dispatching,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().phase == Phase::Running
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    /// True if `request` is currently being fetched
    pub fn is_in_flight(&self, request: &Request) -> bool {
        self.shared.lock().in_flight.contains_key(&request.id())
    }

    /// Request metrics collected by this scheduler
    pub fn metrics(&self) -> MetricsCollector {
        self.shared.metrics.clone()
    }
}

/// Decide the next step while holding the lock
fn next_step(shared: &Shared) -> Step {
    let mut state = shared.lock();

    if state.phase != Phase::Running {
        return Step::Exit;
    }

    let key = match state.pending.peek() {
        None => {
            state.waiting = false;
            return Step::Wait(None);
        }
        Some(queued) => canonical_key(&queued.request),
    };

    // Cache short-circuit, no rate budget consumed. Emitted together with the
    // pop so a concurrent clear either removes it or sees it delivered.
    if let Some(response) = state.cache.get(&key) {
        if let Some(queued) = state.pending.pop() {
            let request = queued.request;
            state.emit(Delivery {
                request: Arc::clone(&request),
                response: Some(response),
                from_cache: true,
            });
            return Step::Delivered(request);
        }
    }

    if let Some(remaining) = state.throttle.remaining() {
        state.waiting = true;
        return Step::Wait(Some(remaining));
    }

    if let Some(limit) = state.settings.max_in_flight {
        if state.in_flight.len() >= limit {
            state.waiting = true;
            return Step::Wait(None);
        }
    }

    let Some(queued) = state.pending.pop() else {
        return Step::Wait(None);
    };
    state.waiting = false;

    // Depth counts the request being dispatched
    let depth = state.pending.len() + 1;
    let (low, high) = throttle::interval_bounds(
        state.settings.min_rate,
        state.settings.max_rate,
        state.settings.adaptive,
        depth,
    );
    let interval = throttle::draw_interval(low, high, &mut rand::thread_rng());
    state.throttle.arm(interval);

    state
        .in_flight
        .insert(queued.request.id(), Arc::clone(&queued.request));
    trace!(
        "Dispatching {} {} (next slot in {:?})",
        queued.request.id(),
        queued.request.url,
        interval
    );

    Step::Dispatch(queued.request, state.settings.request_timeout())
}

async fn dispatch_loop(shared: Arc<Shared>) {
    loop {
        match next_step(&shared) {
            Step::Exit => break,
            Step::Delivered(request) => {
                debug!("Cache hit for {} {}", request.id(), request.url);
                shared.metrics.record_cache_hit().await;
            }
            Step::Dispatch(request, timeout) => {
                tokio::spawn(run_worker(Arc::clone(&shared), request, timeout));
            }
            Step::Wait(limit) => {
                let pause = limit.unwrap_or(IDLE_POLL);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shared.wake.notified() => {}
                }
            }
        }
    }
    debug!("Dispatch loop exited");
}

async fn run_worker(shared: Arc<Shared>, request: Arc<Request>, timeout: Duration) {
    // Stop or clear may have landed between the dispatch decision and this task
    {
        let state = shared.lock();
        if state.phase == Phase::Stopped || !state.in_flight.contains_key(&request.id()) {
            debug!("Skipping fetch of {}: no longer wanted", request.id());
            return;
        }
    }

    let timer = shared.metrics.start_timer();
    let outcome = shared.fetcher.fetch(&request, timeout).await;
    let duration_ms = timer.end();

    let response = match outcome {
        Ok(response) => {
            if !response.is_success() {
                warn!("HTTP {} for {} {}", response.status, request.method, request.url);
            }
            Some(Arc::new(response))
        }
        Err(e) => {
            warn!("Request {} failed: {}", request.id(), e);
            None
        }
    };

    shared
        .metrics
        .record_request(
            response.as_ref().map_or(false, |r| r.is_success()),
            duration_ms,
            response.as_ref().map(|r| r.status),
            response.as_ref().map_or(0, |r| r.body.len()),
        )
        .await;

    let accepted = {
        let mut state = shared.lock();
        if state.phase == Phase::Stopped {
            debug!("Discarding response for {}: scheduler stopped", request.id());
            false
        } else if state.in_flight.remove(&request.id()).is_none() {
            debug!("Discarding response for {}: request was cleared", request.id());
            false
        } else {
            if let Some(response) = response.as_ref().filter(|r| r.is_success()) {
                state
                    .cache
                    .insert(canonical_key(&request), Arc::clone(response));
            }
            state.emit(Delivery {
                request,
                response,
                from_cache: false,
            });
            true
        }
    };

    if !accepted {
        shared.metrics.record_dropped().await;
    }
    shared.wake.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::request::Priority;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    /// Scripted fetcher: records call order and answers after a fixed latency
    struct ScriptedFetcher {
        latency: Duration,
        status: u16,
        calls: Mutex<Vec<(String, i32, Instant)>>,
        count: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(latency: Duration, status: u16) -> Arc<Self> {
            Arc::new(Self {
                latency,
                status,
                calls: Mutex::new(Vec::new()),
                count: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> Vec<(String, i32, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &Request, _timeout: Duration) -> Result<Response, FetchError> {
            self.count.fetch_add(1, AtomicOrdering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((request.url.clone(), request.priority, Instant::now()));
            tokio::time::sleep(self.latency).await;
            Ok(Response::new(self.status, request.url.clone(), format!("body of {}", request.url)))
        }
    }

    fn fast_settings() -> SchedulerSettings {
        SchedulerSettings {
            min_rate: 0.0,
            max_rate: 0.0,
            adaptive: false,
            ..SchedulerSettings::default()
        }
    }

    fn tag(database: &str) -> Tag {
        let mut tag = Tag::new();
        tag.insert("database".to_string(), database.to_string());
        tag
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("stream ended")
    }

    #[test]
    fn test_settings_floors() {
        let settings = SchedulerSettings {
            min_rate: 0.0,
            max_rate: 0.1,
            timeout: 0.0,
            max_in_flight: Some(0),
            ..SchedulerSettings::default()
        }
        .normalized();

        assert_eq!(settings.min_rate, 0.25);
        assert_eq!(settings.max_rate, 0.25);
        assert_eq!(settings.timeout, 0.5);
        assert_eq!(settings.max_in_flight, Some(1));
    }

    #[test]
    fn test_setters_apply_floors() {
        let scheduler = RequestScheduler::new(SchedulerSettings::default(), ScriptedFetcher::new(Duration::ZERO, 200));

        scheduler.set_min_rate(2.0);
        scheduler.set_max_rate(1.0);
        scheduler.set_timeout(0.1);

        let settings = scheduler.settings();
        assert_eq!(settings.min_rate, 2.0);
        assert_eq!(settings.max_rate, 2.0);
        assert_eq!(settings.timeout, 0.5);
        assert!(!settings.adaptive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_then_fifo_order() {
        let fetcher = ScriptedFetcher::new(Duration::from_millis(10), 200);
        let scheduler = RequestScheduler::new(
            SchedulerSettings {
                max_in_flight: Some(1),
                ..fast_settings()
            },
            fetcher.clone(),
        );
        let mut rx = scheduler.subscribe();

        let third = scheduler.enqueue(Request::get("http://x/a").with_priority(3));
        let first = scheduler.enqueue(Request::get("http://x/a").with_priority(2));
        let second = scheduler.enqueue(Request::get("http://x/a").with_priority(2));
        scheduler.start();

        let order: Vec<Arc<Request>> = vec![
            next(&mut rx).await.request,
            next(&mut rx).await.request,
            next(&mut rx).await.request,
        ];

        assert_eq!(order, vec![first, second, third]);
        // Identical GETs after the first are served from the cache
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(fetcher.calls()[0].1, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_monotonic_without_cache_hits() {
        let fetcher = ScriptedFetcher::new(Duration::from_millis(5), 200);
        let scheduler = RequestScheduler::new(
            SchedulerSettings {
                max_in_flight: Some(1),
                ..fast_settings()
            },
            fetcher.clone(),
        );
        let mut rx = scheduler.subscribe();

        let priorities = [3, 0, 2, 1, 3, 2, 0, 1];
        for (i, priority) in priorities.iter().enumerate() {
            scheduler.enqueue(Request::get(format!("http://x/{}", i)).with_priority(*priority));
        }
        scheduler.start();

        for _ in 0..priorities.len() {
            next(&mut rx).await;
        }

        let dispatched: Vec<i32> = fetcher.calls().iter().map(|c| c.1).collect();
        assert_eq!(dispatched, vec![0, 0, 1, 1, 2, 2, 3, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_lower_bound() {
        let fetcher = ScriptedFetcher::new(Duration::from_millis(1), 200);
        let scheduler = RequestScheduler::new(
            SchedulerSettings {
                min_rate: 0.6,
                max_rate: 0.9,
                adaptive: false,
                ..SchedulerSettings::default()
            },
            fetcher.clone(),
        );
        let mut rx = scheduler.subscribe();

        for i in 0..6 {
            scheduler.enqueue(Request::get(format!("http://x/{}", i)));
        }
        scheduler.start();
        for _ in 0..6 {
            next(&mut rx).await;
        }

        let calls = fetcher.calls();
        for pair in calls.windows(2) {
            let gap = pair[1].2 - pair[0].2;
            assert!(gap >= Duration::from_secs_f64(0.6 * 2.0 / 3.0), "gap too short: {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_idempotence() {
        let fetcher = ScriptedFetcher::new(Duration::from_millis(1), 200);
        let scheduler = RequestScheduler::new(fast_settings(), fetcher.clone());
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let first = scheduler.enqueue(Request::get("http://x/case?id=1"));
        let a = next(&mut rx).await;
        let second = scheduler.enqueue(Request::get("http://x/case?id=1"));
        let b = next(&mut rx).await;

        assert_eq!(a.request, first);
        assert_eq!(b.request, second);
        assert!(!a.from_cache);
        assert!(b.from_cache);
        assert_eq!(a.response, b.response);
        assert_eq!(fetcher.count.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_rate_budget() {
        let fetcher = ScriptedFetcher::new(Duration::from_millis(1), 200);
        let scheduler = RequestScheduler::new(
            SchedulerSettings {
                min_rate: 10.0,
                max_rate: 10.0,
                adaptive: false,
                ..SchedulerSettings::default()
            },
            fetcher.clone(),
        );
        let mut rx = scheduler.subscribe();
        scheduler.start();

        scheduler.enqueue(Request::get("http://x/case?id=7"));
        assert!(!next(&mut rx).await.from_cache);

        // The next network slot is ten seconds away; the cached copy is not held back
        let asked = Instant::now();
        scheduler.enqueue(Request::get("http://x/case?id=7"));
        let cached = next(&mut rx).await;
        assert!(cached.from_cache);
        assert!(asked.elapsed() < Duration::from_secs(1), "cache hit waited {:?}", asked.elapsed());

        // and the hit did not push the next fetch further out
        scheduler.enqueue(Request::get("http://x/case?id=8"));
        next(&mut rx).await;
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 2);
        let gap = calls[1].2 - calls[0].2;
        let slot = Duration::from_secs_f64(10.0 * (1.0 + throttle::JITTER) + 0.1);
        assert!(gap <= slot, "gap: {:?}", gap);

        assert_eq!(scheduler.metrics().get_metrics().await.cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_skips_fetch_after_stop_or_clear() {
        let fetcher = ScriptedFetcher::new(Duration::ZERO, 200);
        let scheduler = RequestScheduler::new(fast_settings(), fetcher.clone());
        let timeout = scheduler.settings().request_timeout();

        // Cleared between dispatch and the worker starting
        let cleared = Arc::new(Request::get("http://x/cleared"));
        run_worker(Arc::clone(&scheduler.shared), cleared, timeout).await;

        // Stopped between dispatch and the worker starting
        let stopped = Arc::new(Request::get("http://x/stopped"));
        scheduler
            .shared
            .lock()
            .in_flight
            .insert(stopped.id(), Arc::clone(&stopped));
        scheduler.stop();
        run_worker(Arc::clone(&scheduler.shared), stopped, timeout).await;

        assert_eq!(fetcher.count.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_is_surfaced_but_not_cached() {
        let fetcher = ScriptedFetcher::new(Duration::from_millis(1), 500);
        let scheduler = RequestScheduler::new(fast_settings(), fetcher.clone());
        let mut rx = scheduler.subscribe();
        scheduler.start();

        scheduler.enqueue(Request::get("http://x/broken"));
        let first = next(&mut rx).await;
        scheduler.enqueue(Request::get("http://x/broken"));
        let second = next(&mut rx).await;

        assert_eq!(first.response.as_ref().map(|r| r.status), Some(500));
        assert!(!first.is_success());
        assert!(!second.from_cache);
        assert_eq!(fetcher.count.load(AtomicOrdering::SeqCst), 2);

        let metrics = scheduler.metrics().get_metrics().await;
        assert_eq!(metrics.failed_requests, 2);
        assert_eq!(metrics.status_codes.get(&500), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_delivers_no_response() {
        let mut fetcher = crate::crawler::fetcher::MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|request, timeout| {
                Err(FetchError::Timeout {
                    url: request.url.clone(),
                    timeout,
                })
            });

        let scheduler = RequestScheduler::new(fast_settings(), Arc::new(fetcher));
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let request = scheduler.enqueue(Request::get("http://x/down"));
        let delivery = next(&mut rx).await;

        assert_eq!(delivery.request, request);
        assert!(delivery.response.is_none());
        assert_eq!(scheduler.in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_scoped_clear() {
        let fetcher = ScriptedFetcher::new(Duration::from_secs(10), 200);
        let scheduler = RequestScheduler::new(fast_settings(), fetcher.clone());
        let mut rx = scheduler.subscribe();

        let nass_case = |n: u32| {
            Request::get(format!("http://x/nass/{}", n))
                .with_priority(Priority::CASE)
                .with_tag("database", "NASS")
        };

        let in_flight = scheduler.enqueue(nass_case(1));
        scheduler.start();
        // Let the first request reach the worker
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(scheduler.is_in_flight(&in_flight));

        scheduler.enqueue(nass_case(2));
        let ciss = scheduler.enqueue(
            Request::get("http://x/ciss/1")
                .with_priority(Priority::CASE)
                .with_tag("database", "CISS"),
        );
        scheduler.enqueue(
            Request::get("http://x/nass/list")
                .with_priority(Priority::CASE_LIST)
                .with_tag("database", "NASS"),
        );

        let removed = scheduler.clear(Some(Priority::CASE), &tag("NASS"));
        assert_eq!(removed, 2);
        assert!(!scheduler.contains(Some(Priority::CASE), &tag("NASS")));
        assert!(scheduler.contains(Some(Priority::CASE), &tag("CISS")));
        assert!(scheduler.contains(Some(Priority::CASE_LIST), &tag("NASS")));

        // Only the untouched requests are delivered; the cleared in-flight one is dropped
        let mut delivered = vec![next(&mut rx).await.request, next(&mut rx).await.request];
        delivered.sort_by_key(|r| r.priority);
        assert_eq!(delivered[0], ciss);
        assert_eq!(delivered[1].priority, Priority::CASE_LIST);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.metrics().get_metrics().await.dropped_responses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all() {
        let scheduler = RequestScheduler::new(fast_settings(), ScriptedFetcher::new(Duration::ZERO, 200));
        scheduler.enqueue(Request::get("http://x/1").with_priority(Priority::IMAGE));
        scheduler.enqueue(Request::get("http://x/2").with_priority(Priority::CASE));

        assert_eq!(scheduler.clear(None, &Tag::new()), 2);
        assert_eq!(scheduler.pending_len(), 0);
        assert!(!scheduler.contains(None, &Tag::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_late_responses() {
        let fetcher = ScriptedFetcher::new(Duration::from_secs(2), 200);
        let scheduler = RequestScheduler::new(fast_settings(), fetcher.clone());
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let request = scheduler.enqueue(Request::get("http://x/slow"));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(scheduler.is_in_flight(&request));

        scheduler.stop();
        assert_eq!(scheduler.status(), SchedulerStatus::Stopped);

        scheduler.enqueue(Request::get("http://x/after-stop"));
        tokio::time::sleep(Duration::from_secs(10)).await;

        // Subscription ended without any delivery
        assert!(rx.recv().await.is_none());
        assert_eq!(fetcher.count.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(scheduler.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_loss_under_concurrency() {
        let fetcher = ScriptedFetcher::new(Duration::from_millis(300), 200);
        let scheduler = RequestScheduler::new(
            SchedulerSettings {
                max_in_flight: Some(3),
                ..fast_settings()
            },
            fetcher.clone(),
        );
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let mut expected = Vec::new();
        for i in 0..12 {
            expected.push(scheduler.enqueue(Request::get(format!("http://x/{}", i)).with_priority(i % 4)));
        }

        let mut seen = Vec::new();
        for _ in 0..expected.len() {
            seen.push(next(&mut rx).await.request.id());
        }
        seen.sort();
        let mut expected: Vec<RequestId> = expected.iter().map(|r| r.id()).collect();
        expected.sort();

        assert_eq!(seen, expected);
        assert_eq!(scheduler.status(), SchedulerStatus::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_until_started() {
        let fetcher = ScriptedFetcher::new(Duration::ZERO, 200);
        let scheduler = RequestScheduler::new(fast_settings(), fetcher.clone());
        assert_eq!(scheduler.status(), SchedulerStatus::Idle);

        scheduler.enqueue(Request::get("http://x/held"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetcher.count.load(AtomicOrdering::SeqCst), 0);

        assert_ok!(scheduler.start().ok_or("not started"));
        assert!(scheduler.start().is_none());
    }
}
