use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Request metrics collector shared by a scheduler and its workers
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Requests handed to the network
    pub total_requests: usize,

    /// Requests answered with a 2xx status
    pub successful_requests: usize,

    /// Transport failures and non-2xx answers
    pub failed_requests: usize,

    /// Requests answered from the response cache
    pub cache_hits: usize,

    /// Responses discarded because their request was cleared or the scheduler stopped
    pub dropped_responses: usize,

    /// Sum of network request durations in milliseconds
    pub total_duration_ms: u64,

    /// Slowest network request in milliseconds
    pub max_duration_ms: u64,

    /// Bytes downloaded
    pub bytes_downloaded: usize,

    /// HTTP status code counts
    pub status_codes: HashMap<u16, usize>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            cache_hits: 0,
            dropped_responses: 0,
            total_duration_ms: 0,
            max_duration_ms: 0,
            bytes_downloaded: 0,
            status_codes: HashMap::new(),
        }
    }
}

impl Metrics {
    /// Average request duration in milliseconds, if any request completed
    pub fn average_duration_ms(&self) -> Option<f64> {
        (self.total_requests > 0).then(|| self.total_duration_ms as f64 / self.total_requests as f64)
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Mutex::new(Metrics::default())),
        }
    }

    /// Record a request that went over the network
    pub async fn record_request(&self, success: bool, duration_ms: u64, status_code: Option<u16>, bytes: usize) {
        let mut metrics = self.metrics.lock().await;

        metrics.total_requests += 1;

        if success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }

        metrics.bytes_downloaded += bytes;

        metrics.total_duration_ms += duration_ms;
        metrics.max_duration_ms = metrics.max_duration_ms.max(duration_ms);

        if let Some(code) = status_code {
            *metrics.status_codes.entry(code).or_default() += 1;
        }
    }

    /// Record a request served from the cache
    pub async fn record_cache_hit(&self) {
        self.metrics.lock().await.cache_hits += 1;
    }

    /// Record a response that arrived after its request was cleared
    pub async fn record_dropped(&self) {
        self.metrics.lock().await.dropped_responses += 1;
    }

    /// Start timing a request
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }

    /// Reset metrics
    pub async fn reset(&self) {
        *self.metrics.lock().await = Metrics::default();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Request timer for measuring request durations
pub struct RequestTimer {
    /// Start time of the request
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
