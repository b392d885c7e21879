pub mod cache;
pub mod fetcher;
pub mod request;
pub mod scheduler;
pub mod throttle;

// Re-export common types
pub use cache::ResponseCache;
pub use fetcher::{Fetcher, HttpFetcher};
pub use request::{Method, Priority, Request, RequestId, Response, Tag};
pub use scheduler::{Delivery, RequestScheduler, SchedulerSettings, SchedulerStatus};
