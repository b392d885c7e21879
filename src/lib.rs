//! Polite crawler for public crash-case catalogs.
//!
//! A [`RequestScheduler`] dispatches HTTP requests at a randomized, load-adaptive
//! rate and caches successful responses. [`Scraper`]s drive case-list paging
//! and case extraction for one catalog each on top of a shared scheduler.

pub mod crawler;
pub mod error;
pub mod options;
pub mod scraper;
pub mod utils;

pub use crawler::{Delivery, Priority, Request, RequestScheduler, Response, SchedulerSettings};
pub use scraper::{
    CatalogSettings, Database, EventRecord, ScrapeEvent, ScrapeHandle, ScrapeSummary, Scraper,
    SearchParams,
};
