//! Crawl driver: turns a search into case-list pages, case documents and
//! finally [`EventRecord`]s.
//!
//! The driver owns no network code. It enqueues requests on a shared
//! [`RequestScheduler`] and reacts to the deliveries tagged with its own
//! database, so several scrapers can share one scheduler.

pub mod case;
pub mod catalog;
pub mod ciss;
pub mod nass;
pub mod record;
pub mod xml;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crawler::request::{Priority, Response};
use crate::crawler::scheduler::{Delivery, RequestScheduler};
use crate::error::ExtractError;

pub use case::{CaseDocument, CaseExtraction, KeyEvent};
pub use catalog::{Catalog, CatalogSettings, Database, SearchParams, ANY};
pub use record::{Derived, EventRecord};

/// Counters of one crawl
#[derive(Debug, Clone)]
pub struct ScrapeState {
    pub run_id: Uuid,
    pub database: Database,
    /// Last case-list page requested (1-based)
    pub page: u32,
    pub success: u32,
    pub failed: u32,
    pub events: u32,
    pub started_at: DateTime<Utc>,
    pub running: bool,
    /// Case requests enqueued but not yet answered
    pub outstanding: usize,
    /// No further case-list page will be requested
    pub list_exhausted: bool,
}

impl ScrapeState {
    fn new(database: Database) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            database,
            page: 1,
            success: 0,
            failed: 0,
            events: 0,
            started_at: Utc::now(),
            running: true,
            outstanding: 0,
            list_exhausted: false,
        }
    }

    fn is_drained(&self) -> bool {
        self.list_exhausted && self.outstanding == 0
    }
}

/// Why a crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Every case-list page and case was processed
    Exhausted,
    /// [`ScrapeHandle::stop`] was called
    Stopped,
    /// The scheduler stopped and the delivery stream ended
    SchedulerStopped,
}

/// Final report of a crawl
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    pub run_id: Uuid,
    pub database: Database,
    pub pages: u32,
    pub success: u32,
    pub failed: u32,
    pub events: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub reason: CompletionReason,
}

/// What a running scrape reports to its owner
#[derive(Debug, Clone)]
pub enum ScrapeEvent {
    Started { run_id: Uuid, database: Database },
    EventParsed {
        record: EventRecord,
        response: Arc<Response>,
    },
    Completed(ScrapeSummary),
}

/// Control over a running scrape
pub struct ScrapeHandle {
    stop_requested: Arc<AtomicBool>,
    stop: Arc<Notify>,
    task: JoinHandle<ScrapeSummary>,
}

impl ScrapeHandle {
    /// Ask the scrape to complete now. Queued work for it is cleared.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the scrape to complete
    pub async fn join(self) -> Result<ScrapeSummary, tokio::task::JoinError> {
        self.task.await
    }
}

/// Crawl driver for one catalog and one search
pub struct Scraper {
    catalog: Arc<dyn Catalog>,
    scheduler: RequestScheduler,
    search: SearchParams,
}

impl Scraper {
    pub fn new(catalog: Arc<dyn Catalog>, scheduler: RequestScheduler, search: SearchParams) -> Self {
        Self {
            catalog,
            scheduler,
            search,
        }
    }

    /// Start crawling. Must be called from within a tokio runtime.
    ///
    /// The returned receiver sees `Started`, one `EventParsed` per record and
    /// finally `Completed`.
    pub fn start(self) -> (ScrapeHandle, mpsc::UnboundedReceiver<ScrapeEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = ScrapeState::new(self.catalog.database());

        info!(
            "Starting {} scrape {} with {:?}",
            state.database, state.run_id, self.search
        );
        let _ = events_tx.send(ScrapeEvent::Started {
            run_id: state.run_id,
            database: state.database,
        });

        // Subscribe before the first request so no delivery can be missed
        let deliveries = self.scheduler.subscribe();
        self.scheduler
            .enqueue(self.catalog.case_list_request(&self.search, state.page));

        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());
        let run = ScrapeRun {
            catalog: self.catalog,
            scheduler: self.scheduler,
            search: self.search,
            state,
            seen: HashSet::new(),
            events: events_tx,
        };
        let task = tokio::spawn(run.drive(deliveries, Arc::clone(&stop_requested), Arc::clone(&stop)));

        (
            ScrapeHandle {
                stop_requested,
                stop,
                task,
            },
            events_rx,
        )
    }
}

/// State owned by the spawned crawl task
struct ScrapeRun {
    catalog: Arc<dyn Catalog>,
    scheduler: RequestScheduler,
    search: SearchParams,
    state: ScrapeState,
    /// Case ids already enqueued by this run
    seen: HashSet<String>,
    events: mpsc::UnboundedSender<ScrapeEvent>,
}

impl ScrapeRun {
    async fn drive(
        mut self,
        mut deliveries: mpsc::UnboundedReceiver<Delivery>,
        stop_requested: Arc<AtomicBool>,
        stop: Arc<Notify>,
    ) -> ScrapeSummary {
        let reason = loop {
            if stop_requested.load(Ordering::SeqCst) {
                break CompletionReason::Stopped;
            }

            tokio::select! {
                _ = stop.notified() => break CompletionReason::Stopped,
                delivery = deliveries.recv() => match delivery {
                    None => break CompletionReason::SchedulerStopped,
                    Some(delivery) => {
                        if !self.owns(&delivery) {
                            continue;
                        }
                        match delivery.request.priority {
                            Priority::CASE_LIST => self.on_case_list(&delivery),
                            _ => self.on_case(&delivery),
                        }
                        if self.state.is_drained() {
                            break CompletionReason::Exhausted;
                        }
                    }
                },
            }
        };

        self.complete(reason)
    }

    /// Deliveries of this catalog's case-list and case requests
    fn owns(&self, delivery: &Delivery) -> bool {
        let priority = delivery.request.priority;
        (priority == Priority::CASE_LIST || priority == Priority::CASE)
            && delivery.request.tag_matches(&self.catalog.tag())
    }

    fn on_case_list(&mut self, delivery: &Delivery) {
        if !self.state.running || self.state.list_exhausted {
            return;
        }

        let page = delivery
            .request
            .tag
            .get("page")
            .cloned()
            .unwrap_or_default();
        let response = match delivery.response.as_deref() {
            Some(response) if response.is_success() && !response.is_empty() => response,
            Some(response) if !response.is_success() => {
                warn!(
                    "{} case-list page {} returned HTTP {}; ending the list",
                    self.state.database, page, response.status
                );
                self.state.list_exhausted = true;
                return;
            }
            Some(_) => {
                debug!("{} case-list page {} is empty", self.state.database, page);
                self.state.list_exhausted = true;
                return;
            }
            None => {
                warn!(
                    "{} case-list page {} failed to download; ending the list",
                    self.state.database, page
                );
                self.state.list_exhausted = true;
                return;
            }
        };

        let ids = self.catalog.case_ids(&response.text());
        let fresh: Vec<String> = ids
            .into_iter()
            .filter(|id| self.seen.insert(id.clone()))
            .collect();
        if fresh.is_empty() {
            debug!(
                "{} case-list page {} has no new cases",
                self.state.database, page
            );
            self.state.list_exhausted = true;
            return;
        }

        info!(
            "{} page {}: {} case(s) queued",
            self.state.database,
            page,
            fresh.len()
        );
        for id in &fresh {
            self.scheduler.enqueue(self.catalog.case_request(id));
            self.state.outstanding += 1;
        }

        self.state.page += 1;
        self.scheduler
            .enqueue(self.catalog.case_list_request(&self.search, self.state.page));
    }

    fn on_case(&mut self, delivery: &Delivery) {
        self.state.outstanding = self.state.outstanding.saturating_sub(1);
        let case_id = delivery
            .request
            .tag
            .get("case_id")
            .map(String::as_str)
            .unwrap_or("?");

        let Some(response) = delivery.response.as_ref() else {
            warn!("Case {} failed to download", case_id);
            self.state.failed += 1;
            return;
        };
        if !response.is_success() {
            warn!("Case {} returned HTTP {}", case_id, response.status);
            self.state.failed += 1;
            return;
        }

        match self.catalog.extract(&response.text(), &self.search) {
            Ok(extraction) if !extraction.records.is_empty() => {
                self.state.success += 1;
                for record in extraction.records {
                    self.state.events += 1;
                    let _ = self.events.send(ScrapeEvent::EventParsed {
                        record,
                        response: Arc::clone(response),
                    });
                }
            }
            Ok(_) => {
                warn!("Case {}: no key event produced a complete record", case_id);
                self.state.failed += 1;
            }
            Err(e @ (ExtractError::NoVehicleOfInterest | ExtractError::NoKeyEvent)) => {
                debug!("Case {} skipped: {}", case_id, e);
                self.state.failed += 1;
            }
            Err(e) => {
                warn!("Case {} could not be read: {}", case_id, e);
                self.state.failed += 1;
            }
        }
    }

    /// Clear this crawl's queued work (case lists first) and report
    fn complete(&mut self, reason: CompletionReason) -> ScrapeSummary {
        let tag = self.catalog.tag();
        let lists = self.scheduler.clear(Some(Priority::CASE_LIST), &tag);
        let cases = self.scheduler.clear(Some(Priority::CASE), &tag);
        self.state.running = false;

        let finished_at = Utc::now();
        let elapsed_secs = (finished_at - self.state.started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        let summary = ScrapeSummary {
            run_id: self.state.run_id,
            database: self.state.database,
            pages: self.state.page,
            success: self.state.success,
            failed: self.state.failed,
            events: self.state.events,
            started_at: self.state.started_at,
            finished_at,
            elapsed_secs,
            reason,
        };

        info!(
            "{} scrape {} finished ({:?}): {} page(s), {} case(s) ok, {} failed, {} event(s) in {:.1}s; dropped {} list and {} case request(s)",
            summary.database,
            summary.run_id,
            reason,
            summary.pages,
            summary.success,
            summary.failed,
            summary.events,
            summary.elapsed_secs,
            lists,
            cases
        );
        let _ = self.events.send(ScrapeEvent::Completed(summary.clone()));
        summary
    }
}
