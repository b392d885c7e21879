use anyhow::{Context, Result};
use futures::future::join_all;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

use case_crawler::options;
use case_crawler::scraper::{ScrapeEvent, ScrapeSummary, Scraper};
use case_crawler::utils::Metrics;
use case_crawler::RequestScheduler;

use crate::cli::config::AppConfig;
use crate::cli::ScrapeArgs;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Crawl the selected catalogs on one scheduler
pub async fn scrape(args: ScrapeArgs) -> Result<()> {
    let mut config = AppConfig::load(args.profile.as_deref())
        .context("Failed to load configuration")?;

    // Override configuration with command line parameters if provided
    if let Some(limit) = args.max_in_flight {
        config.scheduler.max_in_flight = Some(limit);
    }

    let writer: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).context(format!("Failed to create output file: {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    };
    let writer: SharedWriter = Arc::new(Mutex::new(writer));

    let scheduler = RequestScheduler::with_http(config.scheduler.clone())
        .context("Failed to build HTTP client")?;
    let dispatcher = scheduler.start();

    let search = args.search();
    let runs = args.database.databases().into_iter().map(|database| {
        let scraper = Scraper::new(database.catalog(&config.catalog), scheduler.clone(), search);
        let (handle, events) = scraper.start();
        let writer = Arc::clone(&writer);
        async move {
            let written = write_records(events, writer).await?;
            let summary = handle.join().await.context("Scrape task panicked")?;
            Ok::<_, anyhow::Error>((summary, written))
        }
    });
    let results = join_all(runs).await;

    scheduler.stop();
    if let Some(dispatcher) = dispatcher {
        let _ = dispatcher.await;
    }

    if let Ok(mut writer) = writer.lock() {
        writer.flush().context("Failed to flush output")?;
    }

    for result in results {
        let (summary, written) = result?;
        print_summary(&summary, written);
    }
    print_metrics(&scheduler.metrics().get_metrics().await);

    if let Some(path) = &args.output {
        info!("Records written to: {}", path.display());
    }

    Ok(())
}

/// Write every parsed record as one JSON line until the scrape ends
async fn write_records(mut events: mpsc::UnboundedReceiver<ScrapeEvent>, writer: SharedWriter) -> Result<usize> {
    let mut written = 0;

    while let Some(event) = events.recv().await {
        match event {
            ScrapeEvent::Started { run_id, database } => {
                info!("{} scrape {} started", database, run_id);
            }
            ScrapeEvent::EventParsed { record, .. } => {
                let line = serde_json::to_string(&record).context("Failed to serialize record")?;
                match writer.lock() {
                    Ok(mut out) => writeln!(out, "{}", line).context("Failed to write record")?,
                    Err(_) => warn!("Output writer is poisoned; dropping record {:?}", record.key()),
                }
                written += 1;
            }
            ScrapeEvent::Completed(summary) => {
                info!("{} scrape {} completed", summary.database, summary.run_id);
            }
        }
    }

    Ok(written)
}

fn print_summary(summary: &ScrapeSummary, written: usize) {
    eprintln!("{} scrape {}", summary.database, summary.run_id);
    eprintln!("  Outcome: {:?}", summary.reason);
    eprintln!("  Pages: {}", summary.pages);
    eprintln!("  Cases: {} ok, {} failed", summary.success, summary.failed);
    eprintln!("  Events: {} ({} written)", summary.events, written);
    eprintln!("  Started: {}", summary.started_at);
    eprintln!("  Elapsed: {:.1}s", summary.elapsed_secs);
}

fn print_metrics(metrics: &Metrics) {
    eprintln!("Requests: {} sent, {} ok, {} failed, {} from cache, {} dropped",
        metrics.total_requests,
        metrics.successful_requests,
        metrics.failed_requests,
        metrics.cache_hits,
        metrics.dropped_responses);
    eprintln!("Downloaded: {} bytes", metrics.bytes_downloaded);
    if let Some(average) = metrics.average_duration_ms() {
        eprintln!("Average request time: {:.0} ms", average);
        eprintln!("Slowest request: {} ms", metrics.max_duration_ms);
    }

    let mut codes: Vec<_> = metrics.status_codes.iter().collect();
    codes.sort();
    for (code, count) in codes {
        eprintln!("  HTTP {}: {}", code, count);
    }
}

/// Print the option lists of the search form
pub async fn options(profile: Option<String>) -> Result<()> {
    let config = AppConfig::load(profile.as_deref())?;
    let client = options::client(&config.scheduler.user_agent, config.scheduler.request_timeout())?;

    let search_options = options::spawn_search_refresh(client, config.catalog.nass_search_url.clone())
        .await
        .context("Search refresh task ended without a result")?
        .context("Failed to refresh search options")?;

    for (field, items) in &search_options.lists {
        println!("{}:", field);
        for item in items {
            println!("  {}\t{}", item.value, item.text);
        }
    }

    Ok(())
}

/// Print the models of one make
pub async fn models(make: i32, profile: Option<String>) -> Result<()> {
    let config = AppConfig::load(profile.as_deref())?;
    let client = options::client(&config.scheduler.user_agent, config.scheduler.request_timeout())?;

    let models = options::spawn_model_update(client, config.catalog.nass_models_url.clone(), make)
        .await
        .context("Model update task ended without a result")?
        .context(format!("Failed to fetch models for make {}", make))?;

    for model in models {
        println!("{}\t{}", model.value, model.text);
    }

    Ok(())
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = AppConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it with defaults if it does not exist
pub fn manage_profile(profile_name: String) -> Result<()> {
    let path = AppConfig::profile_path(&profile_name);
    let (config, created) = AppConfig::load_or_create(&path)
        .context(format!("Failed to load profile '{}'", profile_name))?;

    if created {
        warn!("Profile '{}' does not exist. Created a default profile.", profile_name);
        println!("Created default profile: {}", profile_name);
    } else {
        println!("Profile: {}", profile_name);
        println!("{}", serde_yaml::to_string(&config)?);
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = AppConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
