use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "warn,case_crawler=debug"
    } else {
        "warn,case_crawler=info"
    }
}

/// `RUST_LOG` wins over the verbosity flag
fn build_filter(verbose: bool, rust_log: Option<&str>) -> Result<EnvFilter> {
    let directives = rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_directives(verbose));
    EnvFilter::try_new(directives).context(format!("Invalid log filter '{}'", directives))
}

/// Install the global subscriber: console on stderr (stdout carries scraped
/// records) plus an optional plain-text file that is appended to.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(verbose, rust_log.as_deref())?;

    let console = fmt::layer()
        .with_target(verbose)
        .with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create log directory: {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(format!("Failed to open log file: {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Logging was already initialized")?;

    Ok(())
}

/// Platform log location, used when `--log-file` is given without a path
pub fn default_log_file() -> PathBuf {
    directories::ProjectDirs::from("com", "case-crawler", "case-crawler")
        .map(|dirs| dirs.data_dir().join("case-crawler.log"))
        .unwrap_or_else(|| PathBuf::from("./logs/case-crawler.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        assert!(build_filter(false, None).is_ok());
        assert!(build_filter(true, Some("  ")).is_ok());
        assert!(build_filter(false, Some("case_crawler=trace")).is_ok());
        assert_eq!(default_directives(true), "warn,case_crawler=debug");
    }

    #[test]
    fn test_default_log_file_name() {
        assert!(default_log_file().ends_with("case-crawler.log"));
    }
}
