pub mod commands;
pub mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use case_crawler::scraper::{Database, SearchParams, ANY};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also append logs to a file (platform default if no path is given)
    #[arg(long, global = true, num_args = 0..=1, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a catalog and print matching collision events as JSON lines
    Scrape(ScrapeArgs),

    /// Download the search form's option lists
    Options {
        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// List the vehicle models of a make
    Models {
        /// Make id as listed by `options`
        #[arg(short, long, allow_hyphen_values = true)]
        make: i32,

        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Which catalogs to crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatabaseChoice {
    Nass,
    Ciss,
    All,
}

impl DatabaseChoice {
    pub fn databases(self) -> Vec<Database> {
        match self {
            DatabaseChoice::Nass => vec![Database::Nass],
            DatabaseChoice::Ciss => vec![Database::Ciss],
            DatabaseChoice::All => Database::ALL.to_vec(),
        }
    }
}

/// Search and run options of `scrape`. Ids of -1 mean "any".
#[derive(Args, Debug, Clone)]
pub struct ScrapeArgs {
    /// Catalog to crawl
    #[arg(short, long, value_enum, default_value = "all")]
    pub database: DatabaseChoice,

    #[arg(long, default_value_t = ANY, allow_hyphen_values = true)]
    pub make: i32,

    #[arg(long, default_value_t = ANY, allow_hyphen_values = true)]
    pub model: i32,

    #[arg(long, default_value_t = ANY, allow_hyphen_values = true)]
    pub start_year: i32,

    #[arg(long, default_value_t = ANY, allow_hyphen_values = true)]
    pub end_year: i32,

    /// Primary damage area id
    #[arg(long, default_value_t = ANY, allow_hyphen_values = true)]
    pub damage: i32,

    #[arg(long, default_value_t = ANY, allow_hyphen_values = true)]
    pub secondary_damage: i32,

    /// Minimum delta-V (km/h)
    #[arg(long, default_value_t = ANY, allow_hyphen_values = true)]
    pub min_dv: i32,

    /// Maximum delta-V (km/h)
    #[arg(long, default_value_t = ANY, allow_hyphen_values = true)]
    pub max_dv: i32,

    /// Write records here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Cap on concurrent requests
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Configuration profile to use
    #[arg(short, long)]
    pub profile: Option<String>,
}

impl ScrapeArgs {
    pub fn search(&self) -> SearchParams {
        SearchParams {
            make: self.make,
            model: self.model,
            start_year: self.start_year,
            end_year: self.end_year,
            primary_damage: self.damage,
            secondary_damage: self.secondary_damage,
            min_dv: self.min_dv,
            max_dv: self.max_dv,
        }
    }
}

impl Cli {
    /// Log file requested on the command line, if any
    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_file
            .as_ref()
            .map(|path| path.clone().unwrap_or_else(case_crawler::utils::default_log_file))
    }
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scrape(args) => {
            info!("Starting scrape of {:?}", args.database);
            commands::scrape(args).await
        }
        Commands::Options { profile } => {
            info!("Refreshing search options");
            commands::options(profile).await
        }
        Commands::Models { make, profile } => {
            info!("Updating models for make {}", make);
            commands::models(make, profile).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        }
    }
}
