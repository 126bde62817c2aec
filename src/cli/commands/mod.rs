//! CLI parser and command dispatch.

mod categories;
mod init;
mod run;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{delay_from_secs, load_settings_with_options, HarvestOptions, LoadOptions};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Incremental, resumable harvester for paginated media catalogs")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the database and harvest.toml
    #[arg(long, short = 'd', global = true, env = "HARVEST_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Harvest one category, or every category in order
    Run {
        /// Category ID (all categories when omitted)
        #[arg(long)]
        category: Option<u32>,
        /// Start page, ignoring the stored checkpoint
        #[arg(long, requires = "category")]
        page: Option<u32>,
        /// Per-worker pause after each request, in seconds
        #[arg(long)]
        delay: Option<f64>,
        /// Maximum concurrent detail and episode requests
        #[arg(short, long)]
        workers: Option<usize>,
        /// Works per database batch (episodes flush at five times this)
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Only walk the first two pages of each category
        #[arg(long)]
        test: bool,
    },

    /// Show stored totals and per-category checkpoints
    Status,

    /// List the configured categories
    Categories,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        data_dir: cli.data_dir,
        config_path: cli.config,
    };
    let (settings, config) = load_settings_with_options(options)?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Run {
            category,
            page,
            delay,
            workers,
            batch_size,
            test,
        } => {
            let mut options: HarvestOptions = config.harvest_options()?;
            if let Some(secs) = delay {
                options.delay = delay_from_secs(secs)?;
            }
            if let Some(workers) = workers {
                options.workers = workers.max(1);
            }
            if let Some(batch_size) = batch_size {
                options.batch_size = batch_size.max(1);
            }
            options.test_mode = test;

            run::cmd_run(&settings, &config, category, page, options).await
        }
        Commands::Status => status::cmd_status(&settings, &config).await,
        Commands::Categories => categories::cmd_categories(&settings, &config).await,
    }
}
