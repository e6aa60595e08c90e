//! Access Log Analysis CLI
//!
//! Runs the full pipeline over one access-log CSV file and prints the
//! resulting report as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use log_lens::analysis::run_analysis;
use log_lens::config::Config;
use log_lens::enrich_ips::IpEnrichmentService;
use log_lens::ipinfo::IpInfoApiClient;
use log_lens::schemas::AnalysisReport;

#[derive(Parser)]
#[command(name = "log-lens")]
#[command(version)]
#[command(about = "Access log analysis: parse, aggregate, enrich", long_about = None)]
struct Cli {
    /// Path to configuration file (optional, uses env vars if not provided)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one access-log CSV file and print the report as JSON
    Analyze {
        /// Input CSV file
        file: PathBuf,

        /// Override the ranking size for top paths and top IPs
        #[arg(short = 'n', long)]
        top_n: Option<usize>,
    },

    /// Validate configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::load().context("Failed to load config from environment")?,
    };

    match cli.command {
        Commands::Analyze { file, top_n } => {
            cmd_analyze(config, &file, top_n).await?;
        }
        Commands::CheckConfig => {
            cmd_check_config(&config)?;
        }
    }

    Ok(())
}

async fn cmd_analyze(mut config: Config, file: &PathBuf, top_n: Option<usize>) -> Result<()> {
    if let Some(n) = top_n {
        config.analysis.top_n = n;
    }
    config.validate()?;

    if config.ipinfo.token.is_empty() {
        info!("IPINFO_TOKEN not set, IP enrichment will likely report UNKNOWN");
    }

    let client = Arc::new(IpInfoApiClient::new(&config.ipinfo));
    let enrichment = IpEnrichmentService::new(client, &config.ipinfo);

    let handle = std::fs::File::open(file)
        .with_context(|| format!("Failed to open log file {:?}", file))?;

    info!("analyzing {:?} (top_n={})", file, config.analysis.top_n);
    let mut report = AnalysisReport::new(Uuid::new_v4());
    if let Err(e) = run_analysis(&mut report, BufReader::new(handle), &config, &enrichment).await {
        report.fail(e.to_string());
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_check_config(config: &Config) -> Result<()> {
    config.validate()?;

    // Redact the token before printing
    let mut printable = config.clone();
    if !printable.ipinfo.token.is_empty() {
        printable.ipinfo.token = "***".to_string();
    }
    println!("{}", toml::to_string_pretty(&printable)?);
    Ok(())
}
