//! Access Log Analysis Pipeline Library
//!
//! A streaming pipeline for analyzing gateway access logs: CSV parsing,
//! traffic aggregation, and IP enrichment via the ipinfo API.
//!
//! # Pipeline Stages
//!
//! 1. **Parsing** ([`parse_logs`]): Streams 12-column CSV rows into typed records, collecting error samples
//! 2. **Aggregation** ([`aggregate_stats`]): Maintains running counters for status codes, paths, IPs, and response times
//! 3. **Enrichment** ([`enrich_ips`]): Resolves top client IPs to AS/geo metadata with caching and retries
//! 4. **Orchestration** ([`analysis`]): Drives the stages for one upload and manages the report lifecycle
//!
//! # Example
//!
//! ```no_run
//! use log_lens::analysis::run_analysis;
//! use log_lens::config::Config;
//! use log_lens::enrich_ips::IpEnrichmentService;
//! use log_lens::ipinfo::IpInfoApiClient;
//! use log_lens::schemas::AnalysisReport;
//! use std::io::BufReader;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let client = Arc::new(IpInfoApiClient::new(&config.ipinfo));
//!     let enrichment = IpEnrichmentService::new(client, &config.ipinfo);
//!
//!     let file = std::fs::File::open("access.csv")?;
//!     let mut report = AnalysisReport::new(Uuid::new_v4());
//!     run_analysis(&mut report, BufReader::new(file), &config, &enrichment).await?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

pub mod aggregate_stats;
pub mod analysis;
pub mod config;
pub mod enrich_ips;
pub mod ipinfo;
pub mod parse_logs;
pub mod schemas;

// Re-export commonly used types
pub use config::Config;
pub use schemas::{AccessLogRecord, AnalysisReport, AnalysisStatus, IpInfo, ParseStats};
