//! Analysis orchestration: parse → aggregate → enrich.
//!
//! Ties the pipeline stages together for one uploaded log file and manages
//! the report lifecycle (PROCESSING → COMPLETED / FAILED). Reports live in
//! an in-memory keyed store; submission runs the pipeline on a background
//! task so callers can poll for completion.

use crate::aggregate_stats::LogAggregator;
use crate::config::Config;
use crate::enrich_ips::IpEnrichmentService;
use crate::parse_logs::{LogParser, ParseError};
use crate::schemas::{AnalysisReport, TopEntry};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("file is empty")]
    EmptyFile,

    #[error("file size {actual} exceeds limit of {limit} bytes")]
    FileTooLarge { actual: u64, limit: u64 },

    #[error("only .csv files are accepted: {0}")]
    InvalidExtension(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Drive the full pipeline over one log stream, filling `report` in place.
///
/// The parse-and-aggregate stage is synchronous and single-threaded; the
/// parser blocks on the aggregator sink before reading the next line.
/// Enrichment afterwards is the only parallel region. Only a stream I/O
/// failure surfaces as an error; the caller decides how to record it.
pub async fn run_analysis<R: BufRead>(
    report: &mut AnalysisReport,
    reader: R,
    config: &Config,
    enrichment: &IpEnrichmentService,
) -> Result<(), ParseError> {
    let started = Instant::now();
    let top_n = config.analysis.top_n;

    let mut aggregator = LogAggregator::new();
    let parser = LogParser::new(config.analysis.max_lines);
    let stats = parser.parse(reader, |record| aggregator.absorb(&record))?;
    let parse_elapsed = started.elapsed();

    report.total_requests = aggregator.total_requests();
    report.status_code_counts = aggregator.status_code_table();
    report.status_group_ratios = aggregator.status_group_ratios();
    report.response_time_stats = aggregator.response_time_stats();
    report.top_paths = to_entries(aggregator.path_counts().top_n(top_n));

    let top_ips = aggregator.ip_counts().top_n(top_n);
    report.top_ips = to_entries(top_ips.clone());

    let enrich_started = Instant::now();
    let ip_list: Vec<String> = top_ips.into_iter().map(|(ip, _)| ip).collect();
    report.ip_details = enrichment.enrich(&ip_list).await;
    let enrich_elapsed = enrich_started.elapsed();

    report.parse_error_count = stats.error_count;
    report.parse_error_samples = stats.error_samples;
    report.complete();

    info!(
        "analysis finished: id={}, {} requests, parse={}ms, enrich={}ms, total={}ms",
        report.analysis_id,
        report.total_requests,
        parse_elapsed.as_millis(),
        enrich_elapsed.as_millis(),
        started.elapsed().as_millis()
    );
    Ok(())
}

fn to_entries(ranked: Vec<(String, u64)>) -> Vec<TopEntry> {
    ranked
        .into_iter()
        .map(|(key, count)| TopEntry::new(key, count))
        .collect()
}

/// Concurrent in-memory report store, keyed by analysis id.
#[derive(Clone, Default)]
pub struct AnalysisStore {
    inner: Arc<RwLock<HashMap<Uuid, AnalysisReport>>>,
}

impl AnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, report: AnalysisReport) {
        self.inner
            .write()
            .expect("analysis store lock poisoned")
            .insert(report.analysis_id, report);
    }

    pub fn get(&self, analysis_id: &Uuid) -> Option<AnalysisReport> {
        self.inner
            .read()
            .expect("analysis store lock poisoned")
            .get(analysis_id)
            .cloned()
    }

    pub fn remove(&self, analysis_id: &Uuid) {
        self.inner
            .write()
            .expect("analysis store lock poisoned")
            .remove(analysis_id);
    }
}

/// Submit-and-poll front-end around the pipeline.
#[derive(Clone)]
pub struct AnalysisService {
    config: Config,
    enrichment: IpEnrichmentService,
    store: AnalysisStore,
}

impl AnalysisService {
    pub fn new(config: Config, enrichment: IpEnrichmentService) -> Self {
        Self {
            config,
            enrichment,
            store: AnalysisStore::new(),
        }
    }

    /// Validate the upload, register a PROCESSING report, and run the
    /// pipeline on a background task. Returns the id to poll with.
    pub fn submit(&self, path: PathBuf) -> Result<Uuid, AnalysisError> {
        self.validate_upload(&path)?;

        let analysis_id = Uuid::new_v4();
        self.store.save(AnalysisReport::new(analysis_id));
        info!("analysis submitted: id={}, file={:?}", analysis_id, path);

        let service = self.clone();
        tokio::spawn(async move {
            service.execute(analysis_id, path).await;
        });

        Ok(analysis_id)
    }

    /// Poll the current report. Aggregate fields hold their defaults while
    /// the status is still PROCESSING.
    pub fn get(&self, analysis_id: &Uuid) -> Option<AnalysisReport> {
        self.store.get(analysis_id)
    }

    async fn execute(&self, analysis_id: Uuid, path: PathBuf) {
        let mut report = self
            .store
            .get(&analysis_id)
            .unwrap_or_else(|| AnalysisReport::new(analysis_id));

        let outcome = match File::open(&path) {
            Ok(file) => {
                run_analysis(
                    &mut report,
                    BufReader::new(file),
                    &self.config,
                    &self.enrichment,
                )
                .await
                .map_err(|e| e.to_string())
            }
            Err(e) => Err(format!("failed to open log file: {e}")),
        };

        if let Err(reason) = outcome {
            error!("analysis failed: id={}, reason={}", analysis_id, reason);
            report.fail(reason);
        }
        self.store.save(report);
    }

    fn validate_upload(&self, path: &Path) -> Result<(), AnalysisError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !name.to_lowercase().ends_with(".csv") {
            warn!("upload rejected, bad extension: {:?}", path);
            return Err(AnalysisError::InvalidExtension(name));
        }

        let size = std::fs::metadata(path)?.len();
        if size == 0 {
            warn!("upload rejected, empty file: {:?}", path);
            return Err(AnalysisError::EmptyFile);
        }
        let limit = self.config.analysis.max_file_size;
        if size > limit {
            warn!(
                "upload rejected, too large: {:?} ({} > {} bytes)",
                path, size, limit
            );
            return Err(AnalysisError::FileTooLarge {
                actual: size,
                limit,
            });
        }
        Ok(())
    }
}
