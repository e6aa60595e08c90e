//! Data schemas for the log analysis pipeline.
//!
//! All records exchanged between pipeline stages are defined here as serde
//! structs. This module serves as the canonical schema definition for the
//! entire pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// PART A: Access Log Schema
// ============================================================================

/// One parsed access-log row. Field order matches the CSV header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessLogRecord {
    /// Timestamp string as it appears in the log (not normalized)
    pub time_generated: String,

    /// Client source IP address
    pub client_ip: String,

    /// HTTP method (GET, POST, ...)
    pub http_method: String,

    /// Request path
    pub request_uri: String,

    /// User-Agent header value
    pub user_agent: String,

    /// HTTP status code
    pub http_status: u16,

    /// Protocol version (e.g. HTTP/1.1)
    pub http_version: String,

    /// Bytes received from the client
    pub received_bytes: u64,

    /// Bytes sent to the client
    pub sent_bytes: u64,

    /// Client response time in seconds
    pub client_response_time: f64,

    /// TLS protocol label, may be empty for plaintext requests
    pub ssl_protocol: String,

    /// Original request path including query arguments
    pub original_request_uri: String,
}

// ============================================================================
// PART B: Parse Statistics
// ============================================================================

/// Sample of a line that failed to parse. At most
/// [`MAX_ERROR_SAMPLES`](crate::parse_logs::MAX_ERROR_SAMPLES) are retained
/// per parse; later failures are counted but not stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParseErrorSample {
    /// 1-based data line number the failure occurred on
    pub line_number: u64,

    /// Original line content, truncated to 200 characters
    pub line: String,

    /// Human-readable failure reason
    pub reason: String,
}

/// Final statistics returned by a parse run.
///
/// Invariant: `lines_processed == success_count + error_count`, and
/// `error_samples.len() == min(error_count, 10)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseStats {
    /// Non-blank data lines consumed (header excluded)
    pub lines_processed: u64,

    /// Lines that produced an [`AccessLogRecord`]
    pub success_count: u64,

    /// Lines rejected with a classified error
    pub error_count: u64,

    /// First few rejected lines, for diagnostics
    pub error_samples: Vec<ParseErrorSample>,
}

// ============================================================================
// PART C: Aggregate Statistics
// ============================================================================

/// Share of requests per status-code group, each rounded to 4 decimals.
///
/// Codes outside all four ranges (below 200 or 600+) are counted in the
/// total but belong to no group, so the four ratios need not sum to 1.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusGroupRatios {
    #[serde(rename = "2xx")]
    pub success: f64,

    #[serde(rename = "3xx")]
    pub redirect: f64,

    #[serde(rename = "4xx")]
    pub client_error: f64,

    #[serde(rename = "5xx")]
    pub server_error: f64,
}

/// Response time distribution in seconds. All zeros for an empty sample.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseTimeStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,

    /// Median (nearest-rank)
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// One entry of a top-N ranking, highest counts first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopEntry {
    pub key: String,
    pub count: u64,
}

impl TopEntry {
    pub fn new(key: impl Into<String>, count: u64) -> Self {
        Self {
            key: key.into(),
            count,
        }
    }
}

// ============================================================================
// PART D: IP Enrichment Schema
// ============================================================================

/// Reserved marker for enrichment fields when lookup could not be completed
pub const UNKNOWN: &str = "UNKNOWN";

/// AS and geo metadata for one IP address, as returned by the ipinfo API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpInfo {
    /// The looked-up address
    pub ip: String,

    /// Autonomous system identifier (e.g. "AS15169")
    pub asn: String,

    /// Autonomous system name
    pub as_name: String,

    /// Autonomous system domain
    pub as_domain: String,

    /// ISO country code
    pub country_code: String,

    /// Country name
    pub country: String,

    /// Continent code
    pub continent_code: String,

    /// Continent name
    pub continent: String,
}

impl IpInfo {
    /// Sentinel returned when lookup failed or was rate limited.
    /// Never written to the cache.
    pub fn unknown(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            asn: UNKNOWN.to_string(),
            as_name: UNKNOWN.to_string(),
            as_domain: UNKNOWN.to_string(),
            country_code: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
            continent_code: UNKNOWN.to_string(),
            continent: UNKNOWN.to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.country == UNKNOWN
    }
}

// ============================================================================
// PART E: Analysis Report
// ============================================================================

/// Lifecycle state of one analysis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisStatus {
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisStatus::Processing => write!(f, "PROCESSING"),
            AnalysisStatus::Completed => write!(f, "COMPLETED"),
            AnalysisStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Full result of one analysis run. Aggregate fields hold their defaults
/// until the run completes; `failure_reason` is set only on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Unique analysis id
    pub analysis_id: Uuid,

    pub status: AnalysisStatus,

    /// Total parsed requests
    pub total_requests: u64,

    /// Requests per exact status code
    pub status_code_counts: BTreeMap<u16, u64>,

    /// Share of requests per status group
    pub status_group_ratios: StatusGroupRatios,

    /// Most requested paths, descending by count
    pub top_paths: Vec<TopEntry>,

    /// Most frequent client IPs, descending by count
    pub top_ips: Vec<TopEntry>,

    /// Enrichment metadata for the top IPs, same order as `top_ips`
    pub ip_details: Vec<IpInfo>,

    /// Response time distribution over all parsed requests
    pub response_time_stats: ResponseTimeStats,

    /// Lines rejected during parsing
    pub parse_error_count: u64,

    /// First few rejected lines
    pub parse_error_samples: Vec<ParseErrorSample>,

    pub created_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Fatal failure reason, set when `status` is FAILED
    pub failure_reason: Option<String>,
}

impl AnalysisReport {
    pub fn new(analysis_id: Uuid) -> Self {
        Self {
            analysis_id,
            status: AnalysisStatus::Processing,
            total_requests: 0,
            status_code_counts: BTreeMap::new(),
            status_group_ratios: StatusGroupRatios::default(),
            top_paths: Vec::new(),
            top_ips: Vec::new(),
            ip_details: Vec::new(),
            response_time_stats: ResponseTimeStats::default(),
            parse_error_count: 0,
            parse_error_samples: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        self.status = AnalysisStatus::Completed;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.completed_at = Some(Utc::now());
        self.status = AnalysisStatus::Failed;
    }
}
