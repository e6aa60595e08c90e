//! Streaming aggregation over parsed access-log records.
//!
//! A [`LogAggregator`] is the sink side of the parse stage: it absorbs one
//! record at a time and maintains running counters, so the full record set
//! is never buffered. Rankings, ratios, and percentile statistics are
//! derived from the counters after the stream ends.
//!
//! One aggregator instance belongs to exactly one analysis; it is never
//! shared across concurrent tasks.

use crate::schemas::{AccessLogRecord, ResponseTimeStats, StatusGroupRatios};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Counter keyed by an arbitrary hashable key.
///
/// Each key remembers the order it was first seen, which makes top-N
/// extraction deterministic: ties on count rank earlier-seen keys first.
#[derive(Debug, Default)]
pub struct CountMap<K> {
    entries: HashMap<K, CountEntry>,
    next_seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct CountEntry {
    count: u64,
    first_seen: u64,
}

impl<K: Eq + Hash + Clone> CountMap<K> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn increment(&mut self, key: K) {
        let seq = self.next_seq;
        let entry = self.entries.entry(key).or_insert(CountEntry {
            count: 0,
            first_seen: seq,
        });
        if entry.count == 0 {
            self.next_seq += 1;
        }
        entry.count += 1;
    }

    pub fn get(&self, key: &K) -> u64 {
        self.entries.get(key).map(|e| e.count).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.entries.iter().map(|(k, e)| (k, e.count))
    }

    /// The `n` keys with the largest counts, strictly descending by count.
    /// Ties rank in first-seen order; `n == 0` yields an empty result and
    /// `n` beyond the distinct key count yields everything.
    pub fn top_n(&self, n: usize) -> Vec<(K, u64)> {
        if n == 0 {
            return Vec::new();
        }
        let mut ranked: Vec<(&K, CountEntry)> =
            self.entries.iter().map(|(k, e)| (k, *e)).collect();
        ranked.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then(a.1.first_seen.cmp(&b.1.first_seen))
        });
        ranked
            .into_iter()
            .take(n)
            .map(|(k, e)| (k.clone(), e.count))
            .collect()
    }
}

/// Streaming aggregator over one record stream.
#[derive(Debug, Default)]
pub struct LogAggregator {
    total_requests: u64,
    status_code_counts: CountMap<u16>,
    path_counts: CountMap<String>,
    ip_counts: CountMap<String>,
    response_times: Vec<f64>,
}

impl LogAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one record into the running counters.
    pub fn absorb(&mut self, record: &AccessLogRecord) {
        self.total_requests += 1;
        self.status_code_counts.increment(record.http_status);
        self.path_counts.increment(record.request_uri.clone());
        self.ip_counts.increment(record.client_ip.clone());
        self.response_times.push(record.client_response_time);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn status_code_counts(&self) -> &CountMap<u16> {
        &self.status_code_counts
    }

    pub fn path_counts(&self) -> &CountMap<String> {
        &self.path_counts
    }

    pub fn ip_counts(&self) -> &CountMap<String> {
        &self.ip_counts
    }

    /// Exact status-code counts in ascending code order, for the report.
    pub fn status_code_table(&self) -> BTreeMap<u16, u64> {
        self.status_code_counts
            .iter()
            .map(|(code, count)| (*code, count))
            .collect()
    }

    /// Share of requests per status group, each rounded to 4 decimals.
    /// All ratios are 0.0 when no requests were absorbed.
    pub fn status_group_ratios(&self) -> StatusGroupRatios {
        StatusGroupRatios {
            success: self.group_ratio(200, 299),
            redirect: self.group_ratio(300, 399),
            client_error: self.group_ratio(400, 499),
            server_error: self.group_ratio(500, 599),
        }
    }

    fn group_ratio(&self, from: u16, to: u16) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let count: u64 = self
            .status_code_counts
            .iter()
            .filter(|(code, _)| **code >= from && **code <= to)
            .map(|(_, count)| count)
            .sum();
        round4(count as f64 / self.total_requests as f64)
    }

    /// Response-time distribution via nearest-rank percentiles.
    pub fn response_time_stats(&self) -> ResponseTimeStats {
        if self.response_times.is_empty() {
            return ResponseTimeStats::default();
        }

        let mut sorted = self.response_times.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = sorted.iter().sum();
        ResponseTimeStats {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg: sum / sorted.len() as f64,
            p50: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile: index `ceil(p/100 × n) − 1` into the ascending
/// sample, clamped to a valid index.
fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ip: &str, path: &str, status: u16, response_time: f64) -> AccessLogRecord {
        AccessLogRecord {
            time_generated: "2026-01-29T05:44:10".to_string(),
            client_ip: ip.to_string(),
            http_method: "GET".to_string(),
            request_uri: path.to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            http_status: status,
            http_version: "HTTP/1.1".to_string(),
            received_bytes: 100,
            sent_bytes: 200,
            client_response_time: response_time,
            ssl_protocol: "TLSv1.2".to_string(),
            original_request_uri: path.to_string(),
        }
    }

    #[test]
    fn test_absorb_single() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/api/test", 200, 0.5));

        assert_eq!(agg.total_requests(), 1);
        assert_eq!(agg.ip_counts().get(&"1.1.1.1".to_string()), 1);
        assert_eq!(agg.path_counts().get(&"/api/test".to_string()), 1);
        assert_eq!(agg.status_code_counts().get(&200), 1);
    }

    #[test]
    fn test_absorb_accumulates_same_keys() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/api/test", 200, 0.5));
        agg.absorb(&record("1.1.1.1", "/api/test", 200, 0.5));
        agg.absorb(&record("1.1.1.1", "/api/test", 404, 0.5));

        assert_eq!(agg.total_requests(), 3);
        assert_eq!(agg.ip_counts().get(&"1.1.1.1".to_string()), 3);
        assert_eq!(agg.status_code_counts().get(&200), 2);
        assert_eq!(agg.status_code_counts().get(&404), 1);
    }

    #[test]
    fn test_top_n_descending() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/a", 200, 0.1));
        agg.absorb(&record("2.2.2.2", "/b", 200, 0.1));
        agg.absorb(&record("2.2.2.2", "/b", 200, 0.1));
        agg.absorb(&record("3.3.3.3", "/c", 200, 0.1));
        agg.absorb(&record("3.3.3.3", "/c", 200, 0.1));
        agg.absorb(&record("3.3.3.3", "/c", 200, 0.1));

        let top2 = agg.ip_counts().top_n(2);
        assert_eq!(
            top2,
            vec![("3.3.3.3".to_string(), 3), ("2.2.2.2".to_string(), 2)]
        );
    }

    #[test]
    fn test_top_n_larger_than_distinct_keys() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/a", 200, 0.1));
        agg.absorb(&record("2.2.2.2", "/b", 200, 0.1));

        assert_eq!(agg.ip_counts().top_n(10).len(), 2);
    }

    #[test]
    fn test_top_n_zero_is_empty() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/a", 200, 0.1));
        assert!(agg.ip_counts().top_n(0).is_empty());
    }

    #[test]
    fn test_top_n_ties_break_by_first_seen() {
        let mut counts = CountMap::new();
        counts.increment("beta");
        counts.increment("alpha");
        counts.increment("beta");
        counts.increment("alpha");
        counts.increment("gamma");

        // beta and alpha tie at 2; beta was seen first
        let top = counts.top_n(3);
        assert_eq!(top, vec![("beta", 2), ("alpha", 2), ("gamma", 1)]);
    }

    #[test]
    fn test_status_group_ratios() {
        let mut agg = LogAggregator::new();
        for _ in 0..7 {
            agg.absorb(&record("1.1.1.1", "/", 200, 0.1));
        }
        agg.absorb(&record("1.1.1.1", "/", 301, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 404, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 500, 0.1));

        let ratios = agg.status_group_ratios();
        assert_eq!(ratios.success, 0.7);
        assert_eq!(ratios.redirect, 0.1);
        assert_eq!(ratios.client_error, 0.1);
        assert_eq!(ratios.server_error, 0.1);
    }

    #[test]
    fn test_ratios_zero_requests() {
        let agg = LogAggregator::new();
        let ratios = agg.status_group_ratios();
        assert_eq!(ratios, StatusGroupRatios::default());
    }

    #[test]
    fn test_boundary_codes() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/", 199, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 299, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 300, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 599, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 600, 0.1));

        let ratios = agg.status_group_ratios();
        // 199 and 600 land in no bucket but still count toward the total of 5
        assert_eq!(ratios.success, 0.2);
        assert_eq!(ratios.redirect, 0.2);
        assert_eq!(ratios.client_error, 0.0);
        assert_eq!(ratios.server_error, 0.2);
        assert_eq!(agg.total_requests(), 5);
    }

    #[test]
    fn test_ratio_rounding_to_four_decimals() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/", 200, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 200, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 500, 0.1));

        // 2/3 = 0.6666..., rounds to 0.6667
        assert_eq!(agg.status_group_ratios().success, 0.6667);
    }

    #[test]
    fn test_response_time_stats_empty() {
        let agg = LogAggregator::new();
        assert_eq!(agg.response_time_stats(), ResponseTimeStats::default());
    }

    #[test]
    fn test_response_time_stats_nearest_rank() {
        let mut agg = LogAggregator::new();
        // 10 values 0.1 .. 1.0, absorbed out of order
        for v in [0.5, 0.1, 1.0, 0.3, 0.7, 0.2, 0.9, 0.4, 0.8, 0.6] {
            agg.absorb(&record("1.1.1.1", "/", 200, v));
        }

        let stats = agg.response_time_stats();
        assert_eq!(stats.min, 0.1);
        assert_eq!(stats.max, 1.0);
        assert!((stats.avg - 0.55).abs() < 1e-9);
        // nearest-rank: ceil(0.5*10)-1 = 4 → 0.5; ceil(0.95*10)-1 = 9 → 1.0
        assert_eq!(stats.p50, 0.5);
        assert_eq!(stats.p95, 1.0);
        assert_eq!(stats.p99, 1.0);
    }

    #[test]
    fn test_response_time_stats_single_value() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/", 200, 0.42));

        let stats = agg.response_time_stats();
        assert_eq!(stats.min, 0.42);
        assert_eq!(stats.max, 0.42);
        assert_eq!(stats.p50, 0.42);
        assert_eq!(stats.p99, 0.42);
    }

    #[test]
    fn test_status_code_table_sorted() {
        let mut agg = LogAggregator::new();
        agg.absorb(&record("1.1.1.1", "/", 500, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 200, 0.1));
        agg.absorb(&record("1.1.1.1", "/", 301, 0.1));

        let table = agg.status_code_table();
        let codes: Vec<u16> = table.keys().copied().collect();
        assert_eq!(codes, vec![200, 301, 500]);
    }
}
