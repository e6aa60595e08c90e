//! Cached, retrying IP enrichment.
//!
//! Maps a short ordered list of addresses to metadata records. Each lookup
//! probes a shared bounded cache first; misses go to the remote client with
//! a bounded retry loop. Rate-limit responses short-circuit to the unknown
//! sentinel without retrying, and the sentinel is never cached so a later
//! call will try the remote fetch again.

use crate::config::IpInfoConfig;
use crate::ipinfo::IpInfoClient;
use crate::schemas::IpInfo;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Enrichment front-end over a remote [`IpInfoClient`].
///
/// Cheap to clone; the cache and client are shared across clones, so all
/// concurrent enrichment calls in a process see one cache.
#[derive(Clone)]
pub struct IpEnrichmentService {
    client: Arc<dyn IpInfoClient>,
    cache: Cache<String, IpInfo>,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
}

impl IpEnrichmentService {
    pub fn new(client: Arc<dyn IpInfoClient>, config: &IpInfoConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache.max_size)
            .time_to_live(Duration::from_secs(config.cache.expire_after_write_secs))
            .build();

        Self {
            client,
            cache,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            max_retries: config.max_retries,
        }
    }

    /// Resolve metadata for every address, preserving input order.
    ///
    /// One task per address is fanned out onto the runtime, bounded by the
    /// configured concurrency; the call returns once all lookups finished.
    /// Failures degrade to the unknown sentinel, never to an error.
    pub async fn enrich(&self, ips: &[String]) -> Vec<IpInfo> {
        let mut handles = Vec::with_capacity(ips.len());
        for ip in ips {
            let service = self.clone();
            let ip = ip.clone();
            handles.push(tokio::spawn(async move { service.lookup(ip).await }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, ip) in handles.into_iter().zip(ips) {
            match handle.await {
                Ok(info) => results.push(info),
                Err(err) => {
                    error!("enrichment task panicked: ip={}, error={}", ip, err);
                    results.push(IpInfo::unknown(ip.clone()));
                }
            }
        }

        let resolved = results.iter().filter(|r| !r.is_unknown()).count();
        info!(
            "ip enrichment finished: total={}, resolved={}, unknown={}",
            ips.len(),
            resolved,
            ips.len() - resolved
        );
        results
    }

    async fn lookup(&self, ip: String) -> IpInfo {
        if let Some(cached) = self.cache.get(&ip).await {
            debug!("cache hit: ip={}", ip);
            return cached;
        }

        debug!("cache miss, remote lookup: ip={}", ip);
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("enrichment semaphore closed");

        let result = self.fetch_with_retry(&ip).await;
        if !result.is_unknown() {
            self.cache.insert(ip, result.clone()).await;
        }
        result
    }

    /// Bounded retry: `max_retries + 1` attempts total. A rate-limit
    /// response aborts immediately; transient failures back off for
    /// 100ms × attempt before the next try.
    async fn fetch_with_retry(&self, ip: &str) -> IpInfo {
        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            match self.client.fetch(ip).await {
                Ok(info) => return info,
                Err(err) if err.is_rate_limited() => {
                    warn!("ipinfo rate limited: ip={}", ip);
                    return IpInfo::unknown(ip);
                }
                Err(err) => {
                    if attempt >= attempts {
                        error!(
                            "ipinfo lookup failed after {} attempts: ip={}, error={}",
                            attempt, ip, err
                        );
                        return IpInfo::unknown(ip);
                    }
                    warn!(
                        "ipinfo lookup failed, retry {}/{}: ip={}, error={}",
                        attempt, self.max_retries, ip, err
                    );
                    sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
            }
        }
        IpInfo::unknown(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpInfoConfig;
    use crate::ipinfo::FetchError;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn sample(ip: &str) -> IpInfo {
        IpInfo {
            ip: ip.to_string(),
            asn: "AS15169".to_string(),
            as_name: "Google LLC".to_string(),
            as_domain: "google.com".to_string(),
            country_code: "US".to_string(),
            country: "United States".to_string(),
            continent_code: "NA".to_string(),
            continent: "North America".to_string(),
        }
    }

    /// Client that replays a per-address response script, then succeeds.
    struct ScriptedClient {
        calls: AtomicU32,
        scripts: Mutex<HashMap<String, VecDeque<Result<IpInfo, FetchError>>>>,
    }

    impl ScriptedClient {
        fn always_ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                scripts: Mutex::new(HashMap::new()),
            })
        }

        fn scripted(ip: &str, script: Vec<Result<IpInfo, FetchError>>) -> Arc<Self> {
            let client = Self::always_ok();
            client
                .scripts
                .lock()
                .unwrap()
                .insert(ip.to_string(), script.into());
            client
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IpInfoClient for ScriptedClient {
        async fn fetch(&self, ip: &str) -> Result<IpInfo, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(ip)
                .and_then(|queue| queue.pop_front());
            match scripted {
                Some(result) => result,
                None => Ok(sample(ip)),
            }
        }
    }

    fn test_config() -> IpInfoConfig {
        IpInfoConfig {
            max_retries: 2,
            concurrency: 4,
            ..Default::default()
        }
    }

    fn service(client: Arc<ScriptedClient>) -> IpEnrichmentService {
        IpEnrichmentService::new(client, &test_config())
    }

    #[tokio::test]
    async fn test_success_is_fetched_once_and_cached() {
        let client = ScriptedClient::always_ok();
        let service = service(client.clone());

        let results = service.enrich(&["8.8.8.8".to_string()]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_name, "Google LLC");
        assert_eq!(client.calls(), 1);

        // Second call is served from the cache
        let results = service.enrich(&["8.8.8.8".to_string()]).await;
        assert!(!results[0].is_unknown());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_retries() {
        let client = ScriptedClient::scripted(
            "1.2.3.4",
            vec![
                Err(FetchError::Status(500)),
                Err(FetchError::Status(500)),
                Err(FetchError::Status(500)),
            ],
        );
        let service = service(client.clone());

        let results = service.enrich(&["1.2.3.4".to_string()]).await;
        assert!(results[0].is_unknown());
        // max_retries=2 → exactly 3 attempts
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_sentinel_is_never_cached() {
        let client = ScriptedClient::scripted(
            "1.2.3.4",
            vec![
                Err(FetchError::Status(500)),
                Err(FetchError::Status(500)),
                Err(FetchError::Status(500)),
            ],
        );
        let service = service(client.clone());

        let first = service.enrich(&["1.2.3.4".to_string()]).await;
        assert!(first[0].is_unknown());
        assert_eq!(client.calls(), 3);

        // Script exhausted, so this fetch succeeds — proving the sentinel
        // did not stick in the cache
        let second = service.enrich(&["1.2.3.4".to_string()]).await;
        assert!(!second[0].is_unknown());
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits_without_retry() {
        let client = ScriptedClient::scripted("1.2.3.4", vec![Err(FetchError::RateLimited)]);
        let service = service(client.clone());

        let results = service.enrich(&["1.2.3.4".to_string()]).await;
        assert!(results[0].is_unknown());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_is_cached() {
        let client = ScriptedClient::scripted("8.8.8.8", vec![Err(FetchError::Status(500))]);
        let service = service(client.clone());

        let results = service.enrich(&["8.8.8.8".to_string()]).await;
        assert!(!results[0].is_unknown());
        assert_eq!(client.calls(), 2);

        let again = service.enrich(&["8.8.8.8".to_string()]).await;
        assert!(!again[0].is_unknown());
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let client = ScriptedClient::always_ok();
        let service = service(client.clone());

        let ips: Vec<String> = ["9.9.9.9", "1.1.1.1", "8.8.8.8"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let results = service.enrich(&ips).await;

        let returned: Vec<&str> = results.iter().map(|r| r.ip.as_str()).collect();
        assert_eq!(returned, vec!["9.9.9.9", "1.1.1.1", "8.8.8.8"]);
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_output() {
        let client = ScriptedClient::always_ok();
        let service = service(client.clone());
        assert!(service.enrich(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_outcomes_map_per_key() {
        let client = ScriptedClient::scripted("4.4.4.4", vec![Err(FetchError::RateLimited)]);
        let service = service(client.clone());

        let ips: Vec<String> = ["9.9.9.9", "4.4.4.4"].iter().map(|s| s.to_string()).collect();
        let results = service.enrich(&ips).await;

        assert!(!results[0].is_unknown());
        assert_eq!(results[0].ip, "9.9.9.9");
        assert!(results[1].is_unknown());
        assert_eq!(results[1].ip, "4.4.4.4");
        assert_eq!(client.calls(), 2);
    }
}
