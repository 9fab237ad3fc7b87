//! Fan-in entry point of the gateway.
//!
//! Each request's fingerprint selects a primary worker on the hash ring.
//! The attempt goes through that worker's circuit breaker; if the breaker
//! refuses or the transport fails, the remaining workers are tried in ring
//! order, each through its own breaker. The router itself is stateless
//! across requests.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    config::RouterConfig,
    core::{CircuitBreaker, CircuitBreakerConfig, HashRing, RouterError},
    protocols::{BreakerStats, InferenceRequest, InferenceResponse, RouterStats},
    routers::InferTransport,
};

pub struct Router {
    ring: RwLock<HashRing>,
    // BTreeMap so `/stats` lists workers in a stable order.
    breakers: BTreeMap<String, CircuitBreaker>,
    transport: Arc<dyn InferTransport>,
}

impl Router {
    pub fn new(config: &RouterConfig, transport: Arc<dyn InferTransport>) -> Self {
        let mut ring = HashRing::new(config.virtual_nodes);
        let mut breakers = BTreeMap::new();
        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            cooldown: config.cooldown,
        };

        for url in &config.worker_urls {
            ring.add_node(url);
            breakers.insert(url.clone(), CircuitBreaker::new(breaker_config.clone()));
            info!(worker = %url, "registered worker");
        }

        Self {
            ring: RwLock::new(ring),
            breakers,
            transport,
        }
    }

    /// Route one request: primary by fingerprint, then ring-order failover.
    pub async fn route(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, RouterError> {
        let primary = {
            let ring = self.ring.read();
            ring.get_node(&request.request_id)
                .map(str::to_string)
                .ok_or(RouterError::NoWorkers)?
        };

        if let Some(response) = self.try_node(&primary, request).await {
            return Ok(response);
        }

        let all_nodes = self.ring.read().all_nodes();
        for node in all_nodes.iter().filter(|node| **node != primary) {
            if let Some(response) = self.try_node(node, request).await {
                return Ok(response);
            }
        }

        warn!(request_id = %request.request_id, "no worker could serve the request");
        Err(RouterError::AllWorkersUnavailable)
    }

    /// One attempt against one worker, gated by its breaker. `None` means
    /// the caller should fail over; the breaker has already been updated.
    async fn try_node(
        &self,
        node: &str,
        request: &InferenceRequest,
    ) -> Option<InferenceResponse> {
        let breaker = self.breakers.get(node)?;
        if !breaker.allow_request() {
            debug!(worker = %node, "circuit open, skipping worker");
            return None;
        }

        match self.transport.infer(node, request).await {
            Ok(response) => {
                breaker.record_success();
                Some(response)
            }
            Err(err) => {
                warn!(worker = %node, error = %err, "worker attempt failed");
                breaker.record_failure();
                None
            }
        }
    }

    pub fn stats(&self) -> RouterStats {
        let circuit_breakers = self
            .breakers
            .iter()
            .map(|(node, breaker)| {
                let snapshot = breaker.snapshot();
                BreakerStats {
                    node: node.clone(),
                    state: snapshot.state,
                    failures: snapshot.failure_count,
                    successes: snapshot.success_count,
                }
            })
            .collect();

        RouterStats {
            total_workers: self.ring.read().all_nodes().len(),
            circuit_breakers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::core::{CircuitState, TransportError};

    /// In-memory transport: echoes from healthy endpoints, fails the rest.
    /// Counts attempts per endpoint.
    struct FakeTransport {
        failing: Mutex<HashSet<String>>,
        attempts: Mutex<std::collections::HashMap<String, usize>>,
        total_attempts: AtomicUsize,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                failing: Mutex::new(HashSet::new()),
                attempts: Mutex::new(std::collections::HashMap::new()),
                total_attempts: AtomicUsize::new(0),
            }
        }

        fn fail(&self, endpoint: &str) {
            self.failing.lock().insert(endpoint.to_string());
        }

        fn recover(&self, endpoint: &str) {
            self.failing.lock().remove(endpoint);
        }

        fn attempts_for(&self, endpoint: &str) -> usize {
            self.attempts.lock().get(endpoint).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl InferTransport for FakeTransport {
        async fn infer(
            &self,
            endpoint: &str,
            request: &InferenceRequest,
        ) -> Result<InferenceResponse, TransportError> {
            self.total_attempts.fetch_add(1, Ordering::Relaxed);
            *self
                .attempts
                .lock()
                .entry(endpoint.to_string())
                .or_insert(0) += 1;

            if self.failing.lock().contains(endpoint) {
                return Err(TransportError::Status {
                    url: format!("{}/infer", endpoint),
                    status: 500,
                });
            }
            Ok(InferenceResponse {
                request_id: request.request_id.clone(),
                output_data: request.input_data.clone(),
                node_id: endpoint.to_string(),
                cached: false,
                inference_time_us: 1,
            })
        }
    }

    const WORKERS: [&str; 3] = [
        "http://w1:8001",
        "http://w2:8001",
        "http://w3:8001",
    ];

    fn test_config(workers: &[&str]) -> RouterConfig {
        RouterConfig {
            worker_urls: workers.iter().map(|w| w.to_string()).collect(),
            failure_threshold: 3,
            // Long enough that an open breaker stays open for the test.
            cooldown: Duration::from_secs(60),
            ..Default::default()
        }
    }

    fn request(id: &str) -> InferenceRequest {
        InferenceRequest {
            request_id: id.to_string(),
            input_data: vec![1.0, 2.0],
        }
    }

    /// The worker the ring alone would pick for `request_id`.
    fn expected_primary(config: &RouterConfig, request_id: &str) -> String {
        let mut ring = HashRing::new(config.virtual_nodes);
        for url in &config.worker_urls {
            ring.add_node(url);
        }
        ring.get_node(request_id).unwrap().to_string()
    }

    /// A request id whose primary is `target` under `config`'s ring.
    fn id_mapping_to(config: &RouterConfig, target: &str) -> String {
        (0..10_000)
            .map(|i| format!("req-{}", i))
            .find(|id| expected_primary(config, id) == target)
            .expect("no request id maps to the target worker")
    }

    #[tokio::test]
    async fn test_routes_to_primary() {
        let config = test_config(&WORKERS);
        let transport = Arc::new(FakeTransport::new());
        let router = Router::new(&config, transport.clone());

        let response = router.route(&request("session-1")).await.unwrap();
        assert_eq!(response.node_id, expected_primary(&config, "session-1"));
        assert_eq!(transport.total_attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_same_fingerprint_same_primary() {
        let config = test_config(&WORKERS);
        let router = Router::new(&config, Arc::new(FakeTransport::new()));

        let first = router.route(&request("sticky")).await.unwrap();
        for _ in 0..10 {
            let next = router.route(&request("sticky")).await.unwrap();
            assert_eq!(next.node_id, first.node_id);
        }
    }

    #[tokio::test]
    async fn test_failover_skips_failing_primary() {
        let config = test_config(&WORKERS);
        let transport = Arc::new(FakeTransport::new());
        let router = Router::new(&config, transport.clone());

        let primary = expected_primary(&config, "session-1");
        transport.fail(&primary);

        let response = router.route(&request("session-1")).await.unwrap();
        assert_ne!(response.node_id, primary);
        // Exactly one failed attempt on the primary before failing over.
        assert_eq!(transport.attempts_for(&primary), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_skips_worker() {
        let config = test_config(&WORKERS);
        let transport = Arc::new(FakeTransport::new());
        let router = Router::new(&config, transport.clone());

        let target = WORKERS[0].to_string();
        transport.fail(&target);

        // Three distinct fingerprints that all map to the same worker; each
        // failure lands on its breaker (failure_threshold = 3).
        let mut used = HashSet::new();
        let mut sent = 0;
        for i in 0.. {
            let id = format!("req-{}", i);
            if expected_primary(&config, &id) == target && used.insert(id.clone()) {
                router.route(&request(&id)).await.unwrap();
                sent += 1;
                if sent == 3 {
                    break;
                }
            }
        }
        assert_eq!(transport.attempts_for(&target), 3);

        let stats = router.stats();
        let entry = stats
            .circuit_breakers
            .iter()
            .find(|b| b.node == target)
            .unwrap();
        assert_eq!(entry.state, CircuitState::Open);
        assert_eq!(entry.failures, 3);

        // With the breaker open the worker is not even attempted.
        let id = id_mapping_to(&config, &target);
        router.route(&request(&id)).await.unwrap();
        assert_eq!(transport.attempts_for(&target), 3);
    }

    #[tokio::test]
    async fn test_probe_after_cooldown_recovers_worker() {
        let config = RouterConfig {
            failure_threshold: 1,
            success_threshold: 2,
            cooldown: Duration::from_millis(30),
            ..test_config(&WORKERS)
        };
        let transport = Arc::new(FakeTransport::new());
        let router = Router::new(&config, transport.clone());

        let target = WORKERS[1].to_string();
        let id = id_mapping_to(&config, &target);

        transport.fail(&target);
        router.route(&request(&id)).await.unwrap();
        assert_eq!(
            router
                .stats()
                .circuit_breakers
                .iter()
                .find(|b| b.node == target)
                .unwrap()
                .state,
            CircuitState::Open
        );

        transport.recover(&target);
        tokio::time::sleep(Duration::from_millis(60)).await;

        // First probe is admitted and succeeds (success 1 of 2)...
        let probe = router.route(&request(&id)).await.unwrap();
        assert_eq!(probe.node_id, target);
        // ...and the second success closes the breaker.
        router.route(&request(&id)).await.unwrap();
        assert_eq!(
            router
                .stats()
                .circuit_breakers
                .iter()
                .find(|b| b.node == target)
                .unwrap()
                .state,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_empty_ring_reports_no_workers() {
        let config = test_config(&[]);
        let router = Router::new(&config, Arc::new(FakeTransport::new()));

        let err = router.route(&request("anything")).await.unwrap_err();
        assert!(matches!(err, RouterError::NoWorkers));
        assert_eq!(err.to_string(), "No workers available");
    }

    #[tokio::test]
    async fn test_all_workers_failing() {
        let config = test_config(&WORKERS);
        let transport = Arc::new(FakeTransport::new());
        let router = Router::new(&config, transport.clone());
        for worker in WORKERS {
            transport.fail(worker);
        }

        let err = router.route(&request("doomed")).await.unwrap_err();
        assert!(matches!(err, RouterError::AllWorkersUnavailable));
        // Every worker got exactly one attempt.
        assert_eq!(transport.total_attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_single_worker_failure_is_total() {
        let config = test_config(&WORKERS[..1]);
        let transport = Arc::new(FakeTransport::new());
        let router = Router::new(&config, transport.clone());
        transport.fail(WORKERS[0]);

        let err = router.route(&request("only")).await.unwrap_err();
        assert!(matches!(err, RouterError::AllWorkersUnavailable));
    }

    #[tokio::test]
    async fn test_stats_lists_every_worker() {
        let config = test_config(&WORKERS);
        let router = Router::new(&config, Arc::new(FakeTransport::new()));

        let stats = router.stats();
        assert_eq!(stats.total_workers, 3);
        assert_eq!(stats.circuit_breakers.len(), 3);
        for entry in &stats.circuit_breakers {
            assert_eq!(entry.state, CircuitState::Closed);
            assert_eq!(entry.failures, 0);
            assert_eq!(entry.successes, 0);
        }
    }
}
