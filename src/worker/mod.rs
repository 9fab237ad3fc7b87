//! Worker runtime: the per-node pipeline between the transport and the
//! model executor.
//!
//! `infer` consults the response cache first; a miss goes through the batch
//! processor, which coalesces concurrent misses into one `batch_predict`
//! call, and the result is written back to the cache before replying.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use tracing::warn;

use crate::{
    config::WorkerConfig,
    core::{BatchConfig, BatchError, BatchProcessor, BatchRunner, InputKey, ResponseCache},
    inference::{ExecutorError, ModelExecutor},
    protocols::{BatchStats, InferenceRequest, InferenceResponse, WorkerHealth},
};

/// Batch callback bridging the queue to the model executor. Packs the batch
/// inputs, runs one `batch_predict`, and attributes an equal share of the
/// wall time to every request in the batch.
struct ExecutorRunner<E> {
    node_id: String,
    executor: E,
}

impl<E: ModelExecutor> BatchRunner for ExecutorRunner<E> {
    fn run_batch(
        &self,
        requests: Vec<InferenceRequest>,
    ) -> Result<Vec<InferenceResponse>, ExecutorError> {
        let batch_len = requests.len();
        let (request_ids, inputs): (Vec<String>, Vec<Vec<f32>>) = requests
            .into_iter()
            .map(|req| (req.request_id, req.input_data))
            .unzip();

        let started = Instant::now();
        let outputs = self.executor.batch_predict(&inputs)?;
        let elapsed_us = started.elapsed().as_micros() as u64;
        let per_request_us = elapsed_us / batch_len as u64;

        if outputs.len() != batch_len {
            // Surplus requests are failed by the batch processor; a longer
            // output vector is truncated here.
            warn!(
                expected = batch_len,
                got = outputs.len(),
                "executor output count does not match batch size"
            );
        }

        Ok(request_ids
            .into_iter()
            .zip(outputs)
            .map(|(request_id, output_data)| InferenceResponse {
                request_id,
                output_data,
                node_id: self.node_id.clone(),
                cached: false,
                inference_time_us: per_request_us,
            })
            .collect())
    }
}

/// One worker node: owns its cache, its batch processor, and (through the
/// batch runner) its model executor. Shared across request handlers behind
/// an `Arc`.
pub struct WorkerNode {
    node_id: String,
    cache: ResponseCache,
    batch: BatchProcessor,
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
}

impl WorkerNode {
    pub fn new<E: ModelExecutor>(config: &WorkerConfig, executor: E) -> Self {
        let runner = ExecutorRunner {
            node_id: config.node_id.clone(),
            executor,
        };
        let batch = BatchProcessor::new(
            BatchConfig {
                max_batch_size: config.max_batch_size,
                timeout: config.batch_timeout,
            },
            runner,
        );
        Self {
            node_id: config.node_id.clone(),
            cache: ResponseCache::new(config.cache_capacity),
            batch,
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Serve one request: cache hit replies immediately, a miss is batched
    /// and the result cached for the next identical input.
    pub async fn infer(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, BatchError> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let key = InputKey::new(request.input_data.clone());
        if let Some(output_data) = self.cache.get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(InferenceResponse {
                request_id: request.request_id,
                output_data,
                node_id: self.node_id.clone(),
                cached: true,
                inference_time_us: 0,
            });
        }

        let response = self.batch.process(request).await?;
        self.cache.put(key, response.output_data.clone());
        Ok(response)
    }

    /// Cheap observable snapshot; never blocks on the batch queue.
    pub fn health(&self) -> WorkerHealth {
        let batch = self.batch.metrics();
        WorkerHealth {
            healthy: true,
            node_id: self.node_id.clone(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_size: self.cache.len(),
            cache_hit_rate: self.cache.hit_rate(),
            batch_processor: BatchStats {
                total_requests: batch.total_requests,
                total_batches: batch.total_batches,
                avg_batch_size: batch.avg_batch_size,
                timeout_batches: batch.timeout_batches,
                full_batches: batch.full_batches,
            },
        }
    }

    /// Stop the batch consumer, failing still-queued requests with a
    /// shutdown error.
    pub fn shutdown(&self) {
        self.batch.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::atomic::{AtomicBool, AtomicUsize},
        time::Duration,
    };

    use super::*;

    fn test_config(node_id: &str) -> WorkerConfig {
        WorkerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            node_id: node_id.to_string(),
            model_path: PathBuf::from("unused"),
            cache_capacity: 16,
            max_batch_size: 4,
            batch_timeout: Duration::from_millis(5),
        }
    }

    fn request(id: &str, input: Vec<f32>) -> InferenceRequest {
        InferenceRequest {
            request_id: id.to_string(),
            input_data: input,
        }
    }

    /// Doubles every element; counts batch_predict invocations.
    struct DoubleExecutor {
        calls: AtomicUsize,
    }

    impl DoubleExecutor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ModelExecutor for DoubleExecutor {
        fn batch_predict(&self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ExecutorError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(inputs
                .iter()
                .map(|input| input.iter().map(|x| x * 2.0).collect())
                .collect())
        }
    }

    /// Fails its first batch, then recovers.
    struct FlakyExecutor {
        failed_once: AtomicBool,
    }

    impl ModelExecutor for FlakyExecutor {
        fn batch_predict(&self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ExecutorError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(ExecutorError::Backend("transient failure".to_string()));
            }
            Ok(inputs.to_vec())
        }
    }

    /// Always returns one output too few.
    struct ShortExecutor;

    impl ModelExecutor for ShortExecutor {
        fn batch_predict(&self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ExecutorError> {
            Ok(inputs.iter().skip(1).cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let node = WorkerNode::new(&test_config("w1"), DoubleExecutor::new());

        let first = node.infer(request("r1", vec![1.0, 2.0])).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.output_data, vec![2.0, 4.0]);
        assert_eq!(first.node_id, "w1");

        let second = node.infer(request("r2", vec![1.0, 2.0])).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.output_data, vec![2.0, 4.0]);
        assert_eq!(second.inference_time_us, 0);
        assert_eq!(second.request_id, "r2");

        let health = node.health();
        assert_eq!(health.total_requests, 2);
        assert_eq!(health.cache_hits, 1);
        assert_eq!(health.cache_size, 1);
        node.shutdown();
    }

    #[tokio::test]
    async fn test_distinct_inputs_all_miss() {
        let node = WorkerNode::new(&test_config("w1"), DoubleExecutor::new());

        for i in 0..3 {
            let response = node
                .infer(request(&format!("r{}", i), vec![i as f32]))
                .await
                .unwrap();
            assert!(!response.cached);
        }

        let health = node.health();
        assert_eq!(health.total_requests, 3);
        assert_eq!(health.cache_hits, 0);
        assert_eq!(health.cache_size, 3);
        assert_eq!(health.batch_processor.total_batches, 3);
        node.shutdown();
    }

    #[tokio::test]
    async fn test_executor_failure_leaves_worker_operational() {
        let node = WorkerNode::new(
            &test_config("w1"),
            FlakyExecutor {
                failed_once: AtomicBool::new(false),
            },
        );

        let err = node.infer(request("r1", vec![1.0])).await.unwrap_err();
        assert!(matches!(err, BatchError::Executor(_)));

        // Failed responses must not be cached; the retry goes back through
        // the executor and succeeds.
        let retry = node.infer(request("r2", vec![1.0])).await.unwrap();
        assert!(!retry.cached);
        assert_eq!(retry.output_data, vec![1.0]);
        node.shutdown();
    }

    #[tokio::test]
    async fn test_short_executor_output_fails_surplus_request() {
        let node = WorkerNode::new(&test_config("w1"), ShortExecutor);

        let err = node.infer(request("r1", vec![1.0])).await.unwrap_err();
        assert_eq!(err, BatchError::MissingResponse);
        node.shutdown();
    }

    #[tokio::test]
    async fn test_health_reports_batch_metrics() {
        let node = WorkerNode::new(&test_config("w1"), DoubleExecutor::new());

        node.infer(request("r1", vec![5.0])).await.unwrap();
        let health = node.health();
        assert!(health.healthy);
        assert_eq!(health.node_id, "w1");
        assert_eq!(health.batch_processor.total_requests, 1);
        assert_eq!(health.batch_processor.total_batches, 1);
        assert!((health.batch_processor.avg_batch_size - 1.0).abs() < f64::EPSILON);
        node.shutdown();
    }

    #[tokio::test]
    async fn test_infer_after_shutdown_errors() {
        let node = WorkerNode::new(&test_config("w1"), DoubleExecutor::new());
        node.shutdown();

        let err = node.infer(request("r1", vec![1.0])).await.unwrap_err();
        assert_eq!(err, BatchError::Shutdown);
    }
}
