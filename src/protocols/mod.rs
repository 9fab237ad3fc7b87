//! Wire types shared by the router and worker HTTP surfaces.

use serde::{Deserialize, Serialize};

/// Inference request as accepted by both the router and the workers.
///
/// `request_id` is an opaque client-supplied fingerprint; the router uses it
/// only as the consistent-hash key. `input_data` is the model input and the
/// worker-side cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub request_id: String,
    pub input_data: Vec<f32>,
}

/// Inference response returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: String,
    pub output_data: Vec<f32>,
    pub node_id: String,
    pub cached: bool,
    pub inference_time_us: u64,
}

/// Structured error body for non-2xx replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Per-worker circuit breaker entry in the router `/stats` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub node: String,
    pub state: crate::core::CircuitState,
    pub failures: u32,
    pub successes: u32,
}

/// Router `/stats` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStats {
    pub total_workers: usize,
    pub circuit_breakers: Vec<BreakerStats>,
}

/// Batch processor section of the worker `/health` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_requests: u64,
    pub total_batches: u64,
    pub avg_batch_size: f64,
    pub timeout_batches: u64,
    pub full_batches: u64,
}

/// Worker `/health` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub healthy: bool,
    pub node_id: String,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_size: usize,
    pub cache_hit_rate: f64,
    pub batch_processor: BatchStats,
}
