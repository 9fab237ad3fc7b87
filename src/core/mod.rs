//! Core building blocks for the gateway:
//! - Consistent-hash ring for request-to-worker affinity
//! - Circuit breaker guarding each worker
//! - Bounded LRU cache for inference results
//! - Batch processor coalescing concurrent requests
//! - Error types shared by the routing and batching paths

pub mod batch;
pub mod circuit_breaker;
pub mod error;
pub mod hash_ring;
pub mod lru_cache;

pub use batch::{BatchConfig, BatchMetricsSnapshot, BatchProcessor, BatchRunner};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{BatchError, RouterError, TransportError};
pub use hash_ring::HashRing;
pub use lru_cache::{InputKey, ResponseCache};
