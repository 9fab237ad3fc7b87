//! Distributed inference gateway.
//!
//! Two roles share this crate:
//! - A **router** that maps each request to a worker via a consistent-hash
//!   ring, guards every worker with its own circuit breaker, and fails over
//!   ring-wise when a worker refuses or errors.
//! - A **worker** that deduplicates identical inputs through a bounded LRU
//!   cache and coalesces concurrent misses into dynamic batches handed to a
//!   single-threaded model executor.
//!
//! The model executor itself is an external collaborator: the crate depends
//! only on the [`inference::ModelExecutor`] contract.

pub mod config;
pub mod core;
pub mod inference;
pub mod observability;
pub mod protocols;
pub mod routers;
pub mod server;
pub mod worker;
