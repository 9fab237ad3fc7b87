//! Model execution contract.
//!
//! The gateway core never talks to a neural runtime directly; it depends on
//! [`ModelExecutor::batch_predict`] and on the implementor being safe to
//! call from the single batch consumer thread. [`LinearModel`] is the
//! built-in implementation the worker binary ships with; production
//! deployments implement the trait over their own runtime.

pub mod linear;

pub use linear::LinearModel;

/// Failure inside a model executor. Fanned out to every request in the
/// affected batch; the worker stays operational.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("model execution failed: {0}")]
    Backend(String),
}

/// A batch-capable model backend.
///
/// `batch_predict` must return one output per input, index-aligned. The
/// caller owns serialisation: the gateway only ever invokes it from one
/// thread at a time.
pub trait ModelExecutor: Send + Sync + 'static {
    fn batch_predict(&self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ExecutorError>;
}
