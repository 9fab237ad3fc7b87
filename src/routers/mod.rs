//! Request routing: consistent-hash worker selection, per-worker circuit
//! breaking, and ring-order failover over a pluggable transport.

pub mod router;
pub mod transport;

pub use router::Router;
pub use transport::{HttpTransport, InferTransport};
