//! Error types for the routing and batching paths.

/// Routing failures surfaced to clients of the router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The hash ring holds no workers.
    #[error("No workers available")]
    NoWorkers,

    /// Every worker either refused the request (breaker open) or failed it.
    #[error("All workers failed or circuit breakers open")]
    AllWorkersUnavailable,
}

/// A single router-to-worker attempt failure. Recovered locally by
/// failover; clients only see it indirectly through breaker counters.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("worker at {url} returned status {status}")]
    Status { url: String, status: u16 },
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network {
            url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            source: err,
        }
    }
}

/// Failures delivered to a batched request slot.
///
/// `Clone` because a single executor failure fans out to every slot in the
/// affected batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The request was pending when shutdown began, or arrived after it.
    #[error("batch processor is shutting down")]
    Shutdown,

    /// The executor returned fewer outputs than the batch had requests.
    #[error("no response for batched request")]
    MissingResponse,

    /// The batch callback failed; every slot in the batch receives this.
    #[error("batch execution failed: {0}")]
    Executor(String),
}
