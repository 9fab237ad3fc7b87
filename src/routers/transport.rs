//! Transport adapter between the router and worker nodes.
//!
//! The trait seam exists so routing logic is testable without sockets; the
//! production implementation is a thin reqwest client with bounded connect
//! and read timeouts.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    core::TransportError,
    protocols::{InferenceRequest, InferenceResponse},
};

/// Dispatch one inference request to one worker endpoint.
#[async_trait]
pub trait InferTransport: Send + Sync {
    async fn infer(
        &self,
        endpoint: &str,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, TransportError>;
}

/// HTTP transport posting to each worker's `/infer`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl InferTransport for HttpTransport {
    async fn infer(
        &self,
        endpoint: &str,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, TransportError> {
        let url = format!("{}/infer", endpoint.trim_end_matches('/'));
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.json::<InferenceResponse>().await?)
    }
}
