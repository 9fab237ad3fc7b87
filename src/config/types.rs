//! Configuration types. Populated from the CLI at process start, validated
//! once, then read-only.

use std::{path::PathBuf, time::Duration};

use crate::core::hash_ring::DEFAULT_VIRTUAL_NODES;

use super::{ConfigError, ConfigResult};

/// Router process configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub host: String,
    pub port: u16,
    /// Worker endpoints; also the worker identities on the hash ring.
    pub worker_urls: Vec<String>,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
    pub virtual_nodes: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            worker_urls: Vec::new(),
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}

impl RouterConfig {
    /// Normalise worker endpoints (default scheme `http://`) and reject
    /// anything unparseable. An empty worker list is allowed: the router
    /// boots with an empty ring and answers "No workers available".
    pub fn validate(&mut self) -> ConfigResult<()> {
        ensure_nonzero("failure_threshold", self.failure_threshold as usize)?;
        ensure_nonzero("success_threshold", self.success_threshold as usize)?;
        ensure_nonzero("virtual_nodes", self.virtual_nodes)?;

        for url in &mut self.worker_urls {
            if !url.contains("://") {
                *url = format!("http://{}", url);
            }
            let parsed = reqwest::Url::parse(url).map_err(|err| ConfigError::InvalidValue {
                field: "worker_urls".to_string(),
                value: url.clone(),
                reason: err.to_string(),
            })?;
            if parsed.host_str().is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "worker_urls".to_string(),
                    value: url.clone(),
                    reason: "endpoint has no host".to_string(),
                });
            }
            // Workers are addressed as `<endpoint>/infer`; a trailing slash
            // would double up.
            while url.ends_with('/') {
                url.pop();
            }
        }
        Ok(())
    }
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub host: String,
    pub port: u16,
    pub node_id: String,
    pub model_path: PathBuf,
    pub cache_capacity: usize,
    pub max_batch_size: usize,
    pub batch_timeout: Duration,
}

impl WorkerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.node_id.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "node_id".to_string(),
            });
        }
        ensure_nonzero("cache_capacity", self.cache_capacity)?;
        ensure_nonzero("max_batch_size", self.max_batch_size)?;
        if !self.model_path.is_file() {
            return Err(ConfigError::InvalidValue {
                field: "model_path".to_string(),
                value: self.model_path.display().to_string(),
                reason: "model file does not exist".to_string(),
            });
        }
        Ok(())
    }
}

fn ensure_nonzero(field: &str, value: usize) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
