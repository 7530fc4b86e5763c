//! # Endpoint Configuration
//!
//! A fluent builder for everything an endpoint needs before it owns a
//! connection. The same config is the template a `Server` stamps out for
//! every accepted connection.

use std::sync::Arc;
use std::time::Duration;

use varpack::decoder::DEFAULT_MAX_LEN;
use varrpc::ServiceKey;

use crate::service::Service;

pub const DEFAULT_PARALLEL_WORKERS: usize = 3;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct EndpointConfig {
    pub(crate) name: String,
    pub(crate) parallel_workers: usize,
    pub(crate) parallel_client_calls: Option<usize>,
    pub(crate) services: Vec<Arc<dyn Service>>,
    pub(crate) max_len: usize,
    pub(crate) close_timeout: Duration,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Inbound calls that may execute at once. At least one.
    pub fn parallel_workers(mut self, n: usize) -> Self {
        self.parallel_workers = n.max(1);
        self
    }

    /// Outbound calls that may be outstanding at once. At least one.
    ///
    /// Defaults to one more than `parallel_workers`.
    pub fn parallel_client_calls(mut self, n: usize) -> Self {
        self.parallel_client_calls = Some(n.max(1));
        self
    }

    /// Registers a service on every endpoint built from this config.
    pub fn service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    /// Ceiling for any declared length in an inbound payload.
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// How long closing waits to tell the counterpart before giving up.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_parallel_workers(&self) -> usize {
        self.parallel_workers
    }

    pub fn get_parallel_client_calls(&self) -> usize {
        self.parallel_client_calls.unwrap_or(self.parallel_workers + 1)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "endpoint".to_string(),
            parallel_workers: DEFAULT_PARALLEL_WORKERS,
            parallel_client_calls: None,
            services: Vec::new(),
            max_len: DEFAULT_MAX_LEN,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services: Vec<String> = self
            .services
            .iter()
            .map(|s| ServiceKey::from_id(s.id()).to_string())
            .collect();
        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .field("parallel_workers", &self.parallel_workers)
            .field("parallel_client_calls", &self.get_parallel_client_calls())
            .field("services", &services)
            .field("max_len", &self.max_len)
            .field("close_timeout", &self.close_timeout)
            .finish()
    }
}
