//! Cluster Health Probe
//!
//! Liveness check against one cluster node's public endpoint using the
//! `/v1/sys/health` API. Standby nodes answer with their own status codes and
//! still count as healthy; sealed or uninitialized nodes do not.

use std::time::Duration;

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};

use super::{ExternalResult, HealthProbe};
use crate::models::HealthStatus;

/// Default API port of a cluster node.
pub const DEFAULT_API_PORT: u16 = 8200;

const HEALTH_PATH: &str = "/v1/sys/health";

/// HTTP implementation of [`HealthProbe`].
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    scheme: String,
    port: u16,
}

impl HttpHealthProbe {
    /// HTTPS probe on the default port. `accept_invalid_certs` must be set
    /// when the cluster serves the run's self-signed certificate.
    pub fn new(accept_invalid_certs: bool) -> ExternalResult<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(HttpHealthProbe {
            client,
            scheme: "https".to_string(),
            port: DEFAULT_API_PORT,
        })
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn health_url(&self, address: &str) -> String {
        format!("{}://{}:{}{}", self.scheme, address, self.port, HEALTH_PATH)
    }
}

/// Map a `/v1/sys/health` status code to a verdict.
///
/// 200 active, 429 standby, 472 DR secondary, 473 performance standby.
/// Everything else (501 uninitialized, 503 sealed, ...) is unhealthy.
pub fn status_from_code(code: u16) -> HealthStatus {
    match code {
        200 | 429 | 472 | 473 => HealthStatus::Healthy,
        _ => HealthStatus::Unhealthy,
    }
}

impl HealthProbe for HttpHealthProbe {
    fn check_healthy<'a>(&'a self, address: &'a str) -> BoxFuture<'a, ExternalResult<HealthStatus>> {
        async move {
            let url = self.health_url(address);
            log::info!("[Probe] GET {}", url);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .with_context(|| format!("health request to {} failed", url))?;

            let code = response.status().as_u16();
            let status = status_from_code(code);
            log::info!("[Probe] {} answered {} ({})", address, code, status.as_str());
            Ok(status)
        }
        .boxed()
    }
}
