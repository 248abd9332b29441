//! Lock client for init containers
//!
//! Polls a podlock gate until a lease is granted, so the pod's main
//! containers start only once admitted.

use reqwest::StatusCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_IDLE_CONNECTIONS: usize = 1;

/// HTTP client for one gate
#[derive(Debug, Clone)]
pub struct LockClient {
    http: reqwest::Client,
    url: String,
}

impl LockClient {
    /// `duration` is the lease length to ask for; `None` takes the gate's default
    pub fn new(
        host: &str,
        port: u16,
        duration: Option<Duration>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .build()?;
        let url = lock_url(host, port, duration);
        info!(url = %url, "Configured lock client");
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One attempt; `Ok(true)` if the gate granted a lease
    pub async fn acquire(&self) -> Result<bool, reqwest::Error> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        let _ = response.bytes().await;
        Ok(status == StatusCode::OK)
    }

    /// Retry every `period` until granted; `false` if `shutdown` fired first
    pub async fn wait_for_lease(&self, period: Duration, shutdown: &CancellationToken) -> bool {
        loop {
            let attempt = tokio::select! {
                attempt = self.acquire() => attempt,
                _ = shutdown.cancelled() => return false,
            };
            match attempt {
                Ok(true) => {
                    info!("Lock acquired");
                    return true;
                }
                Ok(false) => info!(retry_secs = period.as_secs(), "Lock not acquired, waiting"),
                Err(e) => warn!(error = %e, "Failed to request lock"),
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.cancelled() => return false,
            }
        }
    }
}

fn lock_url(host: &str, port: u16, duration: Option<Duration>) -> String {
    match duration {
        Some(duration) => format!("http://{}:{}/?duration={}", host, port, duration.as_secs()),
        None => format!("http://{}:{}/", host, port),
    }
}
