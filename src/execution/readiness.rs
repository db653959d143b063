//! Readiness polling for services started inside containers.
//!
//! A service counts as up as soon as `GET http://localhost:<port>/` returns a
//! 2xx or a 404. Only HTTP-level reachability matters here, not application
//! routing. Connection failures and other statuses mean "not yet".
//!
//! The loop checks its deadline before every attempt and never fails before
//! the full timeout has elapsed. The polling interval is fixed.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ReadinessError;

/// Polls a local port until it answers over HTTP.
#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    port: u16,
    timeout: Duration,
    interval: Duration,
    host: String,
}

impl ReadinessCheck {
    /// Creates a readiness check for `localhost:<port>`.
    pub fn new(port: u16, timeout: Duration, interval: Duration) -> Self {
        Self {
            port,
            timeout,
            interval,
            host: "localhost".to_string(),
        }
    }

    /// Overrides the host to poll.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// URL requested on each attempt.
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    /// Polls until ready or the deadline passes.
    pub async fn wait(&self) -> Result<(), ReadinessError> {
        self.wait_with_cancel(&CancellationToken::new()).await
    }

    /// Polls until ready, the deadline passes, or `cancel` fires.
    pub async fn wait_with_cancel(&self, cancel: &CancellationToken) -> Result<(), ReadinessError> {
        let client = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ReadinessError::Client(e.to_string()))?;

        let url = self.url();
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ReadinessError::Cancelled { port: self.port });
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(port = self.port, attempts = attempt, "Readiness deadline reached");
                return Err(self.timeout_error());
            }

            attempt += 1;
            let remaining = deadline - now;
            let outcome = tokio::time::timeout(remaining, client.get(&url).send()).await;
            match outcome {
                Ok(Ok(response)) if is_ready_status(response.status()) => {
                    debug!(
                        port = self.port,
                        attempts = attempt,
                        status = response.status().as_u16(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Service is ready"
                    );
                    return Ok(());
                }
                Ok(Ok(response)) => {
                    trace!(port = self.port, status = response.status().as_u16(), "Service not ready");
                }
                Ok(Err(e)) => {
                    trace!(port = self.port, error = %e, "Service unreachable");
                }
                Err(_) => {
                    trace!(port = self.port, "Readiness request timed out");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ReadinessError::Cancelled { port: self.port });
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    fn timeout_error(&self) -> ReadinessError {
        ReadinessError::Timeout {
            port: self.port,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

fn is_ready_status(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_FOUND
}

/// Waits for `localhost:<port>` to answer over HTTP.
pub async fn wait_for_ready(
    port: u16,
    timeout: Duration,
    interval: Duration,
) -> Result<(), ReadinessError> {
    ReadinessCheck::new(port, timeout, interval).wait().await
}

/// Like [`wait_for_ready`], but stops early when `cancel` fires.
pub async fn wait_for_ready_with_cancel(
    port: u16,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), ReadinessError> {
    ReadinessCheck::new(port, timeout, interval)
        .wait_with_cancel(cancel)
        .await
}
