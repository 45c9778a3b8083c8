//! Readiness probing - polling the spawned server until it answers

use std::time::Duration;
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Fixed delay between readiness attempts
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Polls a URL at a fixed interval until it answers with 2xx/3xx
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: reqwest::Client,
    interval: Duration,
}

impl ReadinessProbe {
    pub fn new() -> E2eResult<Self> {
        // Redirects count as ready; following them could hit routes that are not up yet
        let client = reqwest::Client::builder().redirect(Policy::none()).build()?;
        Ok(Self {
            client,
            interval: POLL_INTERVAL,
        })
    }

    /// Override the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wait for `url` to answer with a status in [200, 400)
    ///
    /// Connection failures and 4xx/5xx answers are treated as "not yet
    /// ready". Fails with [`E2eError::ReadinessTimeout`] once `limit` has
    /// elapsed; an in-flight request is abandoned at the deadline.
    pub async fn wait_until_ready(&self, url: &str, limit: Duration) -> E2eResult<()> {
        let parsed = Url::parse(url).map_err(|e| E2eError::Config(format!("invalid readiness url {}: {}", url, e)))?;
        let start = Instant::now();
        let deadline = start + limit;
        let mut attempts: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            attempts += 1;

            match timeout(remaining, self.client.get(parsed.clone()).send()).await {
                Ok(Ok(resp)) if is_ready(resp.status()) => {
                    debug!("{} ready after {} attempt(s)", url, attempts);
                    return Ok(());
                }
                Ok(Ok(resp)) => {
                    debug!("Readiness check returned {}", resp.status());
                }
                Ok(Err(e)) if e.is_builder() => return Err(e.into()),
                Ok(Err(e)) => {
                    if attempts == 1 {
                        info!("Waiting for server to start...");
                    }
                    // Refused / unreachable / timed out is expected while the server boots
                    if !(e.is_connect() || e.is_timeout()) {
                        warn!("Readiness check error: {}", e);
                    }
                }
                Err(_) => break,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep(self.interval.min(remaining)).await;
        }

        Err(E2eError::ReadinessTimeout {
            host: parsed.host_str().unwrap_or_default().to_string(),
            port: parsed.port_or_known_default().unwrap_or_default(),
            elapsed: start.elapsed(),
        })
    }
}

/// Wait for `url` with a default probe
pub async fn wait_until_ready(url: &str, limit: Duration) -> E2eResult<()> {
    ReadinessProbe::new()?.wait_until_ready(url, limit).await
}

fn is_ready(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}
