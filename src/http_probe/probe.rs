use std::sync::Arc;
use std::time::Duration;

use http_body_util::Empty;
use hyper::header::USER_AGENT;
use hyper::{Request, Uri};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::prelude::*;
use super::report;
use crate::clock::Clock;
use crate::config::ConfigError;
use crate::transport::{PhaseTrace, TransportError, TransportPool};

const PROBE_USER_AGENT: &str = concat!("cadence-probe/", env!("CARGO_PKG_VERSION"));

/// One timed GET against a fixed endpoint through the shared pool.
#[derive(Clone)]
pub struct RequestProbe {
    pool: TransportPool,
    uri: Uri,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RequestProbe {
    pub fn new(
        pool: TransportPool,
        endpoint: &Url,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let mut endpoint = endpoint.clone();
        endpoint.set_fragment(None);
        let uri = endpoint
            .as_str()
            .parse()
            .map_err(|source| ConfigError::InvalidRequestUri {
                url: endpoint.to_string(),
                source,
            })?;

        Ok(RequestProbe {
            pool,
            uri,
            timeout,
            clock,
        })
    }

    /// Issue the request and return its timing. Never fails: every problem is
    /// folded into the record's outcome.
    ///
    /// The exchange is cut short when `parent` is cancelled or the per-request
    /// deadline elapses, whichever comes first.
    pub async fn run(&self, parent: &CancellationToken) -> TimingRecord {
        let token = parent.child_token();
        let deadline = Instant::now() + self.timeout;
        let start_time = self.clock.now();
        let trace = PhaseTrace::new();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = timeout_at(deadline, self.exchange(&trace)) => r.ok(),
        };

        let (outcome, http_status, last_byte) = match result {
            Some(Ok((status, last_byte))) => (Outcome::Success, Some(status), Some(last_byte)),
            Some(Err(err)) => {
                match &err {
                    TransportError::Body(_) => log::warn!(
                        "failed to read response body from {}: {}",
                        self.uri,
                        report(&err)
                    ),
                    _ => log::debug!("request to {} failed: {}", self.uri, report(&err)),
                }
                (self.classify(&token, deadline), None, None)
            }
            None => (self.classify(&token, deadline), None, None),
        };

        let record = TimingRecord::new(start_time, trace.phases(), last_byte, http_status, outcome);
        log::info!("{record}");
        record
    }

    fn classify(&self, token: &CancellationToken, deadline: Instant) -> Outcome {
        Outcome::from_failure(token.is_cancelled(), Instant::now() >= deadline)
    }

    async fn exchange(&self, trace: &Arc<PhaseTrace>) -> Result<(u16, Duration), TransportError> {
        let request = Request::get(self.uri.clone())
            .header(USER_AGENT, PROBE_USER_AGENT)
            .body(Empty::new())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let exchange = self.pool.execute(request, trace).await?;
        let status = exchange.status().as_u16();

        // the connection is only reusable once the body is consumed
        exchange.drain().await?;
        Ok((status, trace.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use hyper::StatusCode;

    use super::*;
    use crate::clock::FixedClock;
    use crate::testing::{refused_addr, spawn_http_server, spawn_silent_server, test_pool};
    use crate::transport::PoolConfig;

    fn probe_for(url: &str, timeout: Duration) -> RequestProbe {
        let instant = DateTime::from_timestamp(1136239445, 0).expect("valid timestamp");
        RequestProbe::new(
            test_pool(PoolConfig::default()),
            &Url::parse(url).expect("url"),
            timeout,
            Arc::new(FixedClock(instant)),
        )
        .expect("probe")
    }

    #[tokio::test]
    async fn test_reachable_endpoint_is_success() {
        let server = spawn_http_server(StatusCode::OK).await;
        let probe = probe_for(&server.url("/probe"), Duration::from_secs(1));

        let record = probe.run(&CancellationToken::new()).await;
        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(record.http_status, Some(200));
        assert!(record.last_byte > record.first_byte);
        assert!(record.first_byte >= record.request_written);
        assert!(record.occurred.first_byte.is_some());
        assert_eq!(record.start_time.timestamp(), 1136239445);
    }

    #[tokio::test]
    async fn test_error_status_is_still_success() {
        let server = spawn_http_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let probe = probe_for(&server.url("/probe"), Duration::from_secs(1));

        let record = probe.run(&CancellationToken::new()).await;
        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(record.http_status, Some(500));
    }

    #[tokio::test]
    async fn test_ip_literal_endpoint_skips_dns() {
        let server = spawn_http_server(StatusCode::OK).await;
        let probe = probe_for(&server.url("/"), Duration::from_secs(1));

        let record = probe.run(&CancellationToken::new()).await;
        assert!(record.occurred.dns_start.is_none());
        assert!(record.occurred.dns_done.is_none());
        assert_eq!(record.dns_done, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_silent_endpoint_exceeds_deadline() {
        let addr = spawn_silent_server().await;
        let probe = probe_for(&format!("http://{addr}/probe"), Duration::from_millis(200));

        let started = std::time::Instant::now();
        let record = probe.run(&CancellationToken::new()).await;
        assert_eq!(record.outcome, Outcome::DeadlineExceeded);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(record.occurred.request_written.is_some());
        assert!(record.occurred.first_byte.is_none());
        assert!(record.http_status.is_none());
    }

    #[tokio::test]
    async fn test_cancel_mid_flight() {
        let addr = spawn_silent_server().await;
        let probe = probe_for(&format!("http://{addr}/probe"), Duration::from_secs(5));
        let parent = CancellationToken::new();

        let canceller = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let record = probe.run(&parent).await;
        assert_eq!(record.outcome, Outcome::Canceled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_refused_connection_is_failed_only() {
        let addr = refused_addr().await;
        let probe = probe_for(&format!("http://{addr}/probe"), Duration::from_secs(1));

        let record = probe.run(&CancellationToken::new()).await;
        assert_eq!(record.outcome, Outcome::Failed);
        assert!(record.to_string().ends_with("C: false, D: false, F: true"));
    }

    #[tokio::test]
    async fn test_probe_reuses_pooled_connection() {
        let server = spawn_http_server(StatusCode::OK).await;
        let probe = probe_for(&server.url("/"), Duration::from_secs(1));
        let token = CancellationToken::new();

        for _ in 0..3 {
            assert_eq!(probe.run(&token).await.outcome, Outcome::Success);
        }
        assert_eq!(server.accepted(), 1);
        assert_eq!(server.requests(), 3);
    }
}
