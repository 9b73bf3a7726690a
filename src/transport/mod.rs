//! Shared HTTP/1.1 transport.
//!
//! One [`TransportPool`] is built per process and cloned into every worker.
//! Connections are kept alive between requests, bounded by per-host and total
//! idle limits. Each parked connection is closed once it has sat idle for
//! the idle timeout; [`flush::spawn_flush`] additionally sweeps the whole idle
//! set on a fixed schedule.

pub mod connect;
pub mod error;
pub mod flush;
mod idle;
pub mod trace;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{HOST, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio_native_tls::TlsConnector as TokioTlsConnector;
use trust_dns_resolver::TokioAsyncResolver;

use crate::config::app_config::{setup_resolver, setup_tls_connector};
use crate::config::{ConfigError, TransportConfig};
use connect::Connector;
use idle::{IdleLimits, IdleSet};
pub use error::TransportError;
pub use trace::{PhaseTrace, Phases};
use trace::{TraceSlot, TracedStream};

/// Request body type sent through the pool.
pub type RequestBody = Empty<Bytes>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 0 means no limit.
    pub max_idle_total: usize,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub dial_timeout: Duration,
    pub keep_alive: Duration,
    pub tls_handshake_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        (&TransportConfig::default()).into()
    }
}

impl From<&TransportConfig> for PoolConfig {
    fn from(c: &TransportConfig) -> Self {
        PoolConfig {
            max_idle_total: c.max_idle_total,
            max_idle_per_host: c.max_idle_per_host,
            idle_timeout: Duration::from_secs(c.idle_timeout_seconds),
            dial_timeout: Duration::from_secs(c.dial_timeout_seconds),
            keep_alive: Duration::from_secs(c.keep_alive_seconds),
            tls_handshake_timeout: Duration::from_secs(c.tls_handshake_timeout_seconds),
        }
    }
}

/// Connection counters, as of the moment [`TransportPool::stats`] was called.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections dialed since the pool was created.
    pub dialed: usize,
    /// Requests served by an already pooled connection.
    pub reused: usize,
    /// Connections whose driver task is still running.
    pub open: usize,
    /// Connections parked in the idle set.
    pub idle: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl PoolKey {
    pub fn from_uri(uri: &Uri) -> Result<Self, TransportError> {
        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            _ => return Err(TransportError::UnsupportedScheme(scheme)),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or(TransportError::MissingHost)?
            .to_ascii_lowercase();

        Ok(PoolKey {
            scheme,
            host,
            port: uri.port_u16().unwrap_or(default_port),
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    /// Host without IPv6 brackets, as used for DNS and TLS SNI.
    pub fn host_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    fn host_header(&self) -> String {
        let default_port = if self.is_tls() { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

pub(crate) struct PooledConn {
    key: PoolKey,
    sender: SendRequest<RequestBody>,
    slot: TraceSlot,
}

impl PooledConn {
    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Default)]
struct Counters {
    dialed: AtomicUsize,
    reused: AtomicUsize,
    open: AtomicUsize,
    next_id: AtomicU64,
}

struct PoolInner {
    limits: IdleLimits,
    connector: Connector,
    idle: Mutex<IdleSet>,
    counters: Arc<Counters>,
}

/// Concurrency-safe HTTP/1.1 connection pool. Cheap to clone.
#[derive(Clone)]
pub struct TransportPool {
    inner: Arc<PoolInner>,
}

impl TransportPool {
    pub fn new(config: PoolConfig, resolver: TokioAsyncResolver, tls: TokioTlsConnector) -> Self {
        let connector = Connector::new(
            resolver,
            tls,
            config.dial_timeout,
            config.keep_alive,
            config.tls_handshake_timeout,
        );
        TransportPool {
            inner: Arc::new(PoolInner {
                limits: IdleLimits {
                    max_idle_total: config.max_idle_total,
                    max_idle_per_host: config.max_idle_per_host,
                    idle_timeout: config.idle_timeout,
                },
                connector,
                idle: Mutex::new(IdleSet::default()),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    /// Build a pool from the client's transport section and DNS hosts.
    pub fn from_config(
        transport: &TransportConfig,
        dns_hosts: &[String],
    ) -> Result<Self, ConfigError> {
        let resolver = setup_resolver(dns_hosts)?;
        let tls = setup_tls_connector(transport.accept_invalid_certs)?;
        Ok(Self::new(transport.into(), resolver, tls))
    }

    /// Send `request` (absolute URI) on a pooled or freshly dialed connection.
    ///
    /// Resolves once the response head has arrived. The connection goes back
    /// to the pool only when the returned [`Exchange`] is drained.
    pub async fn execute(
        &self,
        request: Request<RequestBody>,
        trace: &Arc<PhaseTrace>,
    ) -> Result<Exchange, TransportError> {
        let key = PoolKey::from_uri(request.uri())?;
        let request = into_origin_form(request, &key)?;

        let mut conn = self.acquire(&key, trace).await?;
        conn.slot.attach(trace.clone());
        let response = conn.sender.send_request(request).await?;

        Ok(Exchange {
            pool: self.clone(),
            conn,
            response,
        })
    }

    /// Close every idle connection regardless of how long it has been idle.
    /// Returns how many were closed.
    pub fn evict_idle(&self) -> usize {
        let closed = self.lock_idle().drain();
        closed.len()
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            dialed: counters.dialed.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            open: counters.open.load(Ordering::Relaxed),
            idle: self.lock_idle().len(),
        }
    }

    async fn acquire(
        &self,
        key: &PoolKey,
        trace: &PhaseTrace,
    ) -> Result<PooledConn, TransportError> {
        loop {
            let idle_timeout = self.inner.limits.idle_timeout;
            let (candidate, stale) = self.lock_idle().checkout(key, Instant::now(), idle_timeout);
            drop(stale);

            let Some(mut conn) = candidate else {
                break;
            };
            if conn.sender.ready().await.is_ok() {
                self.inner.counters.reused.fetch_add(1, Ordering::Relaxed);
                return Ok(conn);
            }
            log::debug!("discarding closed pooled connection to {}", key.host);
        }

        self.dial(key, trace).await
    }

    async fn dial(&self, key: &PoolKey, trace: &PhaseTrace) -> Result<PooledConn, TransportError> {
        let stream = self.inner.connector.connect(key, trace).await?;
        let slot = TraceSlot::default();
        let io = TokioIo::new(TracedStream::new(stream, slot.clone()));
        let (sender, connection) = http1::handshake::<_, RequestBody>(io).await?;

        let counters = self.inner.counters.clone();
        let id = counters.next_id.fetch_add(1, Ordering::Relaxed);
        counters.dialed.fetch_add(1, Ordering::Relaxed);
        counters.open.fetch_add(1, Ordering::Relaxed);
        log::debug!("connection {id} to {}:{} established", key.host, key.port);

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::debug!("connection {id} closed with error: {e}");
            }
            counters.open.fetch_sub(1, Ordering::Relaxed);
        });

        Ok(PooledConn {
            key: key.clone(),
            sender,
            slot,
        })
    }

    fn checkin(&self, conn: PooledConn) {
        conn.slot.detach();
        if conn.is_closed() {
            return;
        }
        let evicted = self.lock_idle().checkin(conn, Instant::now(), &self.inner.limits);
        drop(evicted);
        self.schedule_expiry();
    }

    /// Once the idle timeout elapses, close whatever has been idle that long,
    /// even if no further request ever touches the pool.
    fn schedule_expiry(&self) {
        let idle_timeout = self.inner.limits.idle_timeout;
        let Some(deadline) = tokio::time::Instant::now().checked_add(idle_timeout) else {
            return;
        };
        let inner: Weak<PoolInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let pool = TransportPool { inner };
            let expired = pool.lock_idle().expire(Instant::now(), idle_timeout);
            if !expired.is_empty() {
                log::debug!("closing {} connection(s) idle past {idle_timeout:?}", expired.len());
            }
        });
    }

    fn lock_idle(&self) -> MutexGuard<'_, IdleSet> {
        self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn into_origin_form(
    mut request: Request<RequestBody>,
    key: &PoolKey,
) -> Result<Request<RequestBody>, TransportError> {
    let path = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    *request.uri_mut() = path
        .parse()
        .map_err(|e| TransportError::InvalidRequest(format!("{path}: {e}")))?;

    if !request.headers().contains_key(HOST) {
        let host = HeaderValue::from_str(&key.host_header())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(HOST, host);
    }
    Ok(request)
}

/// A response head plus the connection it arrived on.
///
/// Dropping it without calling [`Exchange::drain`] closes the connection.
pub struct Exchange {
    pool: TransportPool,
    conn: PooledConn,
    response: Response<Incoming>,
}

impl Exchange {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Read the body to the end, discarding it, and hand the connection back to the pool.
    /// Returns the number of body bytes read.
    pub async fn drain(self) -> Result<u64, TransportError> {
        let Exchange {
            pool,
            conn,
            response,
        } = self;

        let mut body = response.into_body();
        let mut read = 0u64;
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(TransportError::Body)?;
            if let Some(data) = frame.data_ref() {
                read += data.len() as u64;
            }
        }

        pool.checkin(conn);
        Ok(read)
    }
}
