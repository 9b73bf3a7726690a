use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::{TlsConnector as TokioTlsConnector, TlsStream};
use trust_dns_resolver::TokioAsyncResolver;

use super::{PhaseTrace, PoolKey, TransportError};

/// A plain or TLS-wrapped TCP stream.
pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Dials new connections for the pool: DNS, TCP, then TLS for https.
pub(crate) struct Connector {
    resolver: TokioAsyncResolver,
    tls: TokioTlsConnector,
    dial_timeout: Duration,
    keep_alive: Duration,
    tls_handshake_timeout: Duration,
}

impl Connector {
    pub(crate) fn new(
        resolver: TokioAsyncResolver,
        tls: TokioTlsConnector,
        dial_timeout: Duration,
        keep_alive: Duration,
        tls_handshake_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            tls,
            dial_timeout,
            keep_alive,
            tls_handshake_timeout,
        }
    }

    pub(crate) async fn connect(
        &self,
        key: &PoolKey,
        trace: &PhaseTrace,
    ) -> Result<MaybeTlsStream, TransportError> {
        let stream = timeout(self.dial_timeout, self.dial(key, trace))
            .await
            .map_err(|_| TransportError::DialTimeout(self.dial_timeout))??;

        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(self.keep_alive))?;

        if !key.is_tls() {
            return Ok(MaybeTlsStream::Plain(stream));
        }

        let tls_stream = timeout(
            self.tls_handshake_timeout,
            self.tls.connect(key.host_name(), stream),
        )
        .await
        .map_err(|_| TransportError::TlsTimeout(self.tls_handshake_timeout))??;

        Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
    }

    async fn dial(&self, key: &PoolKey, trace: &PhaseTrace) -> Result<TcpStream, TransportError> {
        let addrs = self.resolve(key, trace).await?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => TransportError::Connect(e),
            None => TransportError::NoAddresses(key.host_name().to_string()),
        })
    }

    /// IP literals skip name resolution, so they never record DNS phases.
    async fn resolve(
        &self,
        key: &PoolKey,
        trace: &PhaseTrace,
    ) -> Result<Vec<SocketAddr>, TransportError> {
        let host = key.host_name();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, key.port)]);
        }

        trace.dns_start();
        let lookup = self.resolver.lookup_ip(host).await;
        trace.dns_done();

        Ok(lookup?
            .iter()
            .map(|ip| SocketAddr::new(ip, key.port))
            .collect())
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
