use std::time::Duration;

use thiserror::Error;

/// A failure while obtaining a connection or exchanging a request on it.
/// Nothing here is retried; the caller decides what a failure means.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("request uri has no host")]
    MissingHost,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("dns resolution failed")]
    Resolve(#[from] trust_dns_resolver::error::ResolveError),

    #[error("no addresses found for {0}")]
    NoAddresses(String),

    #[error("connect failed")]
    Connect(#[from] std::io::Error),

    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("tls handshake failed")]
    Tls(#[from] native_tls::Error),

    #[error("tls handshake timed out after {0:?}")]
    TlsTimeout(Duration),

    #[error("http exchange failed")]
    Http(#[from] hyper::Error),

    #[error("reading response body failed")]
    Body(#[source] hyper::Error),
}
