use std::net::AddrParseError;

use thiserror::Error;

/// Everything that can go wrong before the first worker starts.
/// All variants are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("url argument cannot be empty")]
    EmptyEndpoint,

    #[error("url argument {url:?} cannot be parsed")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("url {url:?} is not a valid request uri")]
    InvalidRequestUri {
        url: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error("url scheme must be http or https, got {0:?}")]
    UnsupportedScheme(String),

    #[error("url {0:?} has no host")]
    MissingHost(String),

    #[error("requests per second must be between 1 and 10, got {0}")]
    RequestsPerSecondOutOfRange(i64),

    #[error("flush interval must be greater than zero")]
    InvalidFlushInterval,

    #[error("worker interval must be greater than zero")]
    InvalidInterval,

    #[error("{var} must be a number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("failed to read config file {path}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in config file")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid DNS host {host:?}")]
    InvalidDnsHost {
        host: String,
        #[source]
        source: AddrParseError,
    },

    #[error("failed to set up DNS resolver")]
    Resolver(#[from] trust_dns_resolver::error::ResolveError),

    #[error("failed to build TLS connector")]
    Tls(#[from] native_tls::Error),
}
