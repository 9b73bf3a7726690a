use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::ConfigError;

pub const MIN_REQUESTS_PER_SECOND: i64 = 1;
pub const MAX_REQUESTS_PER_SECOND: i64 = 10;

/// Fixed per-request deadline.
pub const PER_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// The client configuration.
/// Contains the endpoint to poll, how many workers poll it and how the shared transport behaves.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// The URL every worker issues its GET requests against.
    #[serde(default)]
    pub endpoint: String,

    /// Number of workers, each probing once per interval.
    /// Must be within 1..=10.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: i64,

    /// How often idle pooled connections are swept, in seconds.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,

    /// Pause between the end of one probe and the start of the next, in milliseconds.
    #[serde(default = "default_interval_millis")]
    pub interval_millis: u64,

    /// Name servers used for DNS resolution.
    /// Falls back to the system resolver configuration when empty.
    #[serde(default)]
    pub dns_hosts: Vec<String>,

    #[serde(default)]
    pub transport: TransportConfig,
}

/// Connection pool tuning for the shared transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Max idle connections kept across all hosts. 0 means no limit.
    pub max_idle_total: usize,
    /// Max idle connections kept per host.
    pub max_idle_per_host: usize,
    pub idle_timeout_seconds: u64,
    pub dial_timeout_seconds: u64,
    pub keep_alive_seconds: u64,
    pub tls_handshake_timeout_seconds: u64,
    pub accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_total: 100,
            max_idle_per_host: 100,
            idle_timeout_seconds: 90,
            dial_timeout_seconds: 30,
            keep_alive_seconds: 30,
            tls_handshake_timeout_seconds: 10,
            accept_invalid_certs: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            requests_per_second: default_requests_per_second(),
            flush_interval_seconds: default_flush_interval_seconds(),
            interval_millis: default_interval_millis(),
            dns_hosts: Vec::new(),
            transport: TransportConfig::default(),
        }
    }
}

fn default_requests_per_second() -> i64 {
    2
}

fn default_flush_interval_seconds() -> u64 {
    60
}

fn default_interval_millis() -> u64 {
    1000
}

impl ClientConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }

    /// Number of workers to start. Only meaningful after [`ClientConfig::validate`] succeeded.
    pub fn worker_count(&self) -> usize {
        self.requests_per_second
            .clamp(MIN_REQUESTS_PER_SECOND, MAX_REQUESTS_PER_SECOND) as usize
    }

    /// Check every startup constraint and return the parsed endpoint.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let endpoint = parse_endpoint(&self.endpoint)?;

        if !(MIN_REQUESTS_PER_SECOND..=MAX_REQUESTS_PER_SECOND).contains(&self.requests_per_second)
        {
            return Err(ConfigError::RequestsPerSecondOutOfRange(
                self.requests_per_second,
            ));
        }
        if self.flush_interval_seconds == 0 {
            return Err(ConfigError::InvalidFlushInterval);
        }
        if self.interval_millis == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        Ok(endpoint)
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::EmptyEndpoint);
    }

    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidEndpoint {
        url: raw.to_string(),
        source,
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::MissingHost(raw.to_string()));
    }

    Ok(url)
}
