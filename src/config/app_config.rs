use std::env;
use std::{net::IpAddr, time::Duration};

use tokio_native_tls::TlsConnector as TokioTlsConnector;
use trust_dns_resolver::{
    TokioAsyncResolver,
    config::{NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts},
};

use super::{ClientConfig, ConfigError};

/// Load the client configuration from an optional YAML file and environment variables.
/// The file named by `CONFIG_FILE` is read when the variable is set, then
/// `TARGET_URL`, `REQUESTS_PER_SECOND`, `FLUSH_INTERVAL_SECONDS` and `DNS_HOSTS`
/// override whatever the file said.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from(|name| env::var(name).ok())
}

pub fn load_config_from<F>(lookup: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match lookup("CONFIG_FILE") {
        Some(path) => {
            let config_str = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::ReadFile { path, source })?;
            serde_yaml::from_str(&config_str)?
        }
        None => ClientConfig::default(),
    };

    if let Some(endpoint) = lookup("TARGET_URL") {
        config.endpoint = endpoint;
    }
    if let Some(value) = lookup("REQUESTS_PER_SECOND") {
        config.requests_per_second = parse_number("REQUESTS_PER_SECOND", &value)?;
    }
    if let Some(value) = lookup("FLUSH_INTERVAL_SECONDS") {
        config.flush_interval_seconds = parse_number("FLUSH_INTERVAL_SECONDS", &value)?;
    }
    if let Some(hosts) = lookup("DNS_HOSTS") {
        config.dns_hosts = hosts
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    config.validate()?;

    log::info!("Using endpoint: {}", config.endpoint);
    if !config.dns_hosts.is_empty() {
        log::info!("Using DNS hosts: {:?}", config.dns_hosts);
    }

    Ok(config)
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}

/// Setup a TLS connector, optionally accepting invalid certificates
pub fn setup_tls_connector(accept_invalid_certs: bool) -> Result<TokioTlsConnector, ConfigError> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(accept_invalid_certs);
    let connector = builder.build()?;
    Ok(TokioTlsConnector::from(connector))
}

/// Setup a DNS resolver using the provided DNS hosts
/// This function creates a `TokioAsyncResolver` configured with the specified DNS hosts,
/// or from the system configuration when no hosts are given.
/// Explicit hosts get 2 attempts, a timeout of 100 milliseconds, and a cache size of 1024.
pub fn setup_resolver(dns_hosts: &[String]) -> Result<TokioAsyncResolver, ConfigError> {
    if dns_hosts.is_empty() {
        return Ok(TokioAsyncResolver::tokio_from_system_conf()?);
    }

    let mut opts = ResolverOpts::default();
    opts.attempts = 2;
    opts.timeout = Duration::from_millis(100);
    opts.cache_size = 1024;

    let mut name_servers = NameServerConfigGroup::new();

    for host in dns_hosts {
        let ip: IpAddr = host.parse().map_err(|source| ConfigError::InvalidDnsHost {
            host: host.clone(),
            source,
        })?;
        name_servers.push(NameServerConfig {
            socket_addr: (ip, 53).into(),
            protocol: Protocol::Tcp,
            tls_dns_name: None,
            trust_negative_responses: false,
            bind_addr: None,
        });
    }

    let resolver_config = ResolverConfig::from_parts(None, vec![], name_servers);
    Ok(TokioAsyncResolver::tokio(resolver_config, opts))
}
