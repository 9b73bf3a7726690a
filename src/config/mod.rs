pub mod app_config;
pub mod error;
pub mod probe_config;

pub use error::ConfigError;
pub use probe_config::{ClientConfig, TransportConfig};
