//! Fixed-cadence HTTP polling client.
//!
//! A [`executor::Supervisor`] starts one [`executor::Worker`] per unit of
//! request rate. Every worker shares a single [`transport::TransportPool`] and
//! repeatedly drives an [`http_probe::probe::RequestProbe`], which records the
//! DNS, request-written, first-byte and last-byte offsets of each GET.

pub mod clock;
pub mod config;
pub mod executor;
pub mod http_probe;
pub mod signal;
pub mod transport;

#[cfg(test)]
mod testing;
