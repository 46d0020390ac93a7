use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::lookup_host;

/// Resolve the configured bind host and port to a concrete transport address,
/// taking the first IPv4 or IPv6 entry the resolver yields.  Failure here is
/// fatal to startup.
pub async fn resolve_bind_address(host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|source| ResolveError::Lookup {
            host: host.to_string(),
            port,
            source,
        })?;
    addrs.next().ok_or_else(|| ResolveError::NoAddress {
        host: host.to_string(),
        port,
    })
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("address lookup failed for {host}:{port}: {source}")]
    Lookup {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("no usable IPv4/IPv6 address for {host}:{port}")]
    NoAddress { host: String, port: u16 },
}
