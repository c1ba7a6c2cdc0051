//! The fixed keepalive and flow-control policy for daemon channels.
//!
//! The policy is not caller-configurable: every dial uses the same
//! constants, and a rebuilt connection redials with the identical policy.
//! The hub applies the server half of these constants when it serves the
//! inbound sync endpoint.

use std::time::Duration;
use tonic::transport::Endpoint;

/// Maximum message size accepted and produced, each direction (10 MiB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Initial HTTP/2 flow-control window, per stream and per connection (1 MiB).
pub const INITIAL_WINDOW_SIZE: u32 = 1 << 20;

/// Client side pings every 10s, with pings permitted while no stream is active.
pub const CLIENT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// A client ping unanswered for this long fails the connection.
pub const CLIENT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Bound on establishing a fresh connection to a daemon.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Server side pings every 60s.
pub const SERVER_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// A server ping unanswered for this long fails the connection.
pub const SERVER_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Minimum interval the server tolerates between client pings. tonic does
/// not expose the enforcement knob; the constant documents the policy.
pub const MIN_CLIENT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Idle connections are recycled by the server after 5 minutes. Also not
/// exposed by tonic's server builder; documented here with the rest of
/// the policy.
pub const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Hard cap on server-side connection age.
pub const MAX_CONNECTION_AGE: Duration = Duration::from_secs(30 * 60);

/// Grace period granted to in-flight calls when the age cap is reached.
pub const CONNECTION_AGE_GRACE: Duration = Duration::from_secs(5);

/// Build an endpoint for a daemon address with the client half of the
/// policy applied. Accepts `host:port` or a full `http://` URI.
pub fn endpoint(address: &str) -> Result<Endpoint, tonic::transport::Error> {
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let endpoint = Endpoint::from_shared(uri)?;

    Ok(endpoint
        .connect_timeout(CONNECT_TIMEOUT)
        .http2_keep_alive_interval(CLIENT_KEEPALIVE_INTERVAL)
        .keep_alive_timeout(CLIENT_KEEPALIVE_TIMEOUT)
        .keep_alive_while_idle(true)
        .initial_stream_window_size(INITIAL_WINDOW_SIZE)
        .initial_connection_window_size(INITIAL_WINDOW_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_accepts_bare_host_port() {
        assert!(endpoint("10.0.0.5:9091").is_ok());
    }

    #[test]
    fn test_endpoint_accepts_full_uri() {
        assert!(endpoint("http://10.0.0.5:9091").is_ok());
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        assert!(endpoint("http://exa mple:nope").is_err());
    }
}
