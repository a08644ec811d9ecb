//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::relay::DEFAULT_OUTBOUND_CAPACITY;

/// Default listening port
pub const DEFAULT_PORT: u16 = 3000;

/// Default upper bound on one WebSocket message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// WebSocket upgrade must complete within this time
    pub handshake_timeout: Duration,

    /// Authenticator must answer within this time
    pub auth_timeout: Duration,

    /// Frames queued per connection before new ones are dropped
    pub outbound_queue_capacity: usize,

    /// Largest accepted WebSocket message in bytes
    pub max_message_size: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            handshake_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            outbound_queue_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tcp_nodelay: true, // signaling is latency sensitive
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set authentication timeout
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set per-connection outbound queue capacity (at least 1)
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity.max(1);
        self
    }

    /// Set maximum WebSocket message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.outbound_queue_capacity, DEFAULT_OUTBOUND_CAPACITY);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:3001".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 3001);
    }

    #[test]
    fn test_builder_outbound_capacity_floor() {
        let config = ServerConfig::default().outbound_queue_capacity(0);

        assert_eq!(config.outbound_queue_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .handshake_timeout(Duration::from_secs(3))
            .auth_timeout(Duration::from_secs(1))
            .outbound_queue_capacity(8)
            .max_message_size(1024);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.auth_timeout, Duration::from_secs(1));
        assert_eq!(config.outbound_queue_capacity, 8);
        assert_eq!(config.max_message_size, 1024);
    }
}
