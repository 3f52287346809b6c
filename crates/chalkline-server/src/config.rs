//! Server configuration.

use std::net::SocketAddr;
use tracing::warn;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";
/// Capacity of each room's broadcast channel.
pub const CHANNEL_CAPACITY: usize = 256;
/// Broadcasts kept per room for late joiners.
pub const MAX_ROOM_HISTORY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub channel_capacity: usize,
    pub history_cap: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            channel_capacity: CHANNEL_CAPACITY,
            history_cap: MAX_ROOM_HISTORY,
        }
    }
}

impl ServerConfig {
    /// Read `CHALKLINE_ADDR` and `CHALKLINE_HISTORY`, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("CHALKLINE_ADDR") {
            match addr.parse() {
                Ok(addr) => config.addr = addr,
                Err(e) => warn!("Ignoring CHALKLINE_ADDR={:?}: {}", addr, e),
            }
        }
        if let Some(cap) = lookup("CHALKLINE_HISTORY") {
            match cap.parse() {
                Ok(cap) => config.history_cap = cap,
                Err(e) => warn!("Ignoring CHALKLINE_HISTORY={:?}: {}", cap, e),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.addr.to_string(), DEFAULT_ADDR);
        assert_eq!(config.history_cap, MAX_ROOM_HISTORY);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = ServerConfig::from_lookup(|key| match key {
            "CHALKLINE_ADDR" => Some("127.0.0.1:9000".to_string()),
            "CHALKLINE_HISTORY" => Some("many".to_string()),
            _ => None,
        });
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.history_cap, MAX_ROOM_HISTORY);
    }
}
