//! Dipper application settings
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::config_error;
use crate::error::Result;
use crate::limiters::RateLimitingConfig;
use crate::protocol::{RemoteSettings, MAX_OBJECT_SIZE};

pub const STANDARD_PORT_HTTP: u16 = 8410;
pub const DEFAULT_PORT_HTTP: &str = "8410";

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    // Address peers use to reach this node; derived from the listen socket if absent
    pub node_address: Option<SocketAddr>,

    // Cluster configuration information: every datastore member's address
    pub cluster_members: Vec<SocketAddr>,

    // Peer access: host names or addresses allowed to call the datastore endpoints
    pub allowed_hosts: Vec<String>,
    pub allow_all_hosts: bool,

    // Identifies this node to its peers; generated when absent
    pub host_key: Option<String>,

    // Remote datastore calls
    pub remote_timeout_ms: u64,
    pub remote_max_attempts: usize,
    pub damaged_cooldown_secs: u64,

    // Largest object accepted from a peer, in bytes
    pub max_object_size: usize,

    // Interval between sweeps of expired datastore entries
    pub expire_interval_secs: u64,

    // JSON rate limiting configuration; no limits when absent
    pub limits_config: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: STANDARD_PORT_HTTP,
            node_address: None,
            cluster_members: Vec::new(),
            allowed_hosts: Vec::new(),
            allow_all_hosts: false,
            host_key: None,
            remote_timeout_ms: 1000,
            remote_max_attempts: 3,
            damaged_cooldown_secs: 30,
            max_object_size: MAX_OBJECT_SIZE,
            expire_interval_secs: 10,
            limits_config: None,
        }
    }
}

impl Settings {
    pub fn listen_socket(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .listen_address
            .parse()
            .map_err(|err| config_error!("Invalid listen address {}: {}", self.listen_address, err))?;
        Ok(SocketAddr::from((ip, self.listen_port)))
    }

    /// This node's identity on the hash ring. It must equal the address the
    /// other members list for it.
    pub fn node_address(&self) -> Result<SocketAddr> {
        if let Some(address) = self.node_address {
            return Ok(address);
        }
        let listen = self.listen_socket()?;
        if listen.ip().is_unspecified() {
            if !self.cluster_members.is_empty() {
                tracing::warn!(
                    "Listening on {} without a node address; assuming 127.0.0.1",
                    listen
                );
            }
            return Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, listen.port())));
        }
        Ok(listen)
    }

    pub fn remote_settings(&self) -> RemoteSettings {
        let defaults = RemoteSettings::default();
        RemoteSettings {
            attempt_timeout: Duration::from_millis(self.remote_timeout_ms),
            max_attempts: self.remote_max_attempts.max(1),
            damaged_cooldown: Duration::from_secs(self.damaged_cooldown_secs),
            host_key: self.host_key.clone().unwrap_or(defaults.host_key),
        }
    }

    pub fn expire_interval(&self) -> Duration {
        Duration::from_secs(self.expire_interval_secs.max(1))
    }

    pub fn rate_limiting_config(&self) -> Result<RateLimitingConfig> {
        match &self.limits_config {
            Some(path) => RateLimitingConfig::from_file(path),
            None => {
                tracing::warn!("No rate limiting configuration given; no limits apply");
                Ok(RateLimitingConfig::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_address_defaults_to_loopback_for_wildcard_listen() {
        let settings = Settings::default();
        assert_eq!(
            settings.node_address().unwrap(),
            "127.0.0.1:8410".parse::<SocketAddr>().unwrap()
        );
        let settings = Settings {
            listen_address: "10.1.2.3".to_string(),
            ..Settings::default()
        };
        assert_eq!(
            settings.node_address().unwrap(),
            "10.1.2.3:8410".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn invalid_listen_address_is_a_config_error() {
        let settings = Settings {
            listen_address: "not-an-ip".to_string(),
            ..Settings::default()
        };
        assert!(settings.listen_socket().is_err());
    }

    #[test]
    fn remote_settings_follow_settings() {
        let settings = Settings {
            host_key: Some("node-a".to_string()),
            remote_timeout_ms: 250,
            ..Settings::default()
        };
        let remote = settings.remote_settings();
        assert_eq!(remote.host_key, "node-a");
        assert_eq!(remote.attempt_timeout, Duration::from_millis(250));
        assert_eq!(remote.max_attempts, 3);
    }
}
