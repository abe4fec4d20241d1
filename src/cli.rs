//! CLI for this application
//!
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::settings;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug, clap::Parser)]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("DIPPER_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("DIPPER_HTTP_LISTEN_PORT"),
        help = "Port to bind Dipper HTTP API server to"
    )]
    pub listen_port: u16,

    #[clap(
        long,
        env("DIPPER_NODE_ADDRESS"),
        help = "Address other members use to reach this node (defaults to the listen address)"
    )]
    pub node_address: Option<SocketAddr>,

    // Cluster configuration information: topology
    #[clap(
        long,
        env("DIPPER_CLUSTER_MEMBERS"),
        value_delimiter = ',',
        help = "Datastore members as host:port (e.g., 10.0.0.1:8410,10.0.0.2:8410). If empty, runs as a single node."
    )]
    pub cluster_members: Vec<SocketAddr>,

    #[clap(
        long,
        env("DIPPER_ALLOWED_HOSTS"),
        value_delimiter = ',',
        help = "Hosts allowed to call the datastore endpoints"
    )]
    pub allowed_hosts: Vec<String>,

    #[clap(
        long,
        env("DIPPER_ALLOW_ALL_HOSTS"),
        help = "Allow any host to call the datastore endpoints"
    )]
    pub allow_all_hosts: bool,

    #[clap(
        long,
        env("DIPPER_HOST_KEY"),
        help = "Key identifying this node to its peers (generated if absent)"
    )]
    pub host_key: Option<String>,

    #[clap(
        long,
        default_value = "1000",
        env("DIPPER_REMOTE_TIMEOUT_MS"),
        help = "Timeout in milliseconds for one datastore call to a peer"
    )]
    pub remote_timeout_ms: u64,

    #[clap(
        long,
        default_value = "3",
        env("DIPPER_REMOTE_MAX_ATTEMPTS"),
        help = "Most peers tried for one datastore call"
    )]
    pub remote_max_attempts: usize,

    #[clap(
        long,
        default_value = "30",
        env("DIPPER_DAMAGED_COOLDOWN_SECONDS"),
        help = "Seconds an unreachable peer is tried last"
    )]
    pub damaged_cooldown_secs: u64,

    #[clap(
        long,
        default_value = "2097152",
        env("DIPPER_MAX_OBJECT_SIZE"),
        help = "Largest object accepted from a peer, in bytes"
    )]
    pub max_object_size: usize,

    #[clap(
        long,
        default_value = "10",
        env("DIPPER_EXPIRE_INTERVAL_SECONDS"),
        help = "Seconds between sweeps of expired entries"
    )]
    pub expire_interval_secs: u64,

    #[clap(
        long,
        env("DIPPER_LIMITS_CONFIG"),
        help = "Path to the JSON rate limiting configuration"
    )]
    pub limits_config: Option<PathBuf>,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            node_address: self.node_address,
            cluster_members: self.cluster_members,
            allowed_hosts: self.allowed_hosts,
            allow_all_hosts: self.allow_all_hosts,
            host_key: self.host_key,
            remote_timeout_ms: self.remote_timeout_ms,
            remote_max_attempts: self.remote_max_attempts,
            damaged_cooldown_secs: self.damaged_cooldown_secs,
            max_object_size: self.max_object_size,
            expire_interval_secs: self.expire_interval_secs,
            limits_config: self.limits_config,
        }
    }
}
