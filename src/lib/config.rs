use std::{collections::HashMap, net::IpAddr, time::Duration};

use clap::Parser;

/// Process configuration. Built once in `main` and handed to each component.
#[derive(Parser, Debug, Clone)]
#[command(name = "r_fleet", version, about = "Task orchestration framework for container clusters")]
pub struct Config {
    /// Address the control API binds to
    #[arg(long, env = "FLEET_IP", default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Port the control API listens on
    #[arg(short, long, env = "FLEET_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Framework name registered with the cluster manager
    #[arg(long, env = "FLEET_FRAMEWORK_NAME", default_value = "r_fleet")]
    pub name: String,

    /// User to execute tasks as
    #[arg(short, long, env = "FLEET_USER", default_value = "root")]
    pub user: String,

    /// Seconds to wait for the cluster to confirm registration
    #[arg(long, default_value_t = 5)]
    pub registration_timeout_secs: u64,

    /// etcd endpoints; when empty an in-process store is used
    #[arg(long = "etcd", env = "FLEET_ETCD", value_delimiter = ',')]
    pub etcd: Vec<String>,

    /// Key prefix for everything written to the durable store
    #[arg(long, default_value = "/fleet")]
    pub store_root: String,

    /// Seconds between node inventory refreshes
    #[arg(long, default_value_t = 10)]
    pub reconcile_interval_secs: u64,

    /// Lifetime in seconds of a published node record
    #[arg(long, default_value_t = 20)]
    pub node_ttl_secs: u64,

    /// Seconds between container status polls on the local cluster
    #[arg(long, default_value_t = 1)]
    pub monitor_interval_secs: u64,

    /// Image used when a task names none
    #[arg(long, default_value = "busybox:latest")]
    pub default_image: String,

    /// Working directory inside task containers; requested files are relative to it
    #[arg(long, default_value = "/sandbox")]
    pub sandbox_dir: String,

    /// Node attribute advertised in the inventory, as key=value
    #[arg(long = "attribute", value_parser = parse_attribute)]
    pub attributes: Vec<(String, String)>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FLEET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short = 'D', long)]
    pub debug: bool,
}

impl Config {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn node_ttl(&self) -> Duration {
        Duration::from_secs(self.node_ttl_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn node_attributes(&self) -> HashMap<String, String> {
        self.attributes.iter().cloned().collect()
    }

    pub fn log_filter(&self) -> &str {
        if self.debug { "debug" } else { &self.log_level }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["r_fleet"])
    }
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", raw)),
    }
}
