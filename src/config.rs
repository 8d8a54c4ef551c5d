//! Agent configuration
//!
//! One immutable `AgentConfig` is built at startup from the command line and
//! passed into every component; nothing reads ambient global state. The store
//! TTL is always twice the publish interval and is not configurable on its
//! own.

use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "metad", about = "Cluster metadata agent")]
pub struct AgentConfig {
    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Store key namespace (keys live under /<namespace>/<hostname>)
    #[arg(long, default_value = "meta")]
    pub namespace: String,

    /// etcd peer address
    #[arg(long, default_value = "http://localhost:2379")]
    pub store_endpoint: String,

    /// Hostname override (defaults to the detected short hostname)
    #[arg(long, default_value_t = detect_hostname())]
    pub hostname: String,

    /// API listening port
    #[arg(long, default_value_t = 2235)]
    pub port: u16,

    /// Publish interval in seconds. The store TTL is 2x this value.
    #[arg(long, default_value_t = 60)]
    pub interval_secs: u64,
}

impl AgentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn ttl(&self) -> Duration {
        2 * self.interval()
    }

    /// Root key for the whole cluster, e.g. `/meta`.
    pub fn root_key(&self) -> String {
        format!("/{}", self.namespace)
    }

    /// Key this node publishes under, e.g. `/meta/node1`.
    pub fn host_key(&self) -> String {
        format!("/{}/{}", self.namespace, self.hostname)
    }
}

fn detect_hostname() -> String {
    let host = gethostname::gethostname().to_string_lossy().to_string();
    // Short form: strip any domain suffix
    host.split('.').next().unwrap_or("localhost").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(args: &[&str]) -> AgentConfig {
        AgentConfig::parse_from(std::iter::once("metad").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let cfg = config_with(&[]);
        assert_eq!(cfg.namespace, "meta");
        assert_eq!(cfg.port, 2235);
        assert_eq!(cfg.ttl(), Duration::from_secs(120));
        assert!(!cfg.debug);
    }

    #[test]
    fn key_layout() {
        let cfg = config_with(&["--namespace", "meta", "--hostname", "node1"]);
        assert_eq!(cfg.root_key(), "/meta");
        assert_eq!(cfg.host_key(), "/meta/node1");
    }

    #[test]
    fn ttl_tracks_interval() {
        let cfg = config_with(&["--interval-secs", "5"]);
        assert_eq!(cfg.interval(), Duration::from_secs(5));
        assert_eq!(cfg.ttl(), Duration::from_secs(10));
    }
}
