use std::time::Duration;

use coordination::etcd::EtcdConfig;
use coordination::util::parse_endpoints;
use envconfig::Envconfig;

use crate::coordinator::CoordinatorConfig;

/// Tunables read from the environment. Per-invocation options (endpoints,
/// strategy, group) come from the command line instead.
#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // ── Layout ──────────────────────────────────────────────────────
    #[envconfig(from = "SEQUENCER_ROOT", default = "/autoscaling-sequencer")]
    pub root: String,

    // ── etcd session ────────────────────────────────────────────────
    #[envconfig(default = "10")]
    pub session_ttl_secs: i64,

    #[envconfig(default = "3")]
    pub keepalive_interval_secs: u64,

    #[envconfig(default = "5")]
    pub connect_timeout_secs: u64,

    // ── Retries ─────────────────────────────────────────────────────
    #[envconfig(default = "500")]
    pub retry_interval_ms: u64,

    /// 0 retries until success or timeout.
    #[envconfig(default = "0")]
    pub max_attempts: u32,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_attempts(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            root: self.root.clone(),
            retry_interval: self.retry_interval(),
            max_attempts: self.max_attempts(),
        }
    }

    /// etcd settings for the comma-separated `connect` string given on the
    /// command line.
    pub fn etcd_config(&self, connect: &str) -> EtcdConfig {
        EtcdConfig {
            endpoints: parse_endpoints(connect),
            session_ttl: self.session_ttl_secs,
            keepalive_interval: self.keepalive_interval(),
            connect_timeout: self.connect_timeout(),
        }
    }
}
