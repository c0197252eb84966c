//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::listener::{
    Capabilities, GlobalTls, ListenerSpec, TopologyOptions, TopologyStrategy,
};
use crate::net::lock::DEFAULT_LOCK_PATH;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Worker loops and topology settings.
    pub runtime: RuntimeConfig,

    /// Global TLS defaults inherited by listeners.
    pub tls: TlsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Declared listeners (`[[listener]]` tables).
    pub listener: Vec<ListenerConfig>,
}

/// Runtime topology configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker event loops (0 = available parallelism).
    pub worker_threads: usize,

    /// Allow other processes to share our ports. When false, each address is
    /// probed once before the per-loop sockets are bound.
    pub reuse_port: bool,

    /// Lock file serializing the bind probe across processes.
    pub lock_path: String,

    /// Override the platform-derived topology strategy.
    pub strategy: Option<StrategyConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            reuse_port: false,
            lock_path: DEFAULT_LOCK_PATH.to_string(),
            strategy: None,
        }
    }
}

impl RuntimeConfig {
    pub fn topology_options(&self) -> TopologyOptions {
        TopologyOptions {
            capabilities: Capabilities::detect(),
            share_port: self.reuse_port,
            lock_path: self.lock_path.clone().into(),
            strategy: self.strategy.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyConfig {
    PerLoop,
    DedicatedThread,
}

impl From<StrategyConfig> for TopologyStrategy {
    fn from(value: StrategyConfig) -> Self {
        match value {
            StrategyConfig::PerLoop => TopologyStrategy::PerLoop,
            StrategyConfig::DedicatedThread => TopologyStrategy::DedicatedThread,
        }
    }
}

/// Global TLS configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_file: String,

    /// Path to private key file (PEM).
    pub key_file: String,

    /// TLS directives applied before any listener's own, e.g.
    /// `[["MinProtocol", "TLSv1.2"]]`.
    pub conf_cmds: Vec<(String, String)>,

    /// Reload certificates automatically when the files change.
    pub watch_files: bool,
}

impl TlsConfig {
    pub fn global(&self) -> GlobalTls {
        GlobalTls::new(self.cert_file.clone(), self.key_file.clone())
            .with_conf_cmds(self.conf_cmds.clone())
    }
}

/// One declared listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Numeric IP literal (e.g. "0.0.0.0", "::").
    pub address: String,

    pub port: u16,

    #[serde(default)]
    pub use_ssl: bool,

    /// Overrides `tls.cert_file` when set.
    #[serde(default)]
    pub cert_file: String,

    /// Overrides `tls.key_file` when set.
    #[serde(default)]
    pub key_file: String,

    #[serde(default)]
    pub use_old_tls: bool,

    #[serde(default)]
    pub conf_cmds: Vec<(String, String)>,
}

impl From<&ListenerConfig> for ListenerSpec {
    fn from(config: &ListenerConfig) -> Self {
        ListenerSpec::new(config.address.clone(), config.port)
            .with_ssl(config.use_ssl)
            .with_cert_files(config.cert_file.clone(), config.key_file.clone())
            .with_old_tls(config.use_old_tls)
            .with_conf_cmds(config.conf_cmds.clone())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter (e.g. "info", "listener_topology=debug").
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
