use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_PORT, ROBOT_SERVICE_TYPE};
use shared::types::InitialState;

/// Everything `DiscoveryClient::start` needs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    /// Robots and manual addresses to seed the store with
    #[serde(default)]
    pub initial: InitialState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// Restrict mDNS to one network interface
    #[serde(default)]
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_serial_port_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_health_poll_interval() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    3000
}

fn default_max_concurrent_probes() -> usize {
    32
}

fn default_service_types() -> Vec<String> {
    vec![ROBOT_SERVICE_TYPE.to_string()]
}

fn default_ports() -> Vec<u16> {
    vec![DEFAULT_PORT]
}

fn default_enabled() -> bool {
    true
}

fn default_serial_port_poll_interval() -> u64 {
    5000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            health_poll_interval_ms: default_health_poll_interval(),
            request_timeout_ms: default_request_timeout(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms.max(1))
    }

    /// Request timeout, never longer than one poll interval
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1)).min(self.interval())
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            service_types: default_service_types(),
            ports: default_ports(),
            interface: None,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_serial_port_poll_interval(),
        }
    }
}

impl SerialConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }
}
