//! Agent configuration

use anyhow::{bail, Context, Result};
use floor_lib::Thresholds;
use serde::Deserialize;
use std::time::Duration;

/// Agent configuration, read from un-prefixed environment variables
///
/// Keys the agent adds beyond the controller thresholds carry a
/// `FLOOR_AGENT_` prefix. Kubernetes injects `<SERVICE>_PORT=tcp://...`
/// service links into every pod, so a bare `API_PORT` can be clobbered.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_target_percent")]
    pub target_cpu_utilization: f64,

    #[serde(default = "default_target_percent")]
    pub target_memory_utilization: f64,

    /// Floor for the CPU 95th percentile
    #[serde(default = "default_min_percent")]
    pub min_cpu_utilization: f64,

    #[serde(default = "default_min_percent")]
    pub min_memory_utilization: f64,

    #[serde(default = "default_min_network_mbps")]
    pub min_network_utilization_mbps: f64,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,

    #[serde(default = "default_scale_up_delay")]
    pub scale_up_delay_seconds: u64,

    #[serde(default = "default_scale_down_delay")]
    pub scale_down_delay_seconds: u64,

    /// Ceiling for the synthetic memory buffer
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,

    #[serde(default = "default_enable_memory")]
    pub enable_memory_utilization: bool,

    #[serde(default = "default_network_interface")]
    pub network_interface: String,

    /// Node name from the Kubernetes downward API
    #[serde(default)]
    pub node_name: Option<String>,

    /// API server port for health/metrics (`FLOOR_AGENT_API_PORT`)
    #[serde(rename = "floor_agent_api_port", default = "default_api_port")]
    pub api_port: u16,

    /// Bound on waiting for load units to stop at shutdown
    /// (`FLOOR_AGENT_SHUTDOWN_GRACE_SECONDS`)
    #[serde(
        rename = "floor_agent_shutdown_grace_seconds",
        default = "default_shutdown_grace"
    )]
    pub shutdown_grace_seconds: u64,
}

fn default_target_percent() -> f64 {
    80.0
}

fn default_min_percent() -> f64 {
    20.0
}

fn default_min_network_mbps() -> f64 {
    20.0
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_scale_up_delay() -> u64 {
    60
}

fn default_scale_down_delay() -> u64 {
    120
}

fn default_max_memory_mb() -> usize {
    1024
}

fn default_enable_memory() -> bool {
    true
}

fn default_network_interface() -> String {
    "eth0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_shutdown_grace() -> u64 {
    30
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    /// Load configuration from an explicit key/value map
    pub fn from_env_map(vars: config::Map<String, String>) -> Result<Self> {
        Self::from_environment(config::Environment::default().source(Some(vars)))
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let agent: AgentConfig = config
            .try_deserialize()
            .context("Invalid configuration value")?;
        agent.validate()?;
        Ok(agent)
    }

    pub fn validate(&self) -> Result<()> {
        let percentages = [
            ("TARGET_CPU_UTILIZATION", self.target_cpu_utilization),
            ("TARGET_MEMORY_UTILIZATION", self.target_memory_utilization),
            ("MIN_CPU_UTILIZATION", self.min_cpu_utilization),
            ("MIN_MEMORY_UTILIZATION", self.min_memory_utilization),
        ];
        for (key, value) in percentages {
            if !(0.0..=100.0).contains(&value) {
                bail!("{key} must be within [0, 100], got {value}");
            }
        }

        if self.min_cpu_utilization > self.target_cpu_utilization {
            bail!(
                "MIN_CPU_UTILIZATION ({}) must not exceed TARGET_CPU_UTILIZATION ({})",
                self.min_cpu_utilization,
                self.target_cpu_utilization
            );
        }
        if self.min_memory_utilization > self.target_memory_utilization {
            bail!(
                "MIN_MEMORY_UTILIZATION ({}) must not exceed TARGET_MEMORY_UTILIZATION ({})",
                self.min_memory_utilization,
                self.target_memory_utilization
            );
        }
        if self.min_network_utilization_mbps.is_nan() || self.min_network_utilization_mbps < 0.0 {
            bail!(
                "MIN_NETWORK_UTILIZATION_MBPS must be non-negative, got {}",
                self.min_network_utilization_mbps
            );
        }
        if self.max_memory_mb == 0 {
            bail!("MAX_MEMORY_MB must be greater than zero");
        }
        if self.monitor_interval_seconds == 0 {
            bail!("MONITOR_INTERVAL_SECONDS must be greater than zero");
        }

        Ok(())
    }

    /// `NODE_NAME` when set and non-empty, otherwise the local hostname
    pub fn resolve_node_name(&self) -> Result<String> {
        if let Some(name) = self.node_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return Ok(name.to_string());
            }
        }

        let host = hostname::get().context("Failed to resolve local hostname")?;
        host.into_string()
            .map_err(|raw| anyhow::anyhow!("Hostname is not valid UTF-8: {raw:?}"))
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            target_cpu_percent: self.target_cpu_utilization,
            target_memory_percent: self.target_memory_utilization,
            min_cpu_p95_percent: self.min_cpu_utilization,
            min_memory_percent: self.min_memory_utilization,
            min_network_mbps: self.min_network_utilization_mbps,
            memory_enforcement: self.enable_memory_utilization,
            scale_up_cooldown: Duration::from_secs(self.scale_up_delay_seconds),
            scale_down_cooldown: Duration::from_secs(self.scale_down_delay_seconds),
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_env_map(vars(&[])).unwrap();

        assert_eq!(config.target_cpu_utilization, 80.0);
        assert_eq!(config.min_network_utilization_mbps, 20.0);
        assert_eq!(config.monitor_interval(), Duration::from_secs(30));
        assert_eq!(config.max_memory_mb, 1024);
        assert!(config.enable_memory_utilization);
        assert_eq!(config.network_interface, "eth0");
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.thresholds(), Thresholds::default());
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_env_map(vars(&[
            ("TARGET_CPU_UTILIZATION", "70"),
            ("MIN_CPU_UTILIZATION", "30.5"),
            ("SCALE_UP_DELAY_SECONDS", "15"),
            ("ENABLE_MEMORY_UTILIZATION", "false"),
            ("NETWORK_INTERFACE", "ens5"),
            ("NODE_NAME", "worker-1"),
        ]))
        .unwrap();

        let thresholds = config.thresholds();
        assert_eq!(thresholds.target_cpu_percent, 70.0);
        assert_eq!(thresholds.min_cpu_p95_percent, 30.5);
        assert_eq!(thresholds.scale_up_cooldown, Duration::from_secs(15));
        assert!(!thresholds.memory_enforcement);
        assert_eq!(config.network_interface, "ens5");
        assert_eq!(config.resolve_node_name().unwrap(), "worker-1");
    }

    #[test]
    fn test_agent_keys_are_prefixed() {
        let config = AgentConfig::from_env_map(vars(&[
            ("FLOOR_AGENT_API_PORT", "9100"),
            ("FLOOR_AGENT_SHUTDOWN_GRACE_SECONDS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_service_link_variables_are_ignored() {
        let config = AgentConfig::from_env_map(vars(&[
            ("API_PORT", "tcp://10.96.0.12:8080"),
            ("API_PORT_8080_TCP", "tcp://10.96.0.12:8080"),
            ("API_SERVICE_PORT", "8080"),
            ("SHUTDOWN_GRACE_SECONDS", "tcp://10.96.0.13:80"),
        ]))
        .unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
    }

    #[test]
    fn test_malformed_value_is_error() {
        assert!(AgentConfig::from_env_map(vars(&[("MAX_MEMORY_MB", "abc")])).is_err());
    }

    #[test]
    fn test_min_above_target_rejected() {
        let result = AgentConfig::from_env_map(vars(&[
            ("MIN_CPU_UTILIZATION", "90"),
            ("TARGET_CPU_UTILIZATION", "80"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_percentage_rejected() {
        assert!(AgentConfig::from_env_map(vars(&[("TARGET_MEMORY_UTILIZATION", "150")])).is_err());
    }

    #[test]
    fn test_zero_interval_and_memory_rejected() {
        assert!(AgentConfig::from_env_map(vars(&[("MONITOR_INTERVAL_SECONDS", "0")])).is_err());
        assert!(AgentConfig::from_env_map(vars(&[("MAX_MEMORY_MB", "0")])).is_err());
    }

    #[test]
    fn test_negative_network_floor_rejected() {
        assert!(
            AgentConfig::from_env_map(vars(&[("MIN_NETWORK_UTILIZATION_MBPS", "-1")])).is_err()
        );
    }

    #[test]
    fn test_empty_node_name_falls_back_to_hostname() {
        let config = AgentConfig::from_env_map(vars(&[("NODE_NAME", "")])).unwrap();
        let name = config.resolve_node_name().unwrap();
        assert!(!name.is_empty());
    }
}
