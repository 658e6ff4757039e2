use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use qnet_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{network::TopologyShape, storage::CapacityPolicy, sync::Wait};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// Simulated delay applied once per hop (ms).
    #[serde(default)]
    pub hop_delay_ms: u64,
    /// Uniform probability that a dispatched packet is dropped.
    #[serde(default)]
    pub drop_probability: f64,
    /// Address every hop of a relayed packet instead of only the destination.
    #[serde(default = "default_true")]
    pub use_hop_by_hop: bool,
    /// Build multi-hop EPR pairs through a real swap chain.
    #[serde(default)]
    pub use_ent_swap: bool,
    /// Relay budget given to every encapsulated packet.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    /// Upper bound on how long the dispatch loop sleeps between passes (ms).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_network_workers")]
    pub max_workers: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostConfig {
    /// Bound on ACK waits; absent means wait forever.
    #[serde(default)]
    pub max_ack_wait_ms: Option<u64>,
    /// Delay before each inbound packet is processed (ms).
    #[serde(default)]
    pub processing_delay_ms: u64,
    /// How far the inbound low-water mark may lag the highest sequence seen.
    #[serde(default = "default_sequence_window")]
    pub sequence_window: u64,
    /// Concurrent packet workers per host.
    #[serde(default = "default_host_workers")]
    pub max_workers: usize,
    /// Bound on internal protocol waits, e.g. the EPR half a teleport needs.
    #[serde(default = "default_protocol_wait_ms")]
    pub protocol_wait_ms: u64,
    #[serde(default)]
    pub storage: CapacityPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TopologyConfig {
    pub hosts: Vec<String>,
    pub shape: TopologyShape,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimulationConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub topology: Option<TopologyConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

const fn default_true() -> bool {
    true
}

const fn default_ttl() -> u32 {
    10
}

const fn default_tick_ms() -> u64 {
    1
}

const fn default_network_workers() -> usize {
    64
}

const fn default_sequence_window() -> u64 {
    10
}

const fn default_host_workers() -> usize {
    64
}

const fn default_protocol_wait_ms() -> u64 {
    5_000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hop_delay_ms: 0,
            drop_probability: 0.0,
            use_hop_by_hop: default_true(),
            use_ent_swap: false,
            ttl: default_ttl(),
            tick_ms: default_tick_ms(),
            max_workers: default_network_workers(),
        }
    }
}

impl NetworkConfig {
    pub fn hop_delay(&self) -> Duration {
        Duration::from_millis(self.hop_delay_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.drop_probability) {
            return Err(ConfigError::Validation(format!(
                "drop probability {} outside [0, 1]",
                self.drop_probability
            )));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Validation(
                "network worker limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_ack_wait_ms: None,
            processing_delay_ms: 0,
            sequence_window: default_sequence_window(),
            max_workers: default_host_workers(),
            protocol_wait_ms: default_protocol_wait_ms(),
            storage: CapacityPolicy::Unlimited,
        }
    }
}

impl HostConfig {
    pub fn ack_wait(&self) -> Wait {
        Wait::from_config(self.max_ack_wait_ms)
    }

    pub fn protocol_wait(&self) -> Wait {
        Wait::millis(self.protocol_wait_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Validation(
                "host worker limit must be greater than zero".into(),
            ));
        }
        if self.sequence_window == 0 {
            return Err(ConfigError::Validation(
                "sequence window must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.host.validate()?;
        if let Some(topology) = &self.topology {
            let mut seen = std::collections::BTreeSet::new();
            if let Some(dup) = topology.hosts.iter().find(|id| !seen.insert(id.as_str())) {
                return Err(ConfigError::Validation(format!(
                    "host {dup} listed twice in topology"
                )));
            }
        }
        Ok(())
    }

    pub fn sample() -> Self {
        Self {
            network: NetworkConfig::default(),
            host: HostConfig {
                max_ack_wait_ms: Some(5_000),
                ..HostConfig::default()
            },
            topology: Some(TopologyConfig {
                hosts: vec!["alice".into(), "bob".into(), "eve".into()],
                shape: TopologyShape::Linear,
            }),
            telemetry: TelemetryConfig::sample("qnet-sample"),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            host: HostConfig::default(),
            topology: None,
            telemetry: TelemetryConfig::default(),
        }
    }
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<SimulationConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents, resolve_format(path, format))?;
    config.validate()?;
    Ok(config)
}

/// Parses a config document. `Auto` is treated as TOML.
pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<SimulationConfig, ConfigError> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| ConfigError::Parse {
                format: ConfigFormat::Toml,
                details: err.to_string(),
            })
        }
    }
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sample_config_is_valid() {
        SimulationConfig::sample().validate().unwrap();
    }

    #[test]
    fn empty_document_takes_defaults() {
        let config = parse_config("", ConfigFormat::Toml).unwrap();
        assert_eq!(config.network, NetworkConfig::default());
        assert_eq!(config.host.sequence_window, 10);
        assert_eq!(config.host.protocol_wait_ms, 5_000);
        assert!(config.network.use_hop_by_hop);
        assert!(!config.network.use_ent_swap);
        assert_eq!(config.host.ack_wait(), Wait::Forever);
    }

    #[test]
    fn rejects_out_of_range_drop_probability() {
        let mut config = SimulationConfig::default();
        config.network.drop_probability = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn resolves_format_from_extension() {
        assert_eq!(
            resolve_format(Path::new("net.yml"), ConfigFormat::Auto),
            ConfigFormat::Yaml
        );
        assert_eq!(
            resolve_format(Path::new("net.conf"), ConfigFormat::Auto),
            ConfigFormat::Toml
        );
        assert_eq!(
            resolve_format(Path::new("net.yml"), ConfigFormat::Toml),
            ConfigFormat::Toml
        );
    }
}
