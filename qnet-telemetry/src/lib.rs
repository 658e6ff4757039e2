//! Lightweight telemetry facade for the qnet simulator. The network and every
//! host attached to it share one handle so tests can assert how many packets
//! were dispatched, dropped, relayed or acknowledged without wiring an exporter.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::SystemTime};
use thiserror::Error;

#[cfg(any(
    all(feature = "dev", feature = "test"),
    all(feature = "dev", feature = "prod"),
    all(feature = "test", feature = "prod")
))]
compile_error!(
    "Only one of the `dev`, `test`, or `prod` features may be enabled for qnet-telemetry."
);

#[cfg(feature = "dev")]
const DEFAULT_SAMPLE_LIMIT: usize = 1_024;
#[cfg(feature = "test")]
const DEFAULT_SAMPLE_LIMIT: usize = 256;
#[cfg(feature = "prod")]
const DEFAULT_SAMPLE_LIMIT: usize = 16_384;
#[cfg(not(any(feature = "dev", feature = "test", feature = "prod")))]
const DEFAULT_SAMPLE_LIMIT: usize = 4_096;

fn default_sample_limit() -> usize {
    DEFAULT_SAMPLE_LIMIT
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryConfig {
    /// Name of the simulation run, copied into every snapshot.
    pub run: String,
    /// Maximum number of latency samples kept per series between flushes.
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
    /// Global labels appended to every snapshot.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TelemetryConfig {
    pub fn sample(run: &str) -> Self {
        Self {
            run: run.to_owned(),
            sample_limit: default_sample_limit(),
            labels: BTreeMap::from([("component".into(), "qnet-sim".into())]),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::sample("qnet")
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("counter overflow for metric {0}")]
    CounterOverflow(String),
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub run: String,
    pub timestamp: SystemTime,
    pub labels: BTreeMap<String, String>,
    pub counters: BTreeMap<String, u64>,
    pub latencies_ms: BTreeMap<String, Vec<u64>>,
}

impl TelemetrySnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Default)]
struct TelemetryState {
    counters: BTreeMap<String, u64>,
    latencies_ms: BTreeMap<String, Vec<u64>>,
}

#[derive(Clone)]
pub struct TelemetryHandle {
    config: TelemetryConfig,
    state: Arc<Mutex<TelemetryState>>,
}

impl std::fmt::Debug for TelemetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHandle")
            .field("run", &self.config.run)
            .finish_non_exhaustive()
    }
}

impl Default for TelemetryHandle {
    fn default() -> Self {
        Self::from_config(TelemetryConfig::default())
    }
}

impl TelemetryHandle {
    pub fn from_config(config: TelemetryConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(TelemetryState::default())),
        }
    }

    pub fn record_counter(&self, name: &str, delta: u64) -> Result<(), TelemetryError> {
        let mut guard = self.state.lock();
        let entry = guard.counters.entry(name.to_owned()).or_default();
        *entry = entry
            .checked_add(delta)
            .ok_or_else(|| TelemetryError::CounterOverflow(name.to_owned()))?;
        Ok(())
    }

    /// Samples beyond the configured limit are discarded until the next flush.
    pub fn record_latency_ms(&self, name: &str, value: u64) {
        let mut guard = self.state.lock();
        let series = guard.latencies_ms.entry(name.to_owned()).or_default();
        if series.len() < self.config.sample_limit {
            series.push(value);
        }
    }

    /// Current value of a counter without resetting it.
    pub fn counter(&self, name: &str) -> u64 {
        self.state
            .lock()
            .counters
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    pub fn flush(&self) -> TelemetrySnapshot {
        let mut guard = self.state.lock();
        let snapshot = TelemetrySnapshot {
            run: self.config.run.clone(),
            timestamp: SystemTime::now(),
            labels: self.config.labels.clone(),
            counters: guard.counters.clone(),
            latencies_ms: guard.latencies_ms.clone(),
        };
        guard.counters.clear();
        guard.latencies_ms.clear();
        snapshot
    }

    pub fn sample_limit(&self) -> usize {
        self.config.sample_limit
    }
}
