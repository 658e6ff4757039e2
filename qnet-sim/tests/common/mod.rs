#![allow(dead_code)]

use std::{sync::Arc, thread, time::Duration};

use qnet_backend::StateVectorBackend;
use qnet_sim::{
    HostConfig, Host, Network, SimulationConfig, TopologyConfig, TopologyShape, Wait,
};
use tracing_subscriber::EnvFilter;

pub const ACK_WAIT_MS: u64 = 5_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn host_config(max_ack_wait_ms: u64) -> HostConfig {
    HostConfig {
        max_ack_wait_ms: Some(max_ack_wait_ms),
        ..HostConfig::default()
    }
}

/// Starts a network over `ids` connected in `shape`. Hosts come back in the
/// order given.
pub fn start_network(seed: u64, ids: &[&str], shape: TopologyShape) -> (Network, Vec<Arc<Host>>) {
    start_network_with(seed, ids, shape, host_config(ACK_WAIT_MS))
}

pub fn start_network_with(
    seed: u64,
    ids: &[&str],
    shape: TopologyShape,
    host: HostConfig,
) -> (Network, Vec<Arc<Host>>) {
    init_tracing();
    let config = SimulationConfig {
        host,
        topology: Some(TopologyConfig {
            hosts: ids.iter().map(|id| id.to_string()).collect(),
            shape,
        }),
        ..SimulationConfig::default()
    };
    let network = Network::from_config(Arc::new(StateVectorBackend::seeded(seed)), &config)
        .expect("network from config");
    network.start(None).expect("network start");
    let hosts = ids
        .iter()
        .map(|id| network.get_host(id).expect("generated host"))
        .collect();
    (network, hosts)
}

/// Polls `condition` for up to five seconds.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn wait() -> Wait {
    Wait::millis(ACK_WAIT_MS)
}
