use std::{path::PathBuf, sync::Arc};

use qnet_backend::StateVectorBackend;
use qnet_sim::{load_config, ConfigFormat, Network, SendOptions, SimulationConfig, Wait};
use tracing_subscriber::EnvFilter;

/// Runs BB84 between the first and last configured hosts. Pass a TOML or
/// YAML config path to override the built-in sample.
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => load_config(&path, ConfigFormat::Auto).expect("readable config"),
        None => SimulationConfig::sample(),
    };
    let network = Network::from_config(Arc::new(StateVectorBackend::new()), &config)
        .expect("valid simulation config");
    network.start(None).expect("network starts");

    let ids = network.host_ids();
    let (first, last) = match (ids.first(), ids.last()) {
        (Some(first), Some(last)) if first != last => (first.clone(), last.clone()),
        _ => panic!("config needs at least two hosts"),
    };
    let sender = network.get_host(&first).expect("host registered");
    let receiver = network.get_host(&last).expect("host registered");

    let key = sender
        .send_key(&last, 32, SendOptions::default())
        .expect("key exchange completes");
    let mirrored = receiver
        .get_key(&first, Wait::millis(5_000))
        .expect("receiver holds key");
    network.stop(true);

    let render = |bits: &[u8]| bits.iter().map(|bit| bit.to_string()).collect::<String>();
    println!("[qnet-sim] {first} key={}", render(&key));
    println!("[qnet-sim] {last} key={}", render(&mirrored));
    println!("[qnet-sim] agree={}", key == mirrored);
}
