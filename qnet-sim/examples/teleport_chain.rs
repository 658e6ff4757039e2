use std::sync::Arc;

use qnet_backend::StateVectorBackend;
use qnet_sim::{metrics, Network, SendOptions, SimulationConfig, TopologyConfig, TopologyShape, Wait};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut config = SimulationConfig::sample();
    config.network.use_ent_swap = true;
    config.topology = Some(TopologyConfig {
        hosts: ["alice", "bob", "carol", "dave"].map(String::from).to_vec(),
        shape: TopologyShape::Linear,
    });
    let network = Network::from_config(Arc::new(StateVectorBackend::seeded(7)), &config)
        .expect("valid simulation config");
    network.start(None).expect("network starts");
    let alice = network.get_host("alice").expect("alice registered");
    let dave = network.get_host("dave").expect("dave registered");

    let rounds = 20;
    let mut ones = 0;
    for round in 0..rounds {
        let id = format!("payload-{round}");
        let qubit = alice.new_qubit_with_id(id.clone()).expect("qubit allocated");
        qubit.x().expect("live qubit");
        alice
            .send_teleport("dave", qubit, SendOptions::acked())
            .expect("teleport completes");
        let received = dave
            .get_data_qubit("alice", Some(&id), Wait::millis(5_000))
            .expect("teleported qubit arrives");
        ones += u32::from(received.measure().expect("live qubit"));
    }

    let telemetry = network.telemetry();
    network.stop(true);
    let snapshot = telemetry.flush();
    println!(
        "[qnet-sim] rounds={rounds} ones={ones} swapped={} relayed={}",
        snapshot.counter(metrics::EPR_SWAPPED),
        snapshot.counter(metrics::RELAYED)
    );
    println!(
        "[qnet-sim] snapshot={}",
        snapshot.to_json().expect("snapshot serializes")
    );
}
