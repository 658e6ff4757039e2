mod common;

use std::{fs, sync::Arc};

use pretty_assertions::assert_eq;
use qnet_backend::StateVectorBackend;
use qnet_sim::{
    load_config, CapacityPolicy, ConfigError, ConfigFormat, Network, SimError, TopologyShape,
};

const TOML: &str = r#"
[network]
hop-delay-ms = 2
use-ent-swap = true
ttl = 6

[host]
max-ack-wait-ms = 1500
sequence-window = 32

[host.storage]
policy = "shared-per-peer"
limit = 4

[topology]
hosts = ["alice", "bob", "carol"]
shape = "ring"

[telemetry]
run = "toml-run"
"#;

const YAML: &str = r#"
network:
  drop-probability: 0.25
host:
  storage:
    policy: individual-per-peer
    default: 2
    limits:
      bob: 8
topology:
  hosts: [a, b, c, d]
  shape: star
telemetry:
  run: yaml-run
"#;

#[test]
fn loads_toml_and_builds_network() {
    common::init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("qnet.toml");
    fs::write(&path, TOML).expect("write config");

    let config = load_config(&path, ConfigFormat::Auto).expect("load toml");
    assert_eq!(config.network.hop_delay_ms, 2);
    assert!(config.network.use_ent_swap);
    assert!(config.network.use_hop_by_hop);
    assert_eq!(config.network.ttl, 6);
    assert_eq!(config.host.max_ack_wait_ms, Some(1_500));
    assert_eq!(config.host.sequence_window, 32);
    assert_eq!(config.host.storage, CapacityPolicy::SharedPerPeer { limit: 4 });
    assert_eq!(config.telemetry.run, "toml-run");

    let network = Network::from_config(Arc::new(StateVectorBackend::seeded(71)), &config)
        .expect("network from config");
    assert_eq!(network.host_ids(), vec!["alice", "bob", "carol"]);
    assert_eq!(
        network.get_classical_route("alice", "carol").expect("route"),
        vec!["alice", "carol"]
    );
    let bob = network.get_host("bob").expect("bob");
    assert_eq!(bob.config().sequence_window, 32);
    assert_eq!(bob.quantum_storage().capacity(), CapacityPolicy::SharedPerPeer { limit: 4 });
}

#[test]
fn loads_yaml_by_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("qnet.yaml");
    fs::write(&path, YAML).expect("write config");

    let config = load_config(&path, ConfigFormat::Auto).expect("load yaml");
    assert_eq!(config.network.drop_probability, 0.25);
    match &config.host.storage {
        CapacityPolicy::IndividualPerPeer { default, limits } => {
            assert_eq!(*default, Some(2));
            assert_eq!(limits.get("bob"), Some(&8));
        }
        other => panic!("unexpected policy {other:?}"),
    }
    let topology = config.topology.as_ref().expect("topology");
    assert_eq!(topology.shape, TopologyShape::Star);

    let network = Network::from_config(Arc::new(StateVectorBackend::seeded(72)), &config)
        .expect("network from config");
    assert_eq!(network.get_quantum_route("b", "d").expect("route").len(), 3);
    assert_eq!(network.telemetry().flush().run, "yaml-run");
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let err = load_config(&path, ConfigFormat::Toml).unwrap_err();
    assert!(matches!(err, ConfigError::Io { path: reported, .. } if reported == path));
}

#[test]
fn invalid_documents_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[network]\ndrop-probability = 2.0\n").expect("write config");
    assert!(matches!(
        load_config(&path, ConfigFormat::Auto),
        Err(ConfigError::Validation(_))
    ));

    fs::write(&path, "[network\n").expect("write config");
    assert!(matches!(
        load_config(&path, ConfigFormat::Auto),
        Err(ConfigError::Parse { format: ConfigFormat::Toml, .. })
    ));

    fs::write(&path, "[topology]\nhosts = [\"a\", \"a\"]\nshape = \"mesh\"\n").expect("write config");
    let config = qnet_sim::parse_config(
        &fs::read_to_string(&path).expect("read config"),
        ConfigFormat::Toml,
    )
    .expect("parse");
    let err = Network::from_config(Arc::new(StateVectorBackend::seeded(73)), &config).unwrap_err();
    assert!(matches!(err, SimError::Config(ConfigError::Validation(_))));
}
