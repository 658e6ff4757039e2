mod common;

use common::{host_config, start_network, start_network_with, wait};
use pretty_assertions::assert_eq;
use qnet_sim::{metrics, AckStatus, CapacityPolicy, HostConfig, SendOptions, TopologyShape, Wait};

#[test]
fn single_hop_pair_is_correlated() {
    let (network, hosts) = start_network(21, &["alice", "bob"], TopologyShape::Linear);
    for _ in 0..10 {
        let sent = hosts[0]
            .send_epr("bob", None, SendOptions::acked())
            .expect("send epr");
        assert_eq!(sent.ack, AckStatus::Acked);
        assert!(network.shares_epr("alice", "bob"));
        let near = hosts[0]
            .get_epr("bob", Some(&sent.id), Wait::Immediate)
            .expect("near half");
        let far = hosts[1]
            .get_epr("alice", Some(&sent.id), wait())
            .expect("far half");
        assert_eq!(near.id(), far.id());
        assert_eq!(far.host(), "bob");
        assert_eq!(near.measure().unwrap(), far.measure().unwrap());
    }
    network.stop(true);
}

#[test]
fn fabricated_pair_spans_multiple_hops() {
    let (network, hosts) = start_network(22, &["a", "b", "c", "d"], TopologyShape::Linear);
    let sent = hosts[0]
        .send_epr("d", Some("long-pair".into()), SendOptions::acked())
        .expect("send epr");
    assert_eq!(sent.id, "long-pair");
    assert_eq!(sent.ack, AckStatus::Acked);
    assert_eq!(network.telemetry().counter(metrics::EPR_FABRICATED), 1);

    let near = hosts[0].get_epr("d", Some("long-pair"), Wait::Immediate).expect("near");
    let far = hosts[3].get_epr("a", Some("long-pair"), wait()).expect("far");
    assert_eq!(near.measure().unwrap(), far.measure().unwrap());
    assert!(hosts[1].quantum_storage().peek_ids(None, None).is_empty());
    network.stop(true);
}

#[test]
fn swapped_pairs_are_correlated_and_leave_no_intermediate_qubits() {
    let (network, hosts) = start_network(23, &["a", "b", "c", "d"], TopologyShape::Linear);
    network.set_use_ent_swap(true);
    for round in 0..8 {
        let id = format!("swap-{round}");
        let sent = hosts[0]
            .send_epr("d", Some(id.clone()), SendOptions::acked())
            .expect("send epr");
        assert_eq!(sent.ack, AckStatus::Acked);
        assert_eq!(network.backend().live_qubits(), 2);
        let near = hosts[0].get_epr("d", Some(&id), Wait::Immediate).expect("near");
        let far = hosts[3].get_epr("a", Some(&id), wait()).expect("far");
        assert_eq!(near.measure().unwrap(), far.measure().unwrap());
    }
    assert_eq!(network.telemetry().counter(metrics::EPR_SWAPPED), 8);
    network.stop(true);
}

#[test]
fn blocked_pairs_are_skipped_by_anonymous_retrieval() {
    let (network, hosts) = start_network(24, &["alice", "bob"], TopologyShape::Linear);
    let sent = hosts[0]
        .send_epr("bob", None, SendOptions::acked().blocking())
        .expect("send epr");
    assert_eq!(sent.ack, AckStatus::Acked);
    assert!(hosts[0].get_epr("bob", None, Wait::Immediate).is_none());
    assert!(hosts[1].get_epr("alice", None, Wait::Immediate).is_none());
    assert!(hosts[1].get_epr("alice", Some(&sent.id), Wait::Immediate).is_some());
    network.stop(true);
}

#[test]
fn storage_capacity_rejects_extra_pairs() {
    let config = HostConfig {
        storage: CapacityPolicy::Global { limit: 1 },
        ..host_config(common::ACK_WAIT_MS)
    };
    let (network, hosts) =
        start_network_with(25, &["alice", "bob"], TopologyShape::Linear, config);
    for _ in 0..2 {
        let sent = hosts[0]
            .send_epr("bob", None, SendOptions::acked())
            .expect("send epr");
        assert_eq!(sent.ack, AckStatus::Acked);
    }
    assert_eq!(hosts[1].quantum_storage().count_stored(None), 1);
    assert_eq!(hosts[0].quantum_storage().count_stored(None), 1);
    assert_eq!(network.telemetry().counter(metrics::STORAGE_EVICTED), 2);
    assert_eq!(network.backend().live_qubits(), 2);
    network.stop(true);
    assert_eq!(network.backend().live_qubits(), 0);
}

#[test]
fn epr_without_quantum_route_times_out() {
    let (network, hosts) =
        start_network_with(26, &["alice", "bob"], TopologyShape::Linear, host_config(200));
    hosts[0].remove_connection("bob");
    hosts[1].remove_connection("alice");
    let sent = hosts[0]
        .send_epr("bob", None, SendOptions::acked())
        .expect("send epr");
    assert_eq!(sent.ack, AckStatus::TimedOut);
    assert!(network.telemetry().counter(metrics::NO_ROUTE) >= 1);
    network.stop(true);
}
