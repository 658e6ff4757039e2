mod common;

use common::{start_network, wait};
use pretty_assertions::assert_eq;
use qnet_sim::{AckStatus, SendOptions, SimError, TopologyShape};

#[test]
fn all_two_bit_messages_decode() {
    let (network, hosts) = start_network(41, &["alice", "bob"], TopologyShape::Linear);
    for bits in ["00", "01", "10", "11", "11", "10", "01", "00"] {
        let status = hosts[0]
            .send_superdense("bob", bits, SendOptions::acked())
            .expect("superdense");
        assert_eq!(status, AckStatus::Acked);
        let message = hosts[1].get_next_classical("alice", wait()).expect("decoded message");
        assert_eq!(message.content, bits);
    }
    assert_eq!(network.backend().live_qubits(), 0);
    network.stop(true);
}

#[test]
fn superdense_over_relay() {
    let (network, hosts) = start_network(42, &["a", "b", "c"], TopologyShape::Linear);
    for bits in ["01", "10"] {
        hosts[0]
            .send_superdense("c", bits, SendOptions::acked())
            .expect("superdense");
        let message = hosts[2].get_next_classical("a", wait()).expect("decoded message");
        assert_eq!(message.content, bits);
    }
    network.stop(true);
}

#[test]
fn rejects_malformed_bit_strings() {
    let (network, hosts) = start_network(43, &["alice", "bob"], TopologyShape::Linear);
    for bits in ["", "0", "012", "ab"] {
        let err = hosts[0]
            .send_superdense("bob", bits, SendOptions::acked())
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidSuperdense(_)));
    }
    assert_eq!(network.backend().live_qubits(), 0);
    network.stop(true);
}
