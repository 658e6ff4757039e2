mod common;

use common::{start_network, wait};
use pretty_assertions::assert_eq;
use qnet_sim::{AckStatus, SendOptions, SimError, TopologyShape, Wait};

#[test]
fn ghz_shares_agree_with_local_copy() {
    let (network, hosts) = start_network(51, &["a", "b", "c", "d"], TopologyShape::Star);
    let peers = ["b", "c", "d"];
    for round in 0..6 {
        let sent = hosts[0]
            .send_ghz(&peers, Some(format!("ghz-{round}")), false, SendOptions::acked())
            .expect("send ghz");
        assert!(sent.acks.values().all(|ack| *ack == AckStatus::Acked));
        assert_eq!(sent.acks.len(), 3);

        let local = hosts[0].get_ghz("a", Wait::Immediate).expect("local share");
        let expected = local.measure().unwrap();
        for host in &hosts[1..] {
            let share = host.get_ghz("a", wait()).expect("peer share");
            assert_eq!(share.id(), sent.id);
            assert_eq!(share.measure().unwrap(), expected);
        }
    }
    assert_eq!(network.backend().live_qubits(), 0);
    network.stop(true);
}

#[test]
fn distributed_ghz_keeps_nothing_locally() {
    let (network, hosts) = start_network(52, &["a", "b", "c"], TopologyShape::Mesh);
    let sent = hosts[0]
        .send_ghz(&["b", "c"], None, true, SendOptions::acked())
        .expect("send ghz");
    assert!(hosts[0].get_ghz("a", Wait::Immediate).is_none());
    let b = hosts[1].get_ghz("a", wait()).expect("share at b");
    let c = hosts[2].get_ghz("a", wait()).expect("share at c");
    assert_eq!(b.id(), sent.id);
    assert_eq!(b.measure().unwrap(), c.measure().unwrap());
    network.stop(true);
}

#[test]
fn ghz_needs_peers() {
    let (network, hosts) = start_network(53, &["a", "b"], TopologyShape::Linear);
    let err = hosts[0]
        .send_ghz(&[], None, false, SendOptions::acked())
        .unwrap_err();
    assert!(matches!(err, SimError::EmptyGhz));
    network.stop(true);
}
