mod common;

use common::{start_network, wait};
use pretty_assertions::assert_eq;
use qnet_sim::{SendOptions, TopologyShape, Wait};

#[test]
fn bb84_keys_match_on_both_sides() {
    let (network, hosts) = start_network(61, &["alice", "bob"], TopologyShape::Linear);
    let key = hosts[0]
        .send_key("bob", 16, SendOptions::default())
        .expect("key exchange");
    assert_eq!(key.len(), 16);
    assert!(key.iter().all(|bit| *bit <= 1));
    assert_eq!(hosts[0].get_key("bob", Wait::Immediate), Some(key.clone()));
    assert_eq!(hosts[1].get_key("alice", wait()), Some(key));
    network.stop(true);
}

#[test]
fn bb84_runs_over_a_relay() {
    let (network, hosts) = start_network(62, &["a", "b", "c"], TopologyShape::Linear);
    let key = hosts[0]
        .send_key("c", 8, SendOptions::acked())
        .expect("key exchange");
    assert_eq!(hosts[2].get_key("a", wait()), Some(key));
    assert!(hosts[1].get_key("a", Wait::Immediate).is_none());
    network.stop(true);
}
