use std::sync::Arc;

use qnet_backend::{QuantumBackend, Qubit, StateVectorBackend};

fn main() {
    let backend: Arc<dyn QuantumBackend> = Arc::new(StateVectorBackend::seeded(42));
    backend.add_host("alice");
    backend.add_host("bob");

    let rounds = 200;
    let mut ones = 0;
    let mut agreements = 0;
    for _ in 0..rounds {
        let (a, b) = Qubit::epr_pair(&backend, "alice", "bob", None).expect("hosts registered");
        let first = a.measure().expect("live qubit");
        let second = b.measure().expect("live qubit");
        ones += u32::from(first);
        agreements += u32::from(first == second);
    }

    println!(
        "[qnet-backend] backend={} rounds={rounds} ones={ones} agreements={agreements} live={}",
        backend.name(),
        backend.live_qubits()
    );
}
