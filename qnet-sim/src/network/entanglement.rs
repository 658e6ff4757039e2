//! Strategies for giving two distant hosts a shared EPR pair.

use std::sync::Arc;

use qnet_backend::{BackendResult, QuantumBackend, Qubit};
use tracing::trace;

/// Builds one elementary pair per link of `route` and swaps them together with
/// a Bell measurement at every intermediate host. The Pauli corrections picked
/// up along the way are applied to the far half at the end, leaving the two
/// endpoints with a |Φ+⟩ pair.
pub(crate) fn swap_chain(
    backend: &Arc<dyn QuantumBackend>,
    route: &[String],
    id: &str,
) -> BackendResult<(Qubit, Qubit)> {
    let mut links = route
        .windows(2)
        .map(|link| Qubit::epr_pair(backend, &link[0], &link[1], None))
        .collect::<BackendResult<Vec<_>>>()?
        .into_iter();

    let Some((mut near, mut far)) = links.next() else {
        // A route of fewer than two hosts has no links; fall back to a local pair.
        let host = route.first().map(String::as_str).unwrap_or_default();
        return Qubit::epr_pair(backend, host, host, Some(id.to_owned()));
    };

    let (mut flip_x, mut flip_z) = (false, false);
    for (left, right) in links {
        // `far` and `left` sit on the same intermediate host.
        far.cnot(&left)?;
        far.h()?;
        let m1 = far.measure()?;
        let m2 = left.measure()?;
        trace!(via = %right.host(), m1, m2, "entanglement swap");
        flip_z ^= m1 == 1;
        flip_x ^= m2 == 1;
        far = right;
    }
    if flip_x {
        far.x()?;
    }
    if flip_z {
        far.z()?;
    }
    near.set_id(id);
    far.set_id(id);
    Ok((near, far))
}

/// Creates the end-to-end pair directly at both endpoints.
pub(crate) fn fabricate(
    backend: &Arc<dyn QuantumBackend>,
    sender: &str,
    receiver: &str,
    id: &str,
) -> BackendResult<(Qubit, Qubit)> {
    Qubit::epr_pair(backend, sender, receiver, Some(id.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnet_backend::StateVectorBackend;

    fn backend(hosts: &[&str]) -> Arc<dyn QuantumBackend> {
        let backend: Arc<dyn QuantumBackend> = Arc::new(StateVectorBackend::seeded(21));
        for host in hosts {
            backend.add_host(host);
        }
        backend
    }

    #[test]
    fn swapped_pair_is_correlated_and_intermediates_released() {
        let hosts = ["a", "b", "c", "d"];
        let backend = backend(&hosts);
        let route: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        for round in 0..32 {
            let (near, far) = swap_chain(&backend, &route, &format!("pair-{round}")).unwrap();
            assert_eq!(near.host(), "a");
            assert_eq!(far.host(), "d");
            assert_eq!(backend.live_qubits(), 2);
            assert_eq!(near.measure().unwrap(), far.measure().unwrap());
        }
    }

    #[test]
    fn fabricated_pair_is_correlated() {
        let backend = backend(&["a", "d"]);
        for _ in 0..16 {
            let (near, far) = fabricate(&backend, "a", "d", "pair").unwrap();
            assert_eq!(near.id(), far.id());
            assert_eq!(near.measure().unwrap(), far.measure().unwrap());
        }
    }
}
