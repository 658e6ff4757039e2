use std::{fmt, sync::Arc};

use tracing::warn;
use uuid::Uuid;

use crate::{
    error::BackendResult,
    gates::{DensityMatrix, Matrix2, Matrix4, SingleQubitGate, TwoQubitGate},
    QuantumBackend, QubitKey,
};

/// Move-only handle to a backend qubit.
///
/// The `id` is the user-facing name and may be renamed freely; the backend
/// addresses the qubit by its [`QubitKey`]. Dropping a live handle releases the
/// backend qubit.
pub struct Qubit {
    host: String,
    id: String,
    blocked: bool,
    key: QubitKey,
    live: bool,
    backend: Arc<dyn QuantumBackend>,
}

impl Qubit {
    /// Fresh |0⟩ qubit at `host` with a random id.
    pub fn new(backend: &Arc<dyn QuantumBackend>, host: &str) -> BackendResult<Self> {
        Self::with_id(backend, host, Uuid::new_v4().to_string())
    }

    pub fn with_id(
        backend: &Arc<dyn QuantumBackend>,
        host: &str,
        id: impl Into<String>,
    ) -> BackendResult<Self> {
        let key = backend.create_qubit(host)?;
        Ok(Self::attach(backend, host, id.into(), key))
    }

    /// Wraps a key the backend already created, e.g. one half of a pair.
    pub fn attach(
        backend: &Arc<dyn QuantumBackend>,
        host: &str,
        id: String,
        key: QubitKey,
    ) -> Self {
        Self {
            host: host.to_owned(),
            id,
            blocked: false,
            key,
            live: true,
            backend: Arc::clone(backend),
        }
    }

    /// Both halves of a |Φ+⟩ pair share one id.
    pub fn epr_pair(
        backend: &Arc<dyn QuantumBackend>,
        host_a: &str,
        host_b: &str,
        id: Option<String>,
    ) -> BackendResult<(Qubit, Qubit)> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (a, b) = backend.create_epr(host_a, host_b)?;
        Ok((
            Self::attach(backend, host_a, id.clone(), a),
            Self::attach(backend, host_b, id, b),
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn blocked(&self) -> bool {
        self.blocked
    }

    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    pub fn key(&self) -> QubitKey {
        self.key
    }

    pub fn backend(&self) -> &Arc<dyn QuantumBackend> {
        &self.backend
    }

    pub fn i(&self) -> BackendResult<()> {
        self.apply(SingleQubitGate::I)
    }

    pub fn x(&self) -> BackendResult<()> {
        self.apply(SingleQubitGate::X)
    }

    pub fn y(&self) -> BackendResult<()> {
        self.apply(SingleQubitGate::Y)
    }

    pub fn z(&self) -> BackendResult<()> {
        self.apply(SingleQubitGate::Z)
    }

    pub fn h(&self) -> BackendResult<()> {
        self.apply(SingleQubitGate::H)
    }

    pub fn t(&self) -> BackendResult<()> {
        self.apply(SingleQubitGate::T)
    }

    pub fn rx(&self, theta: f64) -> BackendResult<()> {
        self.apply(SingleQubitGate::Rx(theta))
    }

    pub fn ry(&self, theta: f64) -> BackendResult<()> {
        self.apply(SingleQubitGate::Ry(theta))
    }

    pub fn rz(&self, theta: f64) -> BackendResult<()> {
        self.apply(SingleQubitGate::Rz(theta))
    }

    pub fn custom_gate(&self, matrix: Matrix2) -> BackendResult<()> {
        self.apply(SingleQubitGate::Custom(matrix))
    }

    pub fn apply(&self, gate: SingleQubitGate) -> BackendResult<()> {
        self.backend.apply_single(self.key, &gate)
    }

    pub fn cnot(&self, target: &Qubit) -> BackendResult<()> {
        self.apply_controlled(target, TwoQubitGate::Cnot)
    }

    pub fn cphase(&self, target: &Qubit) -> BackendResult<()> {
        self.apply_controlled(target, TwoQubitGate::Cphase)
    }

    pub fn custom_two_qubit_gate(&self, target: &Qubit, matrix: Matrix4) -> BackendResult<()> {
        self.apply_controlled(target, TwoQubitGate::Custom(matrix))
    }

    fn apply_controlled(&self, target: &Qubit, gate: TwoQubitGate) -> BackendResult<()> {
        self.backend.apply_two(self.key, target.key, &gate)
    }

    /// Destructive measurement; the handle is consumed.
    pub fn measure(mut self) -> BackendResult<u8> {
        self.live = false;
        self.backend.measure(self.key, false)
    }

    pub fn measure_non_destructive(&self) -> BackendResult<u8> {
        self.backend.measure(self.key, true)
    }

    pub fn release(mut self) -> BackendResult<()> {
        self.live = false;
        self.backend.release(self.key)
    }

    pub fn density_operator(&self) -> BackendResult<Option<DensityMatrix>> {
        self.backend.density_operator(self.key)
    }

    /// Moves the backend qubit to `to` and updates the handle's owner.
    pub fn transfer_to(&mut self, to: &str) -> BackendResult<()> {
        self.backend.send_qubit_to(self.key, &self.host, to)?;
        self.host = to.to_owned();
        Ok(())
    }
}

impl Drop for Qubit {
    fn drop(&mut self) {
        if self.live {
            if let Err(err) = self.backend.release(self.key) {
                warn!(qubit = %self.id, err = %err, "failed to release dropped qubit");
            }
        }
    }
}

impl fmt::Debug for Qubit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qubit")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("blocked", &self.blocked)
            .field("key", &self.key)
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateVectorBackend;
    use pretty_assertions::assert_eq;

    fn backend() -> Arc<dyn QuantumBackend> {
        let backend: Arc<dyn QuantumBackend> = Arc::new(StateVectorBackend::seeded(3));
        backend.add_host("alice");
        backend.add_host("bob");
        backend
    }

    #[test]
    fn epr_halves_share_id() {
        let backend = backend();
        let (a, b) = Qubit::epr_pair(&backend, "alice", "bob", Some("pair-1".into())).unwrap();
        assert_eq!(a.id(), "pair-1");
        assert_eq!(b.id(), "pair-1");
        assert_eq!(a.host(), "alice");
        assert_eq!(b.host(), "bob");
    }

    #[test]
    fn dropping_handle_releases_backend_qubit() {
        let backend = backend();
        {
            let _q = Qubit::new(&backend, "alice").unwrap();
            assert_eq!(backend.live_qubits(), 1);
        }
        assert_eq!(backend.live_qubits(), 0);
    }

    #[test]
    fn transfer_updates_owner() {
        let backend = backend();
        let mut q = Qubit::with_id(&backend, "alice", "q").unwrap();
        q.transfer_to("bob").unwrap();
        assert_eq!(q.host(), "bob");
        q.x().unwrap();
        assert_eq!(q.measure().unwrap(), 1);
        assert_eq!(backend.live_qubits(), 0);
    }

    #[test]
    fn cnot_copies_basis_state() {
        let backend = backend();
        let control = Qubit::new(&backend, "alice").unwrap();
        let target = Qubit::new(&backend, "alice").unwrap();
        control.x().unwrap();
        control.cnot(&target).unwrap();
        assert_eq!(target.measure().unwrap(), 1);
        assert_eq!(control.measure().unwrap(), 1);
    }
}
