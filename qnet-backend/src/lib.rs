//! Quantum backend capability consumed by the qnet control plane.
//!
//! The simulator never touches amplitudes directly: hosts and the network talk
//! to a [`QuantumBackend`] through move-only [`Qubit`] handles. The crate ships
//! [`StateVectorBackend`], a small register-splitting state-vector engine that
//! is good enough for protocol prototyping (EPR pairs, teleportation,
//! superdense coding, GHZ states) and deterministic when seeded.
//!
//! # Quickstart
//! ```
//! use std::sync::Arc;
//! use qnet_backend::{QuantumBackend, Qubit, StateVectorBackend};
//!
//! let backend: Arc<dyn QuantumBackend> = Arc::new(StateVectorBackend::seeded(7));
//! backend.add_host("alice");
//! backend.add_host("bob");
//! let (a, b) = Qubit::epr_pair(&backend, "alice", "bob", None).unwrap();
//! assert_eq!(a.measure().unwrap(), b.measure().unwrap());
//! ```

pub mod error;
pub mod gates;
pub mod qubit;
pub mod statevector;

pub use error::{BackendError, BackendResult};
pub use gates::{Complex, DensityMatrix, Matrix2, Matrix4, SingleQubitGate, TwoQubitGate};
pub use qubit::Qubit;
pub use statevector::StateVectorBackend;

/// Backend-internal identity of a qubit. Distinct from the user-facing qubit id
/// string, which the control plane is free to rename.
pub type QubitKey = u64;

/// Gate application, measurement and pair generation. Implementations must
/// serialize operations that touch the same qubit.
pub trait QuantumBackend: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Registers a host so qubits can be created at and sent to it.
    fn add_host(&self, host_id: &str);

    fn create_qubit(&self, host_id: &str) -> BackendResult<QubitKey>;

    /// Moves a qubit between hosts. The state is untouched.
    fn send_qubit_to(&self, key: QubitKey, from: &str, to: &str) -> BackendResult<()>;

    /// Creates a |Φ+⟩ pair with one half at each host.
    fn create_epr(&self, host_a: &str, host_b: &str) -> BackendResult<(QubitKey, QubitKey)> {
        let a = self.create_qubit(host_a)?;
        let b = self.create_qubit(host_b)?;
        self.apply_single(a, &SingleQubitGate::H)?;
        self.apply_two(a, b, &TwoQubitGate::Cnot)?;
        Ok((a, b))
    }

    fn apply_single(&self, key: QubitKey, gate: &SingleQubitGate) -> BackendResult<()>;

    fn apply_two(
        &self,
        control: QubitKey,
        target: QubitKey,
        gate: &TwoQubitGate,
    ) -> BackendResult<()>;

    /// Measures in the computational basis. A destructive measurement also
    /// frees the qubit.
    fn measure(&self, key: QubitKey, non_destructive: bool) -> BackendResult<u8>;

    fn release(&self, key: QubitKey) -> BackendResult<()>;

    /// Reduced single-qubit density operator, when the backend can provide one.
    fn density_operator(&self, _key: QubitKey) -> BackendResult<Option<DensityMatrix>> {
        Ok(None)
    }

    /// Number of live qubits, for leak checks in tests.
    fn live_qubits(&self) -> usize;
}
