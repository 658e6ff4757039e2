//! Register-splitting state-vector backend.
//!
//! Every qubit belongs to exactly one register. Fresh qubits start in their own
//! single-qubit register, two-qubit gates merge registers by tensor product and
//! measurement factors the measured qubit back out, so unentangled qubits never
//! pay for each other's amplitudes.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::trace;

use crate::{
    error::{BackendError, BackendResult},
    gates::{Complex, DensityMatrix, SingleQubitGate, TwoQubitGate},
    QuantumBackend, QubitKey,
};

const PROBABILITY_FLOOR: f64 = 1e-12;

#[derive(Debug)]
struct Slot {
    host: String,
    register: u64,
}

/// Qubit `qubits[i]` is bit `i` of every amplitude index.
#[derive(Debug)]
struct Register {
    qubits: Vec<QubitKey>,
    amplitudes: Vec<Complex>,
}

impl Register {
    fn single(key: QubitKey) -> Self {
        Self {
            qubits: vec![key],
            amplitudes: vec![Complex::ONE, Complex::ZERO],
        }
    }

    fn basis(key: QubitKey, bit: u8) -> Self {
        let mut register = Self::single(key);
        if bit == 1 {
            register.amplitudes.swap(0, 1);
        }
        register
    }

    fn position(&self, key: QubitKey) -> BackendResult<usize> {
        self.qubits
            .iter()
            .position(|candidate| *candidate == key)
            .ok_or(BackendError::UnknownQubit(key))
    }

    /// `self ⊗ other`, with `other` taking the high bits.
    fn tensor(self, other: Register) -> Register {
        let low = self.amplitudes.len();
        let mut amplitudes = vec![Complex::ZERO; low * other.amplitudes.len()];
        for (high_index, high) in other.amplitudes.iter().enumerate() {
            for (low_index, low_amp) in self.amplitudes.iter().enumerate() {
                amplitudes[low_index + high_index * low] = *low_amp * *high;
            }
        }
        let mut qubits = self.qubits;
        qubits.extend(other.qubits);
        Register { qubits, amplitudes }
    }

    fn probability_of_one(&self, position: usize) -> f64 {
        let mask = 1usize << position;
        self.amplitudes
            .iter()
            .enumerate()
            .filter(|(index, _)| index & mask != 0)
            .map(|(_, amp)| amp.norm_sqr())
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }

    /// Projects onto `outcome` and removes the qubit at `position`.
    fn collapse_out(&mut self, position: usize, outcome: u8, probability: f64) {
        let mask = 1usize << position;
        let low_mask = mask - 1;
        let norm = probability.sqrt();
        let mut amplitudes = vec![Complex::ZERO; self.amplitudes.len() / 2];
        for (index, amp) in self.amplitudes.iter().enumerate() {
            let bit = u8::from(index & mask != 0);
            if bit != outcome {
                continue;
            }
            let compressed = (index & low_mask) | ((index >> (position + 1)) << position);
            amplitudes[compressed] = amp.scale(1.0 / norm);
        }
        self.amplitudes = amplitudes;
        self.qubits.remove(position);
    }
}

#[derive(Debug)]
struct Registry {
    hosts: HashSet<String>,
    qubits: HashMap<QubitKey, Slot>,
    registers: HashMap<u64, Register>,
    next_key: QubitKey,
    next_register: u64,
    rng: StdRng,
}

impl Registry {
    fn slot(&self, key: QubitKey) -> BackendResult<&Slot> {
        self.qubits.get(&key).ok_or(BackendError::UnknownQubit(key))
    }

    fn register_of(&self, key: QubitKey) -> BackendResult<u64> {
        Ok(self.slot(key)?.register)
    }

    fn insert_register(&mut self, register: Register) -> u64 {
        let id = self.next_register;
        self.next_register += 1;
        for key in &register.qubits {
            if let Some(slot) = self.qubits.get_mut(key) {
                slot.register = id;
            }
        }
        self.registers.insert(id, register);
        id
    }

    fn take_register(&mut self, id: u64) -> BackendResult<Register> {
        // A dangling register id means the bookkeeping is corrupt; surface it
        // as an unknown qubit rather than panicking.
        self.registers
            .remove(&id)
            .ok_or(BackendError::UnknownQubit(QubitKey::MAX))
    }

    fn merged(&mut self, a: QubitKey, b: QubitKey) -> BackendResult<u64> {
        let ra = self.register_of(a)?;
        let rb = self.register_of(b)?;
        if ra == rb {
            return Ok(ra);
        }
        let first = self.take_register(ra)?;
        let second = self.take_register(rb)?;
        Ok(self.insert_register(first.tensor(second)))
    }

    fn measure(&mut self, key: QubitKey, keep: bool) -> BackendResult<u8> {
        let register_id = self.register_of(key)?;
        let mut register = self.take_register(register_id)?;
        let position = register.position(key)?;

        let p1 = register.probability_of_one(position);
        let mut outcome = u8::from(self.rng.gen::<f64>() < p1);
        let mut probability = if outcome == 1 { p1 } else { 1.0 - p1 };
        if probability < PROBABILITY_FLOOR {
            outcome ^= 1;
            probability = 1.0 - probability;
        }
        register.collapse_out(position, outcome, probability);

        if !register.qubits.is_empty() {
            self.registers.insert(register_id, register);
        }
        if keep {
            self.insert_register(Register::basis(key, outcome));
        } else {
            self.qubits.remove(&key);
        }
        Ok(outcome)
    }
}

/// Reference backend. Thread-safe behind a single mutex.
#[derive(Debug)]
pub struct StateVectorBackend {
    inner: Mutex<Registry>,
}

impl StateVectorBackend {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic measurement outcomes for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Mutex::new(Registry {
                hosts: HashSet::new(),
                qubits: HashMap::new(),
                registers: HashMap::new(),
                next_key: 0,
                next_register: 0,
                rng,
            }),
        }
    }
}

impl Default for StateVectorBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl QuantumBackend for StateVectorBackend {
    fn name(&self) -> &'static str {
        "statevector"
    }

    fn add_host(&self, host_id: &str) {
        self.inner.lock().hosts.insert(host_id.to_owned());
    }

    fn create_qubit(&self, host_id: &str) -> BackendResult<QubitKey> {
        let mut registry = self.inner.lock();
        if !registry.hosts.contains(host_id) {
            return Err(BackendError::UnknownHost(host_id.to_owned()));
        }
        let key = registry.next_key;
        registry.next_key += 1;
        registry.qubits.insert(
            key,
            Slot {
                host: host_id.to_owned(),
                register: 0,
            },
        );
        registry.insert_register(Register::single(key));
        trace!(key, host = host_id, "qubit created");
        Ok(key)
    }

    fn send_qubit_to(&self, key: QubitKey, from: &str, to: &str) -> BackendResult<()> {
        let mut registry = self.inner.lock();
        if !registry.hosts.contains(to) {
            return Err(BackendError::UnknownHost(to.to_owned()));
        }
        let slot = registry
            .qubits
            .get_mut(&key)
            .ok_or(BackendError::UnknownQubit(key))?;
        if slot.host != from {
            return Err(BackendError::HostMismatch {
                key,
                expected: from.to_owned(),
                actual: slot.host.clone(),
            });
        }
        slot.host = to.to_owned();
        Ok(())
    }

    fn apply_single(&self, key: QubitKey, gate: &SingleQubitGate) -> BackendResult<()> {
        let mut registry = self.inner.lock();
        let register_id = registry.register_of(key)?;
        let register = registry
            .registers
            .get_mut(&register_id)
            .ok_or(BackendError::UnknownQubit(key))?;
        let mask = 1usize << register.position(key)?;
        let matrix = gate.matrix();
        for index in 0..register.amplitudes.len() {
            if index & mask != 0 {
                continue;
            }
            let a0 = register.amplitudes[index];
            let a1 = register.amplitudes[index | mask];
            register.amplitudes[index] = matrix[0][0] * a0 + matrix[0][1] * a1;
            register.amplitudes[index | mask] = matrix[1][0] * a0 + matrix[1][1] * a1;
        }
        Ok(())
    }

    fn apply_two(
        &self,
        control: QubitKey,
        target: QubitKey,
        gate: &TwoQubitGate,
    ) -> BackendResult<()> {
        if control == target {
            return Err(BackendError::SameQubit(control));
        }
        let mut registry = self.inner.lock();
        let register_id = registry.merged(control, target)?;
        let register = registry
            .registers
            .get_mut(&register_id)
            .ok_or(BackendError::UnknownQubit(control))?;
        let control_mask = 1usize << register.position(control)?;
        let target_mask = 1usize << register.position(target)?;
        let matrix = gate.matrix();
        for base in 0..register.amplitudes.len() {
            if base & (control_mask | target_mask) != 0 {
                continue;
            }
            // Basis order |control target⟩: 00, 01, 10, 11.
            let indices = [
                base,
                base | target_mask,
                base | control_mask,
                base | control_mask | target_mask,
            ];
            let old = indices.map(|index| register.amplitudes[index]);
            for (row, index) in indices.iter().enumerate() {
                register.amplitudes[*index] = (0..4)
                    .map(|col| matrix[row][col] * old[col])
                    .fold(Complex::ZERO, |acc, term| acc + term);
            }
        }
        Ok(())
    }

    fn measure(&self, key: QubitKey, non_destructive: bool) -> BackendResult<u8> {
        let outcome = self.inner.lock().measure(key, non_destructive)?;
        trace!(key, outcome, non_destructive, "qubit measured");
        Ok(outcome)
    }

    fn release(&self, key: QubitKey) -> BackendResult<()> {
        self.inner.lock().measure(key, false).map(|_| ())
    }

    fn density_operator(&self, key: QubitKey) -> BackendResult<Option<DensityMatrix>> {
        let registry = self.inner.lock();
        let register_id = registry.register_of(key)?;
        let register = registry
            .registers
            .get(&register_id)
            .ok_or(BackendError::UnknownQubit(key))?;
        let mask = 1usize << register.position(key)?;
        let mut rho = [[Complex::ZERO; 2]; 2];
        for index in 0..register.amplitudes.len() {
            if index & mask != 0 {
                continue;
            }
            let amps = [register.amplitudes[index], register.amplitudes[index | mask]];
            for row in 0..2 {
                for col in 0..2 {
                    rho[row][col] = rho[row][col] + amps[row] * amps[col].conj();
                }
            }
        }
        Ok(Some(rho))
    }

    fn live_qubits(&self) -> usize {
        self.inner.lock().qubits.len()
    }
}
