//! Per-link channel models applied by the network on every hop.

use std::fmt::Debug;

use qnet_backend::Qubit;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{SimError, SimResult};

/// Perturbs or erases a qubit in transit. Returning `None` means the qubit
/// was lost; the channel is responsible for releasing it.
pub trait QuantumChannel: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn transmit(&self, qubit: Qubit) -> Option<Qubit>;
}

pub trait ClassicalChannel: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Probability that a packet survives the link.
    fn transmission_probability(&self) -> f64;
}

fn checked(probability: f64) -> SimResult<f64> {
    if (0.0..=1.0).contains(&probability) {
        Ok(probability)
    } else {
        Err(SimError::InvalidProbability(probability))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Noiseless;

impl QuantumChannel for Noiseless {
    fn name(&self) -> &'static str {
        "noiseless"
    }

    fn transmit(&self, qubit: Qubit) -> Option<Qubit> {
        Some(qubit)
    }
}

/// Applies X with the given probability.
#[derive(Clone, Copy, Debug)]
pub struct BitFlip {
    probability: f64,
}

impl BitFlip {
    pub fn new(probability: f64) -> SimResult<Self> {
        Ok(Self {
            probability: checked(probability)?,
        })
    }
}

impl QuantumChannel for BitFlip {
    fn name(&self) -> &'static str {
        "bit-flip"
    }

    fn transmit(&self, qubit: Qubit) -> Option<Qubit> {
        if rand::thread_rng().gen_bool(self.probability) {
            debug!(qubit = %qubit.id(), "bit flip in transit");
            if let Err(err) = qubit.x() {
                warn!(qubit = %qubit.id(), err = %err, "bit flip failed");
            }
        }
        Some(qubit)
    }
}

/// Loses the qubit with the given probability.
#[derive(Clone, Copy, Debug)]
pub struct Erasure {
    probability: f64,
}

impl Erasure {
    pub fn new(probability: f64) -> SimResult<Self> {
        Ok(Self {
            probability: checked(probability)?,
        })
    }
}

impl QuantumChannel for Erasure {
    fn name(&self) -> &'static str {
        "erasure"
    }

    fn transmit(&self, qubit: Qubit) -> Option<Qubit> {
        if !rand::thread_rng().gen_bool(self.probability) {
            return Some(qubit);
        }
        let id = qubit.id().to_owned();
        debug!(qubit = %id, "qubit erased in transit");
        if let Err(err) = qubit.release() {
            warn!(qubit = %id, err = %err, "release of erased qubit failed");
        }
        None
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Lossless;

impl ClassicalChannel for Lossless {
    fn name(&self) -> &'static str {
        "lossless"
    }

    fn transmission_probability(&self) -> f64 {
        1.0
    }
}

/// Drops packets with the given probability.
#[derive(Clone, Copy, Debug)]
pub struct Lossy {
    loss: f64,
}

impl Lossy {
    pub fn new(loss: f64) -> SimResult<Self> {
        Ok(Self {
            loss: checked(loss)?,
        })
    }
}

impl ClassicalChannel for Lossy {
    fn name(&self) -> &'static str {
        "lossy"
    }

    fn transmission_probability(&self) -> f64 {
        1.0 - self.loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnet_backend::{QuantumBackend, StateVectorBackend};
    use std::sync::Arc;

    fn qubit() -> (Arc<dyn QuantumBackend>, Qubit) {
        let backend: Arc<dyn QuantumBackend> = Arc::new(StateVectorBackend::seeded(1));
        backend.add_host("alice");
        let qubit = Qubit::new(&backend, "alice").unwrap();
        (backend, qubit)
    }

    #[test]
    fn certain_bit_flip_inverts_basis_state() {
        let (_backend, q) = qubit();
        let q = BitFlip::new(1.0).unwrap().transmit(q).unwrap();
        assert_eq!(q.measure().unwrap(), 1);
    }

    #[test]
    fn certain_erasure_releases_qubit() {
        let (backend, q) = qubit();
        assert!(Erasure::new(1.0).unwrap().transmit(q).is_none());
        assert_eq!(backend.live_qubits(), 0);
    }

    #[test]
    fn probabilities_are_validated() {
        assert!(matches!(
            Lossy::new(1.5),
            Err(SimError::InvalidProbability(_))
        ));
        assert_eq!(Lossy::new(0.25).unwrap().transmission_probability(), 0.75);
        assert_eq!(Lossless.transmission_probability(), 1.0);
    }
}
