use thiserror::Error;

use crate::QubitKey;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("unknown qubit key {0}")]
    UnknownQubit(QubitKey),
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("qubit {key} is held by {actual}, not {expected}")]
    HostMismatch {
        key: QubitKey,
        expected: String,
        actual: String,
    },
    #[error("two-qubit gate needs distinct qubits, got {0} twice")]
    SameQubit(QubitKey),
}
