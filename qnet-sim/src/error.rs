use qnet_backend::BackendError;
use qnet_telemetry::TelemetryError;
use thiserror::Error;

use crate::{
    config::ConfigError,
    packet::{PayloadType, Protocol},
};

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("host {0} is already registered")]
    DuplicateHost(String),
    #[error("host {0} is not attached to a network")]
    Detached(String),
    #[error("host {0} has been stopped")]
    HostStopped(String),
    #[error("invalid superdense message {0:?}: expected exactly two bits")]
    InvalidSuperdense(String),
    #[error("probability {0} outside [0, 1]")]
    InvalidProbability(f64),
    #[error("GHZ distribution needs at least one peer")]
    EmptyGhz,
    #[error("no EPR half shared with {0} became available")]
    MissingEpr(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("unable to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failures while decoding an inbound packet. These never reach a caller; the
/// receiving host logs them and drops the packet.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol {protocol} cannot carry a {payload:?} payload")]
    PayloadMismatch {
        protocol: Protocol,
        payload: PayloadType,
    },
    #[error("EPR half {epr_id} shared with {peer} never arrived")]
    MissingEprHalf { peer: String, epr_id: String },
    #[error("key exchange {session} with {peer} stalled at round {round}")]
    KeyExchangeStalled {
        peer: String,
        session: String,
        round: usize,
    },
    #[error("malformed key exchange message: {0}")]
    MalformedKeyMessage(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Send(Box<SimError>),
}

impl From<SimError> for ProtocolError {
    fn from(err: SimError) -> Self {
        ProtocolError::Send(Box::new(err))
    }
}
