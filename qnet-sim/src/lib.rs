//! Control plane of a multi-hop quantum network simulator.
//!
//! Hosts exchange classical messages and qubits over a shared [`Network`]
//! that routes packets across classical and quantum reachability graphs,
//! relays them hop by hop and establishes EPR pairs between distant hosts.
//! On top of that transport the hosts run teleportation, superdense coding,
//! GHZ distribution and a BB84 key exchange. Qubit state lives behind the
//! [`qnet_backend::QuantumBackend`] capability.
//!
//! # Quickstart
//! ```
//! use std::sync::Arc;
//! use qnet_backend::StateVectorBackend;
//! use qnet_sim::{Network, SendOptions, TopologyShape, Wait};
//!
//! let network = Network::new(Arc::new(StateVectorBackend::seeded(1)));
//! let hosts = network
//!     .generate_topology(&["alice", "bob"], TopologyShape::Linear)
//!     .unwrap();
//! network.start(None).unwrap();
//!
//! let status = hosts[0]
//!     .send_classical("bob", "hello", SendOptions::acked())
//!     .unwrap();
//! assert!(status.is_acked());
//! let message = hosts[1].get_next_classical("alice", Wait::millis(1_000)).unwrap();
//! assert_eq!(message.content, "hello");
//! network.stop(true);
//! ```

#[cfg(any(
    all(feature = "dev", feature = "test"),
    all(feature = "dev", feature = "prod"),
    all(feature = "test", feature = "prod")
))]
compile_error!("Only one of the `dev`, `test`, or `prod` features may be enabled for qnet-sim.");

pub mod channel;
pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod network;
pub mod packet;
pub mod protocols;
pub mod sequence;
pub mod storage;
pub mod sync;
pub mod worker;

pub use channel::{BitFlip, ClassicalChannel, Erasure, Lossless, Lossy, Noiseless, QuantumChannel};
pub use config::{
    load_config, parse_config, ConfigError, ConfigFormat, HostConfig, NetworkConfig,
    SimulationConfig, TopologyConfig,
};
pub use error::{ProtocolError, SimError, SimResult};
pub use host::{AckStatus, GhzSent, Host, ProtocolRun, SendOptions, Sent};
pub use network::{shortest_path_routing, Graph, Layer, Network, RouteFn, TopologyShape};
pub use packet::{Envelope, Message, Packet, PacketHeader, Payload, Protocol, RoutingPacket};
pub use storage::{CapacityPolicy, ClassicalStorage, Insertion, Purpose, QuantumStorage};
pub use sync::Wait;
