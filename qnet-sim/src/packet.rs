//! Transport and network envelopes.
//!
//! A [`Packet`] is what a host hands to the network. Multi-hop traffic travels
//! inside a [`RoutingPacket`], and both kinds move through the dispatch queues
//! as an [`Envelope`]. [`PacketHeader`] is the serializable rendering of the
//! field layout; unsequenced packets show up there with `seq_num = -1`.

use std::fmt;

use qnet_backend::Qubit;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::Purpose;

pub type HostId = String;

/// Content of the classical message recorded for every acknowledgement.
pub const ACK_CONTENT: &str = "ACK";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Classical,
    Ack,
    Qubit,
    Epr,
    Teleport,
    Superdense,
    Ghz,
    Broadcast,
    Key,
    /// Header-only id for a routed envelope in transit. Packets never carry
    /// it; the wrapped packet keeps its own protocol.
    Relay,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Classical => "classical",
            Protocol::Ack => "ack",
            Protocol::Qubit => "qubit",
            Protocol::Epr => "epr",
            Protocol::Teleport => "teleport",
            Protocol::Superdense => "superdense",
            Protocol::Ghz => "ghz",
            Protocol::Broadcast => "broadcast",
            Protocol::Key => "key",
            Protocol::Relay => "relay",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadType {
    Signal,
    Classical,
    Quantum,
}

/// Control requests interpreted by the network or the receiving host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Ask the network to establish an EPR pair between sender and receiver.
    EprRequest { id: String, blocked: bool },
    /// Open a BB84 session on the receiver.
    KeyRequest { session: String, key_size: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub sender: HostId,
    pub content: String,
    pub seq_num: Option<u64>,
}

impl Message {
    pub fn new(sender: impl Into<HostId>, content: impl Into<String>, seq_num: Option<u64>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            seq_num,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.content == ACK_CONTENT
    }
}

/// Correction bits and bookkeeping for one teleported qubit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeleportPayload {
    pub epr_id: String,
    pub qubit_id: String,
    pub m1: u8,
    pub m2: u8,
    pub store_as: Purpose,
    /// Peer the teleported qubit is filed under; the sender when absent.
    pub partner: Option<HostId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassicalPayload {
    Message(Message),
    Teleport(TeleportPayload),
}

#[derive(Debug)]
pub enum Payload {
    Signal(Signal),
    Classical(ClassicalPayload),
    Quantum(Qubit),
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Signal(_) => PayloadType::Signal,
            Payload::Classical(_) => PayloadType::Classical,
            Payload::Quantum(_) => PayloadType::Quantum,
        }
    }

    pub fn discard(self) {
        if let Payload::Quantum(qubit) = self {
            let id = qubit.id().to_owned();
            if let Err(err) = qubit.release() {
                warn!(qubit = %id, err = %err, "failed to release discarded payload");
            }
        }
    }
}

#[derive(Debug)]
pub struct Packet {
    pub sender: HostId,
    pub receiver: HostId,
    pub protocol: Protocol,
    pub payload: Payload,
    /// `None` marks an unsequenced packet that takes no part in ACK tracking.
    pub seq_num: Option<u64>,
    pub await_ack: bool,
}

impl Packet {
    pub fn new(
        sender: impl Into<HostId>,
        receiver: impl Into<HostId>,
        protocol: Protocol,
        payload: Payload,
        seq_num: Option<u64>,
        await_ack: bool,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            protocol,
            payload,
            seq_num,
            await_ack,
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    pub fn is_quantum(&self) -> bool {
        matches!(self.payload, Payload::Quantum(_))
    }

    pub fn qubit(&self) -> Option<&Qubit> {
        match &self.payload {
            Payload::Quantum(qubit) => Some(qubit),
            _ => None,
        }
    }

    /// Runs `carry` over the quantum payload, if any. A `None` from `carry`
    /// means the qubit was lost and the packet is gone with it.
    pub fn map_qubit(self, carry: impl FnOnce(Qubit) -> Option<Qubit>) -> Option<Self> {
        let Packet {
            sender,
            receiver,
            protocol,
            payload,
            seq_num,
            await_ack,
        } = self;
        let payload = match payload {
            Payload::Quantum(qubit) => Payload::Quantum(carry(qubit)?),
            other => other,
        };
        Some(Packet {
            sender,
            receiver,
            protocol,
            payload,
            seq_num,
            await_ack,
        })
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            protocol: self.protocol,
            payload_type: self.payload_type(),
            seq_num: self.seq_num.map_or(-1, |seq| seq as i64),
            await_ack: self.await_ack,
            ttl: None,
            route: Vec::new(),
        }
    }

    pub fn discard(self) {
        self.payload.discard();
    }
}

/// Multi-hop wrapper. `sender`/`receiver` describe the current hop; the inner
/// packet keeps the end-to-end addressing.
#[derive(Debug)]
pub struct RoutingPacket {
    pub sender: HostId,
    pub receiver: HostId,
    pub ttl: u32,
    pub route: Vec<HostId>,
    pub packet: Packet,
}

impl RoutingPacket {
    pub fn final_receiver(&self) -> &str {
        &self.packet.receiver
    }

    /// Host after `current` on the recorded route.
    pub fn next_hop_after(&self, current: &str) -> Option<&str> {
        let position = self.route.iter().position(|hop| hop == current)?;
        self.route.get(position + 1).map(String::as_str)
    }
}

#[derive(Debug)]
pub enum Envelope {
    Direct(Packet),
    Routed(RoutingPacket),
}

impl Envelope {
    /// Host currently emitting the envelope.
    pub fn sender(&self) -> &str {
        match self {
            Envelope::Direct(packet) => &packet.sender,
            Envelope::Routed(routing) => &routing.sender,
        }
    }

    /// Addressed receiver of the current hop.
    pub fn receiver(&self) -> &str {
        match self {
            Envelope::Direct(packet) => &packet.receiver,
            Envelope::Routed(routing) => &routing.receiver,
        }
    }

    pub fn final_receiver(&self) -> &str {
        match self {
            Envelope::Direct(packet) => &packet.receiver,
            Envelope::Routed(routing) => routing.final_receiver(),
        }
    }

    pub fn packet(&self) -> &Packet {
        match self {
            Envelope::Direct(packet) => packet,
            Envelope::Routed(routing) => &routing.packet,
        }
    }

    pub fn header(&self) -> PacketHeader {
        match self {
            Envelope::Direct(packet) => packet.header(),
            Envelope::Routed(routing) => PacketHeader {
                sender: routing.sender.clone(),
                receiver: routing.receiver.clone(),
                protocol: Protocol::Relay,
                payload_type: routing.packet.payload_type(),
                seq_num: routing.packet.seq_num.map_or(-1, |seq| seq as i64),
                await_ack: routing.packet.await_ack,
                ttl: Some(routing.ttl),
                route: routing.route.clone(),
            },
        }
    }

    pub fn discard(self) {
        match self {
            Envelope::Direct(packet) => packet.discard(),
            Envelope::Routed(routing) => routing.packet.discard(),
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let packet = self.packet();
        write!(
            f,
            "{} -> {} [{} {:?}",
            self.sender(),
            self.receiver(),
            packet.protocol,
            packet.payload_type()
        )?;
        if let Some(seq) = packet.seq_num {
            write!(f, " seq={seq}")?;
        }
        if let Envelope::Routed(routing) = self {
            write!(f, " ttl={} dst={}", routing.ttl, routing.final_receiver())?;
        }
        f.write_str("]")
    }
}

/// Serializable view of an envelope's addressing fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PacketHeader {
    pub sender: HostId,
    pub receiver: HostId,
    pub protocol: Protocol,
    pub payload_type: PayloadType,
    pub seq_num: i64,
    pub await_ack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<HostId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classical(seq_num: Option<u64>) -> Packet {
        Packet::new(
            "alice",
            "carol",
            Protocol::Classical,
            Payload::Classical(ClassicalPayload::Message(Message::new("alice", "hi", seq_num))),
            seq_num,
            seq_num.is_some(),
        )
    }

    #[test]
    fn unsequenced_header_renders_minus_one() {
        let header = classical(None).header();
        assert_eq!(header.seq_num, -1);
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["seq-num"], -1);
        assert_eq!(json["payload-type"], "classical");
        assert!(json.get("ttl").is_none());
    }

    #[test]
    fn routed_header_carries_route_and_ttl() {
        let envelope = Envelope::Routed(RoutingPacket {
            sender: "alice".into(),
            receiver: "bob".into(),
            ttl: 4,
            route: vec!["alice".into(), "bob".into(), "carol".into()],
            packet: classical(Some(3)),
        });
        let header = envelope.header();
        assert_eq!(header.protocol, Protocol::Relay);
        assert_eq!(envelope.packet().protocol, Protocol::Classical);
        assert_eq!(header.seq_num, 3);
        assert_eq!(header.ttl, Some(4));
        assert_eq!(envelope.final_receiver(), "carol");
        assert_eq!(envelope.to_string(), "alice -> bob [classical Classical seq=3 ttl=4 dst=carol]");
    }

    #[test]
    fn next_hop_follows_recorded_route() {
        let routing = RoutingPacket {
            sender: "bob".into(),
            receiver: "carol".into(),
            ttl: 1,
            route: vec!["alice".into(), "bob".into(), "carol".into()],
            packet: classical(Some(0)),
        };
        assert_eq!(routing.next_hop_after("bob"), Some("carol"));
        assert_eq!(routing.next_hop_after("carol"), None);
        assert_eq!(routing.next_hop_after("mallory"), None);
    }
}
