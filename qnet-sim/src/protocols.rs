//! Protocol engine.
//!
//! Encoders turn host-level operations into [`Packet`]s; [`receive`] decodes
//! an inbound packet against the receiving host's storages. The BB84 key
//! exchange lives here as well, since both of its halves are driven by
//! classical messages the engine defines.

use std::{sync::Arc, time::Instant};

use qnet_backend::{BackendResult, Qubit, SingleQubitGate};
use rand::Rng;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::{
    error::{ProtocolError, SimResult},
    host::{Host, SendOptions},
    packet::{
        ClassicalPayload, Message, Packet, Payload, Protocol, RoutingPacket, Signal,
        TeleportPayload,
    },
    sequence::Admission,
    storage::Purpose,
    sync::Wait,
};

const KEY_PREFIX: &str = "qkd";

pub fn classical(sender: &str, receiver: &str, message: Message, seq: Option<u64>, await_ack: bool) -> Packet {
    Packet::new(
        sender,
        receiver,
        Protocol::Classical,
        Payload::Classical(ClassicalPayload::Message(message)),
        seq,
        await_ack,
    )
}

pub fn ack(sender: &str, receiver: &str, seq: u64) -> Packet {
    Packet::new(
        sender,
        receiver,
        Protocol::Ack,
        Payload::Classical(ClassicalPayload::Message(Message::new(
            sender,
            crate::packet::ACK_CONTENT,
            Some(seq),
        ))),
        Some(seq),
        false,
    )
}

/// Qubits are marked blocked while in transit and released on arrival.
pub fn qubit(sender: &str, receiver: &str, mut qubit: Qubit, seq: Option<u64>, await_ack: bool) -> Packet {
    qubit.set_blocked(true);
    quantum(Protocol::Qubit, sender, receiver, qubit, seq, await_ack)
}

pub fn superdense(sender: &str, receiver: &str, qubit: Qubit, seq: Option<u64>, await_ack: bool) -> Packet {
    quantum(Protocol::Superdense, sender, receiver, qubit, seq, await_ack)
}

pub fn ghz(sender: &str, receiver: &str, qubit: Qubit, seq: Option<u64>, await_ack: bool) -> Packet {
    quantum(Protocol::Ghz, sender, receiver, qubit, seq, await_ack)
}

fn quantum(
    protocol: Protocol,
    sender: &str,
    receiver: &str,
    qubit: Qubit,
    seq: Option<u64>,
    await_ack: bool,
) -> Packet {
    Packet::new(sender, receiver, protocol, Payload::Quantum(qubit), seq, await_ack)
}

pub fn epr_request(
    sender: &str,
    receiver: &str,
    id: String,
    blocked: bool,
    seq: Option<u64>,
    await_ack: bool,
) -> Packet {
    Packet::new(
        sender,
        receiver,
        Protocol::Epr,
        Payload::Signal(Signal::EprRequest { id, blocked }),
        seq,
        await_ack,
    )
}

pub fn teleport(
    sender: &str,
    receiver: &str,
    payload: TeleportPayload,
    seq: Option<u64>,
    await_ack: bool,
) -> Packet {
    Packet::new(
        sender,
        receiver,
        Protocol::Teleport,
        Payload::Classical(ClassicalPayload::Teleport(payload)),
        seq,
        await_ack,
    )
}

pub fn broadcast(sender: &str, receiver: &str, content: &str) -> Packet {
    Packet::new(
        sender,
        receiver,
        Protocol::Broadcast,
        Payload::Classical(ClassicalPayload::Message(Message::new(sender, content, None))),
        None,
        false,
    )
}

pub fn key_request(sender: &str, receiver: &str, session: String, key_size: usize, seq: Option<u64>) -> Packet {
    Packet::new(
        sender,
        receiver,
        Protocol::Key,
        Payload::Signal(Signal::KeyRequest { session, key_size }),
        seq,
        false,
    )
}

/// Re-addresses a routed packet for its next hop from `via`. Returns `None`,
/// releasing any qubit aboard, once the TTL is spent.
pub fn relay(mut routing: RoutingPacket, via: &str) -> Option<RoutingPacket> {
    if routing.ttl == 0 {
        debug!(via, dst = %routing.final_receiver(), "ttl expired, dropping packet");
        routing.packet.discard();
        return None;
    }
    routing.ttl -= 1;
    routing.sender = via.to_owned();
    Some(routing)
}

/// Bell-measures `qubit` against `epr`, returning `(m1, m2)` for the Z and X
/// corrections respectively.
pub fn bell_measure(qubit: Qubit, epr: Qubit) -> BackendResult<(u8, u8)> {
    qubit.cnot(&epr)?;
    qubit.h()?;
    let m1 = qubit.measure()?;
    let m2 = epr.measure()?;
    Ok((m1, m2))
}

/// Encoding gates for a two-bit superdense message.
pub fn superdense_gates(bits: &str) -> Option<Vec<SingleQubitGate>> {
    match bits {
        "00" => Some(Vec::new()),
        "01" => Some(vec![SingleQubitGate::X]),
        "10" => Some(vec![SingleQubitGate::Z]),
        "11" => Some(vec![SingleQubitGate::X, SingleQubitGate::Z]),
        _ => None,
    }
}

/// Applies an inbound packet to `host`.
pub fn receive(host: &Arc<Host>, packet: Packet) -> Result<(), ProtocolError> {
    let Packet {
        sender,
        protocol,
        payload,
        seq_num,
        ..
    } = packet;
    match (protocol, payload) {
        (Protocol::Ack, Payload::Classical(ClassicalPayload::Message(message))) => {
            if let Some(seq) = message.seq_num {
                if host.acks.acknowledge(&sender, seq) == Admission::Fresh {
                    host.classical.append(message);
                }
            }
            Ok(())
        }
        (
            Protocol::Classical | Protocol::Broadcast,
            Payload::Classical(ClassicalPayload::Message(message)),
        ) => {
            host.classical.append(message);
            Ok(())
        }
        (Protocol::Qubit, Payload::Quantum(mut qubit)) => {
            qubit.set_blocked(false);
            host.store(qubit, Purpose::Data, &sender);
            Ok(())
        }
        (Protocol::Epr, Payload::Quantum(qubit)) => {
            host.store(qubit, Purpose::Epr, &sender);
            Ok(())
        }
        (Protocol::Ghz, Payload::Quantum(mut qubit)) => {
            qubit.set_blocked(false);
            host.store(qubit, Purpose::Ghz, &sender);
            Ok(())
        }
        (Protocol::Teleport, Payload::Classical(ClassicalPayload::Teleport(teleport))) => {
            receive_teleport(host, &sender, teleport)
        }
        (Protocol::Superdense, Payload::Quantum(qubit)) => {
            receive_superdense(host, &sender, qubit, seq_num)
        }
        (Protocol::Key, Payload::Signal(Signal::KeyRequest { session, key_size })) => {
            run_key_receiver(host, &sender, &session, key_size)
        }
        (protocol, payload) => {
            let payload_type = payload.payload_type();
            payload.discard();
            Err(ProtocolError::PayloadMismatch {
                protocol,
                payload: payload_type,
            })
        }
    }
}

fn receive_teleport(host: &Host, sender: &str, teleport: TeleportPayload) -> Result<(), ProtocolError> {
    let TeleportPayload {
        epr_id,
        qubit_id,
        m1,
        m2,
        store_as,
        partner,
    } = teleport;
    let mut qubit = host
        .quantum
        .get_from_host(sender, Some(&epr_id), Some(Purpose::Epr), host.config().protocol_wait())
        .ok_or_else(|| ProtocolError::MissingEprHalf {
            peer: sender.to_owned(),
            epr_id: epr_id.clone(),
        })?;
    if m2 == 1 {
        qubit.x()?;
    }
    if m1 == 1 {
        qubit.z()?;
    }
    qubit.set_id(qubit_id);
    qubit.set_blocked(false);
    trace!(host = %host.id(), sender, epr = %epr_id, "teleported qubit reconstructed");
    host.store(qubit, store_as, partner.as_deref().unwrap_or(sender));
    Ok(())
}

fn receive_superdense(
    host: &Host,
    sender: &str,
    received: Qubit,
    seq: Option<u64>,
) -> Result<(), ProtocolError> {
    let own = host
        .quantum
        .get_from_host(sender, Some(received.id()), Some(Purpose::Epr), host.config().protocol_wait())
        .ok_or_else(|| ProtocolError::MissingEprHalf {
            peer: sender.to_owned(),
            epr_id: received.id().to_owned(),
        })?;
    received.cnot(&own)?;
    received.h()?;
    let high = received.measure()?;
    let low = own.measure()?;
    host.classical
        .append(Message::new(sender, format!("{high}{low}"), seq));
    Ok(())
}

fn round_id(session: &str, round: usize) -> String {
    format!("{session}:{round}")
}

fn key_message(session: &str, round: usize, field: &str, value: u8) -> String {
    format!("{KEY_PREFIX}:{session}:{round}:{field}:{value}")
}

/// Waits for the next `field` message of `session`/`round` from `peer`,
/// stepping over unrelated traffic.
fn next_key_message(
    host: &Host,
    peer: &str,
    session: &str,
    round: usize,
    field: &str,
) -> Result<u8, ProtocolError> {
    let prefix = format!("{KEY_PREFIX}:{session}:{round}:{field}:");
    let deadline = host.config().protocol_wait().deadline();
    loop {
        let wait = match deadline {
            None => Wait::Forever,
            Some(deadline) => Wait::from(deadline.saturating_duration_since(Instant::now())),
        };
        let stalled = || ProtocolError::KeyExchangeStalled {
            peer: peer.to_owned(),
            session: session.to_owned(),
            round,
        };
        let message = host
            .classical
            .get_next_unread_from_sender(peer, wait)
            .ok_or_else(stalled)?;
        if let Some(value) = message.content.strip_prefix(&prefix) {
            return match value {
                "0" => Ok(0),
                "1" => Ok(1),
                other => Err(ProtocolError::MalformedKeyMessage(other.to_owned())),
            };
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(stalled());
        }
    }
}

/// Sending half of BB84. Each round sends one qubit prepared in a random
/// basis, announces the basis and keeps the bit when the receiver reports a
/// match.
pub(crate) fn run_key_sender(
    host: &Host,
    peer: &str,
    key_size: usize,
    options: SendOptions,
) -> SimResult<Vec<u8>> {
    let session = Uuid::new_v4().to_string();
    let seq = host.sequence_for(
        peer,
        SendOptions {
            await_ack: false,
            ..options
        },
    );
    host.emit(key_request(host.id(), peer, session.clone(), key_size, seq))?;

    let mut rng = rand::thread_rng();
    let mut key = Vec::with_capacity(key_size);
    let mut round = 0;
    while key.len() < key_size {
        let bit: u8 = rng.gen_range(0..=1);
        let basis: u8 = rng.gen_range(0..=1);
        let qubit = host.new_qubit_with_id(round_id(&session, round))?;
        if bit == 1 {
            qubit.x()?;
        }
        if basis == 1 {
            qubit.h()?;
        }
        host.send_qubit(peer, qubit, options)?;
        host.send_classical(
            peer,
            key_message(&session, round, "basis", basis),
            SendOptions::unacked(),
        )?;
        if next_key_message(host, peer, &session, round, "match")? == 1 {
            key.push(bit);
        }
        round += 1;
    }
    info!(host = %host.id(), peer, rounds = round, key_size, "key established");
    host.keys.insert(peer, key.clone());
    Ok(key)
}

/// Receiving half of BB84, run on the worker that decoded the key request.
fn run_key_receiver(host: &Host, sender: &str, session: &str, key_size: usize) -> Result<(), ProtocolError> {
    let mut rng = rand::thread_rng();
    let mut key = Vec::with_capacity(key_size);
    let mut round = 0;
    while key.len() < key_size {
        let qubit = host
            .quantum
            .get_from_host(
                sender,
                Some(&round_id(session, round)),
                Some(Purpose::Data),
                host.config().protocol_wait(),
            )
            .ok_or_else(|| ProtocolError::KeyExchangeStalled {
                peer: sender.to_owned(),
                session: session.to_owned(),
                round,
            })?;
        let basis: u8 = rng.gen_range(0..=1);
        if basis == 1 {
            qubit.h()?;
        }
        let bit = qubit.measure()?;
        let matched = u8::from(next_key_message(host, sender, session, round, "basis")? == basis);
        host.send_classical(
            sender,
            key_message(session, round, "match", matched),
            SendOptions::unacked(),
        )?;
        if matched == 1 {
            key.push(bit);
        }
        round += 1;
    }
    debug!(host = %host.id(), sender, rounds = round, "key received");
    host.keys.insert(sender, key);
    Ok(())
}
