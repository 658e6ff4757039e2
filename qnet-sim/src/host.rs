//! Network participants.
//!
//! A [`Host`] owns its storages and sequencing state. Outbound operations
//! build packets through the protocol engine and queue them on the attached
//! [`Network`]; inbound envelopes arrive on an mpsc inbox drained by a single
//! consumer thread that hands every envelope to a bounded [`WorkerGroup`].

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use parking_lot::{Condvar, Mutex, RwLock};
use qnet_backend::{QuantumBackend, Qubit};
use qnet_telemetry::TelemetryHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::HostConfig,
    error::{SimError, SimResult},
    metrics,
    network::{Layer, Network, NetworkShared},
    packet::{Envelope, Message, Packet, Protocol, RoutingPacket, TeleportPayload},
    protocols,
    sequence::{AckTable, Admission, SequenceWindow},
    storage::{ClassicalStorage, Insertion, Purpose, QuantumStorage},
    sync::Wait,
    worker::WorkerGroup,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Block until the receiver acknowledges.
    pub await_ack: bool,
    /// Send unsequenced; implies no acknowledgement.
    pub no_ack: bool,
    /// Reserve created EPR halves so id-less retrieval skips them.
    pub block: bool,
}

impl SendOptions {
    pub fn acked() -> Self {
        Self {
            await_ack: true,
            ..Self::default()
        }
    }

    pub fn unacked() -> Self {
        Self {
            no_ack: true,
            ..Self::default()
        }
    }

    pub fn blocking(self) -> Self {
        Self {
            block: true,
            ..self
        }
    }

    fn wants_ack(&self) -> bool {
        self.await_ack && !self.no_ack
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckStatus {
    NotRequested,
    Acked,
    TimedOut,
}

impl AckStatus {
    pub fn is_acked(&self) -> bool {
        matches!(self, AckStatus::Acked)
    }
}

/// Result of a send that names a qubit or pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sent {
    pub id: String,
    pub ack: AckStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhzSent {
    pub id: String,
    pub acks: BTreeMap<String, AckStatus>,
}

/// Outcome of [`Host::run_protocol`].
#[derive(Debug)]
pub enum ProtocolRun<T> {
    Finished(thread::Result<T>),
    Running(JoinHandle<T>),
}

impl<T> ProtocolRun<T> {
    /// Waits for a running protocol if necessary.
    pub fn join(self) -> thread::Result<T> {
        match self {
            ProtocolRun::Finished(result) => result,
            ProtocolRun::Running(handle) => handle.join(),
        }
    }
}

/// Observes the quantum payload of packets this host relays.
pub type QuantumSniffer = Arc<dyn Fn(&Packet, &Qubit) + Send + Sync>;
/// Observes classical packets this host relays.
pub type ClassicalSniffer = Arc<dyn Fn(&Packet) + Send + Sync>;

#[derive(Default)]
struct Sniffers {
    quantum: Option<QuantumSniffer>,
    classical: Option<ClassicalSniffer>,
}

#[derive(Default)]
pub(crate) struct KeyStore {
    keys: Mutex<HashMap<String, Vec<u8>>>,
    changed: Condvar,
}

impl KeyStore {
    pub(crate) fn insert(&self, peer: &str, key: Vec<u8>) {
        self.keys.lock().insert(peer.to_owned(), key);
        self.changed.notify_all();
    }

    fn get(&self, peer: &str, wait: Wait) -> Option<Vec<u8>> {
        let deadline = wait.deadline();
        let mut keys = self.keys.lock();
        loop {
            if let Some(key) = keys.get(peer) {
                return Some(key.clone());
            }
            match deadline {
                None => self.changed.wait(&mut keys),
                Some(deadline) => {
                    if self.changed.wait_until(&mut keys, deadline).timed_out() {
                        return keys.get(peer).cloned();
                    }
                }
            }
        }
    }
}

pub struct Host {
    id: String,
    config: HostConfig,
    backend: Arc<dyn QuantumBackend>,
    classical_peers: RwLock<BTreeSet<String>>,
    quantum_peers: RwLock<BTreeSet<String>>,
    pub(crate) classical: ClassicalStorage,
    pub(crate) quantum: QuantumStorage,
    outbound: Mutex<HashMap<String, u64>>,
    inbound: Mutex<HashMap<String, SequenceWindow>>,
    pub(crate) acks: AckTable,
    pub(crate) keys: KeyStore,
    inbox: Mutex<Option<Sender<Envelope>>>,
    unstarted: Mutex<Option<Receiver<Envelope>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    workers: Arc<WorkerGroup>,
    stopped: AtomicBool,
    network: RwLock<Weak<NetworkShared>>,
    telemetry: RwLock<TelemetryHandle>,
    sniffers: RwLock<Sniffers>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id)
            .field("classical_peers", &*self.classical_peers.read())
            .field("quantum_peers", &*self.quantum_peers.read())
            .field("quantum", &self.quantum)
            .field("classical", &self.classical)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Creates a host and registers it with the backend. Envelopes delivered
    /// before [`Host::start`] are buffered.
    pub fn new(id: impl Into<String>, backend: Arc<dyn QuantumBackend>, config: HostConfig) -> Arc<Self> {
        let id = id.into();
        backend.add_host(&id);
        let (tx, rx) = mpsc::channel();
        let acks = AckTable::with_window(config.sequence_window);
        Arc::new(Self {
            quantum: QuantumStorage::new(id.clone(), config.storage.clone()),
            classical: ClassicalStorage::new(),
            workers: WorkerGroup::new(format!("host-{id}"), config.max_workers),
            id,
            config,
            backend,
            classical_peers: RwLock::new(BTreeSet::new()),
            quantum_peers: RwLock::new(BTreeSet::new()),
            outbound: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
            acks,
            keys: KeyStore::default(),
            inbox: Mutex::new(Some(tx)),
            unstarted: Mutex::new(Some(rx)),
            consumer: Mutex::new(None),
            stopped: AtomicBool::new(false),
            network: RwLock::new(Weak::new()),
            telemetry: RwLock::new(TelemetryHandle::default()),
            sniffers: RwLock::new(Sniffers::default()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn QuantumBackend> {
        &self.backend
    }

    pub fn classical_storage(&self) -> &ClassicalStorage {
        &self.classical
    }

    pub fn quantum_storage(&self) -> &QuantumStorage {
        &self.quantum
    }

    // ---- lifecycle ----

    pub fn start(self: &Arc<Self>) -> SimResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SimError::HostStopped(self.id.clone()));
        }
        let Some(inbox) = self.unstarted.lock().take() else {
            return Ok(());
        };
        let host = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("host-{}-consumer", self.id))
            .spawn(move || host.consume(inbox))
            .map_err(SimError::Spawn)?;
        *self.consumer.lock() = Some(handle);
        debug!(host = %self.id, "host started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.consumer.lock().is_some()
    }

    /// Halts the consumer and releases every stored qubit.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inbox.lock().take();
        let consumer = self.consumer.lock().take();
        if let Some(handle) = consumer {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        let unstarted = self.unstarted.lock().take();
        if let Some(inbox) = unstarted {
            inbox.try_iter().for_each(Envelope::discard);
        }
        if !self.workers.is_worker() && !self.workers.wait_idle(self.config.protocol_wait()) {
            warn!(host = %self.id, active = self.workers.active(), "workers still busy at stop");
        }
        let released = self.quantum.reset(None);
        info!(host = %self.id, released, "host stopped");
    }

    fn consume(self: Arc<Self>, inbox: Receiver<Envelope>) {
        for envelope in inbox {
            if self.stopped.load(Ordering::SeqCst) {
                envelope.discard();
                continue;
            }
            let host = Arc::clone(&self);
            if let Err(err) = self.workers.spawn(move || host.process(envelope)) {
                error!(host = %self.id, err = %err, "dropping envelope, no worker available");
            }
        }
        debug!(host = %self.id, "consumer exiting");
    }

    pub(crate) fn deliver(&self, envelope: Envelope) {
        let inbox = self.inbox.lock();
        match inbox.as_ref() {
            Some(tx) => {
                if let Err(mpsc::SendError(envelope)) = tx.send(envelope) {
                    envelope.discard();
                }
            }
            None => {
                debug!(host = %self.id, %envelope, "host stopped, discarding envelope");
                envelope.discard();
            }
        }
    }

    // ---- network attachment ----

    pub(crate) fn attach(&self, shared: Weak<NetworkShared>, telemetry: TelemetryHandle) {
        *self.network.write() = shared;
        *self.telemetry.write() = telemetry;
    }

    pub(crate) fn detach(&self) {
        *self.network.write() = Weak::new();
    }

    pub fn network(&self) -> SimResult<Network> {
        self.network
            .read()
            .upgrade()
            .map(Network::from_shared)
            .ok_or_else(|| SimError::Detached(self.id.clone()))
    }

    pub(crate) fn count(&self, name: &str) {
        if let Err(err) = self.telemetry.read().record_counter(name, 1) {
            warn!(host = %self.id, err = %err, "telemetry counter update failed");
        }
    }

    // ---- connections ----

    pub fn classical_peers(&self) -> Vec<String> {
        self.classical_peers.read().iter().cloned().collect()
    }

    pub fn quantum_peers(&self) -> Vec<String> {
        self.quantum_peers.read().iter().cloned().collect()
    }

    pub fn add_c_connection(&self, peer: &str) {
        self.classical_peers.write().insert(peer.to_owned());
        if let Ok(network) = self.network() {
            network.connect(Layer::Classical, &self.id, peer);
        }
    }

    pub fn add_q_connection(&self, peer: &str) {
        self.quantum_peers.write().insert(peer.to_owned());
        if let Ok(network) = self.network() {
            network.connect(Layer::Quantum, &self.id, peer);
        }
    }

    pub fn add_connection(&self, peer: &str) {
        self.add_c_connection(peer);
        self.add_q_connection(peer);
    }

    pub fn remove_connection(&self, peer: &str) {
        self.classical_peers.write().remove(peer);
        self.quantum_peers.write().remove(peer);
        if let Ok(network) = self.network() {
            network.disconnect(Layer::Classical, &self.id, peer);
            network.disconnect(Layer::Quantum, &self.id, peer);
        }
    }

    pub fn set_quantum_sniffer(&self, sniffer: Option<QuantumSniffer>) {
        self.sniffers.write().quantum = sniffer;
    }

    pub fn set_classical_sniffer(&self, sniffer: Option<ClassicalSniffer>) {
        self.sniffers.write().classical = sniffer;
    }

    // ---- sending ----

    pub(crate) fn next_sequence(&self, peer: &str) -> u64 {
        let mut outbound = self.outbound.lock();
        let next = outbound.entry(peer.to_owned()).or_insert(0);
        let seq = *next;
        *next += 1;
        seq
    }

    /// Sequence number for a send with `options`. Numbers that will never be
    /// acknowledged are settled right away.
    pub(crate) fn sequence_for(&self, peer: &str, options: SendOptions) -> Option<u64> {
        let seq = (!options.no_ack).then(|| self.next_sequence(peer))?;
        if !options.wants_ack() {
            self.acks.settle(peer, seq);
        }
        Some(seq)
    }

    pub(crate) fn emit(&self, packet: Packet) -> SimResult<()> {
        self.emit_envelope(Envelope::Direct(packet))
    }

    fn emit_envelope(&self, envelope: Envelope) -> SimResult<()> {
        match self.network() {
            Ok(network) => {
                network.send(envelope);
                Ok(())
            }
            Err(err) => {
                envelope.discard();
                Err(err)
            }
        }
    }

    fn settle(&self, peer: &str, seq: Option<u64>, options: SendOptions, started: Instant) -> AckStatus {
        let Some(seq) = seq.filter(|_| options.wants_ack()) else {
            return AckStatus::NotRequested;
        };
        if self.acks.await_ack(peer, seq, self.config.ack_wait()) {
            self.telemetry
                .read()
                .record_latency_ms(metrics::ACK_LATENCY_MS, started.elapsed().as_millis() as u64);
            AckStatus::Acked
        } else {
            warn!(host = %self.id, peer, seq, "ack wait timed out");
            self.count(metrics::ACK_TIMEOUT);
            AckStatus::TimedOut
        }
    }

    pub fn send_classical(
        &self,
        peer: &str,
        content: impl Into<String>,
        options: SendOptions,
    ) -> SimResult<AckStatus> {
        let seq = self.sequence_for(peer, options);
        let started = Instant::now();
        let message = Message::new(self.id.clone(), content, seq);
        self.emit(protocols::classical(&self.id, peer, message, seq, options.wants_ack()))?;
        Ok(self.settle(peer, seq, options, started))
    }

    pub fn send_qubit(&self, peer: &str, qubit: Qubit, options: SendOptions) -> SimResult<Sent> {
        let id = qubit.id().to_owned();
        let seq = self.sequence_for(peer, options);
        let started = Instant::now();
        self.emit(protocols::qubit(&self.id, peer, qubit, seq, options.wants_ack()))?;
        Ok(Sent {
            id,
            ack: self.settle(peer, seq, options, started),
        })
    }

    /// Asks the network for an EPR pair shared with `peer`. Both halves carry
    /// the returned id.
    pub fn send_epr(&self, peer: &str, id: Option<String>, options: SendOptions) -> SimResult<Sent> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let seq = self.sequence_for(peer, options);
        let started = Instant::now();
        self.emit(protocols::epr_request(
            &self.id,
            peer,
            id.clone(),
            options.block,
            seq,
            options.wants_ack(),
        ))?;
        Ok(Sent {
            id,
            ack: self.settle(peer, seq, options, started),
        })
    }

    /// Takes an unreserved EPR half shared with `peer`, establishing a fresh
    /// pair when none is stored.
    pub(crate) fn acquire_epr(&self, peer: &str) -> SimResult<Qubit> {
        if let Some(epr) = self
            .quantum
            .get_from_host(peer, None, Some(Purpose::Epr), Wait::Immediate)
        {
            return Ok(epr);
        }
        let sent = self.send_epr(peer, None, SendOptions::acked().blocking())?;
        if !sent.ack.is_acked() {
            return Err(SimError::Timeout(format!("EPR pair with {peer}")));
        }
        self.quantum
            .get_from_host(peer, Some(&sent.id), Some(Purpose::Epr), self.config.protocol_wait())
            .ok_or_else(|| SimError::MissingEpr(peer.to_owned()))
    }

    pub fn send_teleport(&self, peer: &str, qubit: Qubit, options: SendOptions) -> SimResult<AckStatus> {
        self.send_teleport_with(peer, qubit, Purpose::Data, None, options)
    }

    /// Teleports `qubit` to `peer`, which files it as `store_as` under
    /// `partner` (or under this host when absent).
    pub fn send_teleport_with(
        &self,
        peer: &str,
        qubit: Qubit,
        store_as: Purpose,
        partner: Option<String>,
        options: SendOptions,
    ) -> SimResult<AckStatus> {
        let epr = self.acquire_epr(peer)?;
        let epr_id = epr.id().to_owned();
        let qubit_id = qubit.id().to_owned();
        let (m1, m2) = protocols::bell_measure(qubit, epr)?;
        debug!(host = %self.id, peer, epr = %epr_id, m1, m2, "teleport measured");
        let seq = self.sequence_for(peer, options);
        let started = Instant::now();
        let payload = TeleportPayload {
            epr_id,
            qubit_id,
            m1,
            m2,
            store_as,
            partner,
        };
        self.emit(protocols::teleport(&self.id, peer, payload, seq, options.wants_ack()))?;
        Ok(self.settle(peer, seq, options, started))
    }

    /// Sends two classical bits ("00", "01", "10" or "11") in one EPR half.
    pub fn send_superdense(&self, peer: &str, bits: &str, options: SendOptions) -> SimResult<AckStatus> {
        let gates = protocols::superdense_gates(bits)
            .ok_or_else(|| SimError::InvalidSuperdense(bits.to_owned()))?;
        let mut epr = self.acquire_epr(peer)?;
        for gate in gates {
            epr.apply(gate)?;
        }
        epr.set_blocked(false);
        let seq = self.sequence_for(peer, options);
        let started = Instant::now();
        self.emit(protocols::superdense(&self.id, peer, epr, seq, options.wants_ack()))?;
        Ok(self.settle(peer, seq, options, started))
    }

    /// Prepares a GHZ state and sends one share to each peer. Without
    /// `distribute` the host keeps an extra share itself, filed under its
    /// own id.
    pub fn send_ghz(
        &self,
        peers: &[&str],
        id: Option<String>,
        distribute: bool,
        options: SendOptions,
    ) -> SimResult<GhzSent> {
        if peers.is_empty() {
            return Err(SimError::EmptyGhz);
        }
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let root = Qubit::with_id(&self.backend, &self.id, id.clone())?;
        root.h()?;
        let mut shares = Vec::with_capacity(peers.len() + 1);
        for _ in 1..peers.len() + usize::from(!distribute) {
            let share = Qubit::with_id(&self.backend, &self.id, id.clone())?;
            root.cnot(&share)?;
            shares.push(share);
        }
        if distribute {
            shares.insert(0, root);
        } else {
            self.store(root, Purpose::Ghz, &self.id);
        }

        let mut pending = Vec::with_capacity(peers.len());
        for (peer, share) in peers.iter().zip(shares) {
            let seq = self.sequence_for(peer, options);
            self.emit(protocols::ghz(&self.id, peer, share, seq, options.wants_ack()))?;
            pending.push((*peer, seq, Instant::now()));
        }
        let acks = pending
            .into_iter()
            .map(|(peer, seq, started)| (peer.to_owned(), self.settle(peer, seq, options, started)))
            .collect();
        Ok(GhzSent { id, acks })
    }

    /// Runs a BB84 exchange with `peer` and returns the sifted key, which is
    /// also stored on both sides.
    pub fn send_key(&self, peer: &str, key_size: usize, options: SendOptions) -> SimResult<Vec<u8>> {
        protocols::run_key_sender(self, peer, key_size, options)
    }

    /// Unsequenced fan-out to every other registered host. Returns the number
    /// of receivers.
    pub fn send_broadcast(&self, content: &str) -> SimResult<usize> {
        let network = self.network()?;
        let receivers: Vec<String> = network
            .host_ids()
            .into_iter()
            .filter(|id| *id != self.id)
            .collect();
        for receiver in &receivers {
            self.emit(protocols::broadcast(&self.id, receiver, content))?;
        }
        Ok(receivers.len())
    }

    pub(crate) fn send_ack(&self, peer: &str, seq: u64) {
        if let Err(err) = self.emit(protocols::ack(&self.id, peer, seq)) {
            warn!(host = %self.id, peer, seq, err = %err, "unable to send ack");
        }
    }

    /// Runs an application routine against this host on its own thread.
    pub fn run_protocol<F, T>(self: &Arc<Self>, routine: F, blocking: bool) -> SimResult<ProtocolRun<T>>
    where
        F: FnOnce(Arc<Host>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let host = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("host-{}-protocol", self.id))
            .spawn(move || routine(host))
            .map_err(SimError::Spawn)?;
        Ok(if blocking {
            ProtocolRun::Finished(handle.join())
        } else {
            ProtocolRun::Running(handle)
        })
    }

    // ---- receiving ----

    fn process(self: &Arc<Self>, envelope: Envelope) {
        let delay = self.config.processing_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        match envelope {
            Envelope::Direct(packet) => self.receive(packet),
            Envelope::Routed(routing) if routing.final_receiver() == self.id => {
                self.receive(routing.packet)
            }
            Envelope::Routed(routing) => self.relay(routing),
        }
    }

    fn receive(self: &Arc<Self>, packet: Packet) {
        let peer = packet.sender.clone();
        let (protocol, seq, await_ack) = (packet.protocol, packet.seq_num, packet.await_ack);
        if protocol != Protocol::Ack {
            if let Some(seq) = seq {
                let admission = self
                    .inbound
                    .lock()
                    .entry(peer.clone())
                    .or_insert_with(|| SequenceWindow::new(self.config.sequence_window))
                    .record(seq);
                if admission != Admission::Fresh {
                    debug!(host = %self.id, peer = %peer, seq, ?admission, "discarding packet");
                    packet.discard();
                    return;
                }
            }
        }
        match protocols::receive(self, packet) {
            Ok(()) => {
                if let (true, Some(seq)) = (await_ack, seq) {
                    self.send_ack(&peer, seq);
                }
            }
            Err(err) => {
                error!(host = %self.id, peer = %peer, %protocol, err = %err, "dropping packet");
                self.count(metrics::PROTOCOL_ERROR);
            }
        }
    }

    fn relay(&self, routing: RoutingPacket) {
        let Some(routing) = protocols::relay(routing, &self.id) else {
            self.count(metrics::TTL_EXPIRED);
            return;
        };
        {
            let sniffers = self.sniffers.read();
            match (&sniffers.quantum, &sniffers.classical, routing.packet.qubit()) {
                (Some(sniff), _, Some(qubit)) => sniff(&routing.packet, qubit),
                (_, Some(sniff), None) => sniff(&routing.packet),
                _ => {}
            }
        }
        self.count(metrics::RELAYED);
        if let Err(err) = self.emit_envelope(Envelope::Routed(routing)) {
            warn!(host = %self.id, err = %err, "relay failed");
        }
    }

    /// Files a qubit, counting capacity rejections. A stopped host releases
    /// the qubit instead.
    pub(crate) fn store(&self, qubit: Qubit, purpose: Purpose, peer: &str) -> Insertion {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(host = %self.id, qubit = %qubit.id(), "host stopped, releasing qubit");
            drop(qubit);
            return Insertion::Rejected;
        }
        let insertion = self.quantum.add_from_host(qubit, purpose, peer);
        if insertion == Insertion::Rejected {
            self.count(metrics::STORAGE_EVICTED);
        }
        insertion
    }

    // ---- retrieval ----

    pub fn get_classical(&self, peer: &str, wait: Wait) -> Vec<Message> {
        self.classical.get_all_from_sender(peer, wait)
    }

    pub fn get_next_classical(&self, peer: &str, wait: Wait) -> Option<Message> {
        self.classical.get_next_unread_from_sender(peer, wait)
    }

    pub fn get_all_classical(&self) -> Vec<Message> {
        self.classical.get_all()
    }

    pub fn empty_classical(&self) {
        self.classical.empty();
    }

    pub fn get_epr(&self, peer: &str, id: Option<&str>, wait: Wait) -> Option<Qubit> {
        self.quantum.get_from_host(peer, id, Some(Purpose::Epr), wait)
    }

    pub fn get_epr_pairs(&self, peer: &str) -> Vec<Qubit> {
        self.quantum.get_all_from_host(peer, Some(Purpose::Epr))
    }

    pub fn get_ghz(&self, peer: &str, wait: Wait) -> Option<Qubit> {
        self.quantum.get_from_host(peer, None, Some(Purpose::Ghz), wait)
    }

    pub fn get_data_qubit(&self, peer: &str, id: Option<&str>, wait: Wait) -> Option<Qubit> {
        self.quantum.get_from_host(peer, id, Some(Purpose::Data), wait)
    }

    pub fn shares_epr(&self, peer: &str) -> bool {
        self.quantum.contains(peer, None, Some(Purpose::Epr))
    }

    pub fn get_key(&self, peer: &str, wait: Wait) -> Option<Vec<u8>> {
        self.keys.get(peer, wait)
    }

    pub fn new_qubit(&self) -> SimResult<Qubit> {
        Ok(Qubit::new(&self.backend, &self.id)?)
    }

    pub fn new_qubit_with_id(&self, id: impl Into<String>) -> SimResult<Qubit> {
        Ok(Qubit::with_id(&self.backend, &self.id, id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnet_backend::StateVectorBackend;

    fn host(id: &str) -> Arc<Host> {
        Host::new(id, Arc::new(StateVectorBackend::seeded(2)), HostConfig::default())
    }

    #[test]
    fn sequence_numbers_are_per_peer_and_start_at_zero() {
        let host = host("alice");
        assert_eq!(host.next_sequence("bob"), 0);
        assert_eq!(host.next_sequence("bob"), 1);
        assert_eq!(host.next_sequence("carol"), 0);
        assert_eq!(host.sequence_for("bob", SendOptions::unacked()), None);
        assert_eq!(host.sequence_for("bob", SendOptions::default()), Some(2));
    }

    #[test]
    fn unacknowledged_sequence_numbers_leave_no_ack_gap() {
        let host = host("alice");
        assert_eq!(host.sequence_for("bob", SendOptions::default()), Some(0));
        for _ in 0..200 {
            let seq = host.sequence_for("bob", SendOptions::acked()).unwrap();
            host.acks.acknowledge("bob", seq);
        }
        assert_eq!(host.acks.buffered("bob"), 0);
        assert!(host.acks.is_acked("bob", 200));
    }

    #[test]
    fn late_packet_after_gap_is_delivered_once() {
        let config = HostConfig {
            sequence_window: 3,
            ..HostConfig::default()
        };
        let host = Host::new("bob", Arc::new(StateVectorBackend::seeded(3)), config);
        for seq in [0, 5, 1, 1] {
            let message = Message::new("alice", format!("m{seq}"), Some(seq));
            host.receive(protocols::classical("alice", "bob", message, Some(seq), false));
        }
        let contents: Vec<String> = host
            .get_all_classical()
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(contents, vec!["m0", "m5", "m1"]);
    }

    #[test]
    fn duplicate_qubit_is_released_without_storing() {
        let host = host("bob");
        for _ in 0..2 {
            let qubit = host.new_qubit_with_id("q").unwrap();
            host.receive(protocols::qubit("alice", "bob", qubit, Some(0), false));
        }
        assert_eq!(host.quantum_storage().count_stored(None), 1);
        assert_eq!(host.backend().live_qubits(), 1);
    }

    #[test]
    fn detached_host_reports_error() {
        let host = host("alice");
        let err = host
            .send_classical("bob", "hi", SendOptions::default())
            .unwrap_err();
        assert!(matches!(err, SimError::Detached(id) if id == "alice"));
    }

    #[test]
    fn connections_tracked_without_network() {
        let host = host("alice");
        host.add_connection("bob");
        host.add_c_connection("carol");
        assert_eq!(host.classical_peers(), vec!["bob", "carol"]);
        assert_eq!(host.quantum_peers(), vec!["bob"]);
        host.remove_connection("bob");
        assert_eq!(host.quantum_peers(), Vec::<String>::new());
    }

    #[test]
    fn stop_releases_stored_qubits_and_refuses_restart() {
        let host = host("alice");
        host.start().unwrap();
        let qubit = host.new_qubit_with_id("q").unwrap();
        host.store(qubit, Purpose::Data, "bob");
        assert_eq!(host.backend().live_qubits(), 1);
        host.stop();
        assert_eq!(host.backend().live_qubits(), 0);
        assert!(matches!(host.start(), Err(SimError::HostStopped(_))));
    }

    #[test]
    fn stop_waits_for_busy_workers_before_releasing() {
        let host = host("alice");
        let worker = Arc::clone(&host);
        host.workers
            .spawn(move || {
                thread::sleep(std::time::Duration::from_millis(50));
                let qubit = worker.new_qubit_with_id("late").unwrap();
                worker.store(qubit, Purpose::Data, "bob");
            })
            .unwrap();
        host.stop();
        assert_eq!(host.quantum_storage().count_stored(None), 0);
        assert_eq!(host.backend().live_qubits(), 0);
    }

    #[test]
    fn blocking_protocol_run_returns_result() {
        let host = host("alice");
        let run = host
            .run_protocol(|host| host.id().to_uppercase(), true)
            .unwrap();
        assert_eq!(run.join().unwrap(), "ALICE");
    }

    #[test]
    fn key_wait_times_out_without_exchange() {
        let host = host("alice");
        assert!(host.get_key("bob", Wait::millis(10)).is_none());
        host.keys.insert("bob", vec![1, 0, 1]);
        assert_eq!(host.get_key("bob", Wait::Immediate), Some(vec![1, 0, 1]));
    }
}
