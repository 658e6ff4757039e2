//! The shared network.
//!
//! Hosts queue [`Envelope`]s here. One dispatcher thread keeps a FIFO queue
//! per emitting host and admits at most one envelope per sender at a time to a
//! bounded [`WorkerGroup`]; each worker applies the hop delay, loss models and
//! routing, then delivers to the next host's inbox. EPR requests never reach a
//! host as such: the network establishes the pair and delivers the far half.

pub(crate) mod entanglement;
mod topology;

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex, RwLock};
use qnet_backend::{QuantumBackend, Qubit};
use qnet_telemetry::TelemetryHandle;
use rand::Rng;
use tracing::{debug, error, info, trace, warn};

pub use topology::{shortest_path_routing, Graph, RouteFn, TopologyShape};

use crate::{
    channel::{ClassicalChannel, Lossless, Noiseless, QuantumChannel},
    config::{HostConfig, NetworkConfig, SimulationConfig},
    error::{SimError, SimResult},
    host::Host,
    metrics,
    packet::{Envelope, Packet, Payload, Protocol, RoutingPacket, Signal},
    storage::Purpose,
    sync::Wait,
    worker::WorkerGroup,
};

/// Which reachability graph an operation applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Classical,
    Quantum,
}

#[derive(Default)]
struct SenderQueue {
    packets: VecDeque<Envelope>,
    /// An envelope from this sender is currently being dispatched.
    active: bool,
}

type Link = (String, String);

pub(crate) struct NetworkShared {
    config: RwLock<NetworkConfig>,
    host_config: HostConfig,
    backend: Arc<dyn QuantumBackend>,
    hosts: RwLock<HashMap<String, Arc<Host>>>,
    classical: RwLock<Graph>,
    quantum: RwLock<Graph>,
    classical_routing: RwLock<RouteFn>,
    quantum_routing: RwLock<RouteFn>,
    quantum_channels: RwLock<HashMap<Link, Arc<dyn QuantumChannel>>>,
    classical_channels: RwLock<HashMap<Link, Arc<dyn ClassicalChannel>>>,
    default_quantum_channel: RwLock<Arc<dyn QuantumChannel>>,
    default_classical_channel: RwLock<Arc<dyn ClassicalChannel>>,
    queues: RwLock<HashMap<String, Mutex<SenderQueue>>>,
    signal: Mutex<u64>,
    wake: Condvar,
    running: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    workers: Arc<WorkerGroup>,
    telemetry: TelemetryHandle,
}

/// Cloneable handle to a simulated network.
#[derive(Clone)]
pub struct Network {
    shared: Arc<NetworkShared>,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("hosts", &self.host_ids())
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .field("backend", &self.shared.backend.name())
            .finish()
    }
}

impl Network {
    /// Network with default configuration and no hosts.
    pub fn new(backend: Arc<dyn QuantumBackend>) -> Self {
        Self::build(
            backend,
            NetworkConfig::default(),
            HostConfig::default(),
            TelemetryHandle::default(),
        )
    }

    /// Validates `config`, applies it and generates the configured topology.
    pub fn from_config(backend: Arc<dyn QuantumBackend>, config: &SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        let network = Self::build(
            backend,
            config.network.clone(),
            config.host.clone(),
            TelemetryHandle::from_config(config.telemetry.clone()),
        );
        if let Some(topology) = &config.topology {
            let ids: Vec<&str> = topology.hosts.iter().map(String::as_str).collect();
            network.generate_topology(&ids, topology.shape)?;
        }
        Ok(network)
    }

    fn build(
        backend: Arc<dyn QuantumBackend>,
        config: NetworkConfig,
        host_config: HostConfig,
        telemetry: TelemetryHandle,
    ) -> Self {
        let workers = WorkerGroup::new("qnet-net", config.max_workers);
        Self {
            shared: Arc::new(NetworkShared {
                config: RwLock::new(config),
                host_config,
                backend,
                hosts: RwLock::new(HashMap::new()),
                classical: RwLock::new(Graph::new()),
                quantum: RwLock::new(Graph::new()),
                classical_routing: RwLock::new(shortest_path_routing()),
                quantum_routing: RwLock::new(shortest_path_routing()),
                quantum_channels: RwLock::new(HashMap::new()),
                classical_channels: RwLock::new(HashMap::new()),
                default_quantum_channel: RwLock::new(Arc::new(Noiseless)),
                default_classical_channel: RwLock::new(Arc::new(Lossless)),
                queues: RwLock::new(HashMap::new()),
                signal: Mutex::new(0),
                wake: Condvar::new(),
                running: AtomicBool::new(false),
                dispatcher: Mutex::new(None),
                workers,
                telemetry,
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<NetworkShared>) -> Self {
        Self { shared }
    }

    pub fn backend(&self) -> &Arc<dyn QuantumBackend> {
        &self.shared.backend
    }

    pub fn telemetry(&self) -> TelemetryHandle {
        self.shared.telemetry.clone()
    }

    pub fn config(&self) -> NetworkConfig {
        self.shared.config.read().clone()
    }

    /// Configuration handed to hosts created through [`Network::create_host`].
    pub fn host_config(&self) -> &HostConfig {
        &self.shared.host_config
    }

    // ---- hosts ----

    pub fn create_host(&self, id: &str) -> SimResult<Arc<Host>> {
        let host = Host::new(
            id,
            Arc::clone(&self.shared.backend),
            self.shared.host_config.clone(),
        );
        self.add_host(Arc::clone(&host))?;
        Ok(host)
    }

    /// Registers `host`, wires its connections into both graphs and attaches
    /// it. A host added to a running network is started.
    pub fn add_host(&self, host: Arc<Host>) -> SimResult<()> {
        {
            let mut hosts = self.shared.hosts.write();
            if hosts.contains_key(host.id()) {
                return Err(SimError::DuplicateHost(host.id().to_owned()));
            }
            hosts.insert(host.id().to_owned(), Arc::clone(&host));
        }
        self.wire(&host);
        host.attach(Arc::downgrade(&self.shared), self.shared.telemetry.clone());
        debug!(host = %host.id(), "host added");
        if self.is_running() {
            host.start()?;
        }
        Ok(())
    }

    /// Replaces a registered host and rebuilds its edges.
    pub fn update_host(&self, host: Arc<Host>) -> SimResult<()> {
        let previous = {
            let mut hosts = self.shared.hosts.write();
            if !hosts.contains_key(host.id()) {
                return Err(SimError::UnknownHost(host.id().to_owned()));
            }
            hosts.insert(host.id().to_owned(), Arc::clone(&host))
        };
        if let Some(previous) = previous.filter(|previous| !Arc::ptr_eq(previous, &host)) {
            previous.detach();
        }
        self.shared.classical.write().remove_node(host.id());
        self.shared.quantum.write().remove_node(host.id());
        self.wire(&host);
        host.attach(Arc::downgrade(&self.shared), self.shared.telemetry.clone());
        Ok(())
    }

    pub fn remove_host(&self, id: &str) -> Option<Arc<Host>> {
        let host = self.shared.hosts.write().remove(id)?;
        self.shared.classical.write().remove_node(id);
        self.shared.quantum.write().remove_node(id);
        host.detach();
        debug!(host = id, "host removed");
        Some(host)
    }

    fn wire(&self, host: &Arc<Host>) {
        let id = host.id();
        let others: Vec<Arc<Host>> = self
            .shared
            .hosts
            .read()
            .values()
            .filter(|other| other.id() != id)
            .cloned()
            .collect();
        {
            let mut graph = self.shared.classical.write();
            graph.add_node(id);
            for peer in host.classical_peers() {
                graph.add_edge(id, &peer);
            }
            for other in others.iter().filter(|o| o.classical_peers().iter().any(|p| p == id)) {
                graph.add_edge(other.id(), id);
            }
        }
        let mut graph = self.shared.quantum.write();
        graph.add_node(id);
        for peer in host.quantum_peers() {
            graph.add_edge(id, &peer);
        }
        for other in others.iter().filter(|o| o.quantum_peers().iter().any(|p| p == id)) {
            graph.add_edge(other.id(), id);
        }
    }

    pub fn get_host(&self, id: &str) -> Option<Arc<Host>> {
        self.shared.hosts.read().get(id).cloned()
    }

    pub fn host_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.hosts.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Both hosts hold an EPR half filed under the other.
    pub fn shares_epr(&self, a: &str, b: &str) -> bool {
        match (self.get_host(a), self.get_host(b)) {
            (Some(host_a), Some(host_b)) => host_a.shares_epr(b) && host_b.shares_epr(a),
            _ => false,
        }
    }

    /// Creates any missing hosts and connects them in `shape`. Links are
    /// added in both directions on both layers.
    pub fn generate_topology(&self, ids: &[&str], shape: TopologyShape) -> SimResult<Vec<Arc<Host>>> {
        let hosts = ids
            .iter()
            .map(|id| match self.get_host(id) {
                Some(host) => Ok(host),
                None => self.create_host(id),
            })
            .collect::<SimResult<Vec<_>>>()?;
        for (a, b) in shape.links(hosts.len()) {
            hosts[a].add_connection(hosts[b].id());
            hosts[b].add_connection(hosts[a].id());
        }
        info!(hosts = hosts.len(), ?shape, "topology generated");
        Ok(hosts)
    }

    // ---- routing ----

    pub(crate) fn connect(&self, layer: Layer, from: &str, to: &str) {
        self.shared.graph(layer).write().add_edge(from, to);
    }

    pub(crate) fn disconnect(&self, layer: Layer, from: &str, to: &str) {
        self.shared.graph(layer).write().remove_edge(from, to);
    }

    pub fn get_classical_route(&self, from: &str, to: &str) -> Option<Vec<String>> {
        self.shared.route(Layer::Classical, from, to)
    }

    pub fn get_quantum_route(&self, from: &str, to: &str) -> Option<Vec<String>> {
        self.shared.route(Layer::Quantum, from, to)
    }

    pub fn set_classical_routing(&self, routing: RouteFn) {
        *self.shared.classical_routing.write() = routing;
    }

    pub fn set_quantum_routing(&self, routing: RouteFn) {
        *self.shared.quantum_routing.write() = routing;
    }

    pub fn classical_graph(&self) -> Graph {
        self.shared.classical.read().clone()
    }

    pub fn quantum_graph(&self) -> Graph {
        self.shared.quantum.read().clone()
    }

    // ---- knobs ----

    pub fn set_delay(&self, hop_delay_ms: u64) {
        self.shared.config.write().hop_delay_ms = hop_delay_ms;
    }

    pub fn set_drop_probability(&self, probability: f64) -> SimResult<()> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(SimError::InvalidProbability(probability));
        }
        self.shared.config.write().drop_probability = probability;
        Ok(())
    }

    pub fn set_use_hop_by_hop(&self, enabled: bool) {
        self.shared.config.write().use_hop_by_hop = enabled;
    }

    pub fn set_use_ent_swap(&self, enabled: bool) {
        self.shared.config.write().use_ent_swap = enabled;
    }

    pub fn set_ttl(&self, ttl: u32) {
        self.shared.config.write().ttl = ttl;
    }

    pub fn set_quantum_channel(&self, from: &str, to: &str, channel: Arc<dyn QuantumChannel>) {
        self.shared
            .quantum_channels
            .write()
            .insert((from.to_owned(), to.to_owned()), channel);
    }

    pub fn set_classical_channel(&self, from: &str, to: &str, channel: Arc<dyn ClassicalChannel>) {
        self.shared
            .classical_channels
            .write()
            .insert((from.to_owned(), to.to_owned()), channel);
    }

    pub fn set_default_quantum_channel(&self, channel: Arc<dyn QuantumChannel>) {
        *self.shared.default_quantum_channel.write() = channel;
    }

    pub fn set_default_classical_channel(&self, channel: Arc<dyn ClassicalChannel>) {
        *self.shared.default_classical_channel.write() = channel;
    }

    // ---- queueing and lifecycle ----

    /// Queues an envelope behind earlier ones from the same sender.
    pub fn send(&self, envelope: Envelope) {
        trace!(%envelope, "queued");
        let sender = envelope.sender().to_owned();
        let mut queued = Some(envelope);
        if let Some(queue) = self.shared.queues.read().get(&sender) {
            if let Some(envelope) = queued.take() {
                queue.lock().packets.push_back(envelope);
            }
        }
        if let Some(envelope) = queued {
            self.shared
                .queues
                .write()
                .entry(sender)
                .or_default()
                .get_mut()
                .packets
                .push_back(envelope);
        }
        self.shared.notify();
    }

    /// Envelopes queued but not yet admitted for dispatch.
    pub fn pending(&self) -> usize {
        self.shared
            .queues
            .read()
            .values()
            .map(|queue| queue.lock().packets.len())
            .sum()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Starts the dispatcher, then the listed hosts (every host when `None`).
    pub fn start(&self, hosts: Option<&[&str]>) -> SimResult<()> {
        if !self.shared.running.swap(true, Ordering::SeqCst) {
            let shared = Arc::downgrade(&self.shared);
            let spawned = thread::Builder::new()
                .name("qnet-dispatch".into())
                .spawn(move || run_dispatcher(shared));
            match spawned {
                Ok(handle) => *self.shared.dispatcher.lock() = Some(handle),
                Err(err) => {
                    self.shared.running.store(false, Ordering::SeqCst);
                    return Err(SimError::Spawn(err));
                }
            }
            info!("network started");
        }
        let targets = match hosts {
            Some(ids) => ids
                .iter()
                .map(|id| self.get_host(id).ok_or_else(|| SimError::UnknownHost((*id).to_owned())))
                .collect::<SimResult<Vec<_>>>()?,
            None => self.shared.hosts.read().values().cloned().collect(),
        };
        for host in targets {
            host.start()?;
        }
        Ok(())
    }

    /// Stops dispatching and discards queued envelopes. With `stop_hosts`
    /// every host is stopped as well, releasing its stored qubits.
    pub fn stop(&self, stop_hosts: bool) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.notify();
        let dispatcher = self.shared.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            let _ = handle.join();
        }
        let drained: Vec<Envelope> = self
            .shared
            .queues
            .write()
            .values_mut()
            .flat_map(|queue| queue.get_mut().packets.drain(..).collect::<Vec<_>>())
            .collect();
        let discarded = drained.len();
        drained.into_iter().for_each(Envelope::discard);
        self.shared.workers.wait_idle(Wait::Forever);
        if stop_hosts {
            let hosts: Vec<Arc<Host>> = self.shared.hosts.read().values().cloned().collect();
            for host in hosts {
                host.stop();
            }
        }
        info!(discarded, "network stopped");
    }
}

fn run_dispatcher(shared: Weak<NetworkShared>) {
    loop {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        let generation = *shared.signal.lock();
        shared.admit();
        let tick = shared.config.read().tick();
        let mut signal = shared.signal.lock();
        if *signal == generation && shared.running.load(Ordering::SeqCst) {
            shared.wake.wait_for(&mut signal, tick);
        }
    }
    debug!("dispatcher exiting");
}

/// Marks a sender's queue idle again once its envelope has been dispatched.
struct InFlight {
    shared: Arc<NetworkShared>,
    sender: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.finish(&self.sender);
    }
}

impl NetworkShared {
    fn graph(&self, layer: Layer) -> &RwLock<Graph> {
        match layer {
            Layer::Classical => &self.classical,
            Layer::Quantum => &self.quantum,
        }
    }

    fn route(&self, layer: Layer, from: &str, to: &str) -> Option<Vec<String>> {
        let routing = match layer {
            Layer::Classical => self.classical_routing.read().clone(),
            Layer::Quantum => self.quantum_routing.read().clone(),
        };
        let graph = self.graph(layer).read();
        routing(&graph, from, to)
    }

    fn notify(&self) {
        *self.signal.lock() += 1;
        self.wake.notify_all();
    }

    fn count(&self, name: &str) {
        if let Err(err) = self.telemetry.record_counter(name, 1) {
            warn!(err = %err, counter = name, "telemetry counter update failed");
        }
    }

    /// Hands the head of every idle sender queue to a worker.
    fn admit(self: &Arc<Self>) {
        let ready: Vec<Envelope> = self
            .queues
            .read()
            .values()
            .filter_map(|queue| {
                let mut queue = queue.lock();
                if queue.active {
                    return None;
                }
                let envelope = queue.packets.pop_front()?;
                queue.active = true;
                Some(envelope)
            })
            .collect();
        for envelope in ready {
            let guard = InFlight {
                shared: Arc::clone(self),
                sender: envelope.sender().to_owned(),
            };
            let shared = Arc::clone(self);
            let spawned = self.workers.spawn(move || {
                let _guard = guard;
                shared.dispatch(envelope);
            });
            if let Err(err) = spawned {
                error!(err = %err, "unable to dispatch envelope");
            }
        }
    }

    fn finish(&self, sender: &str) {
        if let Some(queue) = self.queues.read().get(sender) {
            queue.lock().active = false;
        }
        self.notify();
    }

    fn dispatch(&self, envelope: Envelope) {
        let (delay, drop_probability) = {
            let config = self.config.read();
            (config.hop_delay(), config.drop_probability)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.count(metrics::DISPATCHED);
        if drop_probability > 0.0 && rand::thread_rng().gen_bool(drop_probability) {
            debug!(%envelope, "packet dropped");
            self.count(metrics::DROPPED);
            envelope.discard();
            return;
        }
        match envelope {
            Envelope::Direct(Packet {
                sender,
                receiver,
                payload: Payload::Signal(Signal::EprRequest { id, blocked }),
                seq_num,
                await_ack,
                ..
            }) => self.establish_epr(&sender, &receiver, id, blocked, seq_num, await_ack),
            Envelope::Direct(packet) => self.route_direct(packet),
            Envelope::Routed(routing) => self.forward(routing),
        }
    }

    fn route_direct(&self, packet: Packet) {
        let layer = if packet.is_quantum() {
            Layer::Quantum
        } else {
            Layer::Classical
        };
        let route = self
            .route(layer, &packet.sender, &packet.receiver)
            .filter(|route| route.len() >= 2);
        let Some(route) = route else {
            warn!(sender = %packet.sender, receiver = %packet.receiver, ?layer, "no route");
            self.count(metrics::NO_ROUTE);
            packet.discard();
            return;
        };
        if route.len() == 2 {
            let (from, to) = (packet.sender.clone(), packet.receiver.clone());
            self.hop(&from, &to, Envelope::Direct(packet));
            return;
        }
        let (ttl, hop_by_hop) = {
            let config = self.config.read();
            (config.ttl, config.use_hop_by_hop)
        };
        let next = route[1].clone();
        let receiver = if hop_by_hop {
            next.clone()
        } else {
            packet.receiver.clone()
        };
        let from = packet.sender.clone();
        let routing = RoutingPacket {
            sender: from.clone(),
            receiver,
            ttl,
            route,
            packet,
        };
        self.hop(&from, &next, Envelope::Routed(routing));
    }

    /// Moves a relayed packet one step closer to its destination.
    fn forward(&self, mut routing: RoutingPacket) {
        let layer = if routing.packet.is_quantum() {
            Layer::Quantum
        } else {
            Layer::Classical
        };
        let hop_by_hop = self.config.read().use_hop_by_hop;
        let next = if hop_by_hop {
            self.route(layer, &routing.sender, routing.final_receiver())
                .and_then(|route| route.get(1).cloned())
        } else {
            routing.next_hop_after(&routing.sender).map(str::to_owned)
        };
        let Some(next) = next else {
            warn!(via = %routing.sender, dst = %routing.final_receiver(), "no onward route");
            self.count(metrics::NO_ROUTE);
            routing.packet.discard();
            return;
        };
        routing.receiver = if hop_by_hop {
            next.clone()
        } else {
            routing.final_receiver().to_owned()
        };
        let from = routing.sender.clone();
        self.hop(&from, &next, Envelope::Routed(routing));
    }

    /// One link traversal: classical loss, then the quantum channel, then
    /// delivery to `to`.
    fn hop(&self, from: &str, to: &str, envelope: Envelope) {
        let survival = self.classical_channel(from, to).transmission_probability();
        if survival < 1.0 && !rand::thread_rng().gen_bool(survival) {
            debug!(%envelope, "lost on classical link");
            self.count(metrics::DROPPED);
            envelope.discard();
            return;
        }
        let carried = match envelope {
            Envelope::Direct(packet) => packet
                .map_qubit(|qubit| self.transmit_qubit(from, to, qubit))
                .map(Envelope::Direct),
            Envelope::Routed(RoutingPacket {
                sender,
                receiver,
                ttl,
                route,
                packet,
            }) => packet
                .map_qubit(|qubit| self.transmit_qubit(from, to, qubit))
                .map(|packet| {
                    Envelope::Routed(RoutingPacket {
                        sender,
                        receiver,
                        ttl,
                        route,
                        packet,
                    })
                }),
        };
        let Some(envelope) = carried else {
            self.count(metrics::QUBIT_LOST);
            return;
        };
        self.deliver(to, envelope);
    }

    fn deliver(&self, to: &str, envelope: Envelope) {
        let Some(host) = self.hosts.read().get(to).cloned() else {
            warn!(host = to, %envelope, "receiver not registered, discarding");
            envelope.discard();
            return;
        };
        trace!(%envelope, "delivering");
        host.deliver(envelope);
        self.count(metrics::DELIVERED);
    }

    /// Moves `qubit` to `to` through the link's quantum channel.
    fn transmit_qubit(&self, from: &str, to: &str, mut qubit: Qubit) -> Option<Qubit> {
        if let Err(err) = qubit.transfer_to(to) {
            warn!(qubit = %qubit.id(), from, to, err = %err, "qubit transfer failed");
            return None;
        }
        self.quantum_channel(from, to).transmit(qubit)
    }

    fn quantum_channel(&self, from: &str, to: &str) -> Arc<dyn QuantumChannel> {
        let link = (from.to_owned(), to.to_owned());
        match self.quantum_channels.read().get(&link) {
            Some(channel) => Arc::clone(channel),
            None => Arc::clone(&self.default_quantum_channel.read()),
        }
    }

    fn classical_channel(&self, from: &str, to: &str) -> Arc<dyn ClassicalChannel> {
        let link = (from.to_owned(), to.to_owned());
        match self.classical_channels.read().get(&link) {
            Some(channel) => Arc::clone(channel),
            None => Arc::clone(&self.default_classical_channel.read()),
        }
    }

    /// Creates the pair for an EPR request, files the near half at the
    /// sender and delivers the far half to the receiver.
    fn establish_epr(
        &self,
        sender: &str,
        receiver: &str,
        id: String,
        blocked: bool,
        seq_num: Option<u64>,
        await_ack: bool,
    ) {
        let route = self
            .route(Layer::Quantum, sender, receiver)
            .filter(|route| route.len() >= 2);
        let Some(route) = route else {
            warn!(sender, receiver, "no quantum route for EPR pair");
            self.count(metrics::NO_ROUTE);
            return;
        };
        let pair = match self.create_pair(&route, &id) {
            Ok(pair) => pair,
            Err(err) => {
                error!(sender, receiver, epr = %id, err = %err, "EPR establishment failed");
                return;
            }
        };
        let Some((mut near, mut far)) = pair else {
            self.count(metrics::QUBIT_LOST);
            return;
        };
        near.set_blocked(blocked);
        far.set_blocked(blocked);
        match self.hosts.read().get(sender).cloned() {
            Some(host) => {
                host.store(near, Purpose::Epr, receiver);
            }
            None => drop(near),
        }
        debug!(sender, receiver, epr = %id, hops = route.len() - 1, "EPR pair established");
        let packet = Packet::new(
            sender,
            receiver,
            Protocol::Epr,
            Payload::Quantum(far),
            seq_num,
            await_ack,
        );
        self.deliver(receiver, Envelope::Direct(packet));
    }

    /// `None` means the far half was lost on a single-hop link.
    fn create_pair(&self, route: &[String], id: &str) -> SimResult<Option<(Qubit, Qubit)>> {
        let (sender, receiver) = (&route[0], &route[route.len() - 1]);
        if route.len() == 2 {
            let (near, far) = Qubit::epr_pair(&self.backend, sender, sender, Some(id.to_owned()))?;
            return Ok(self
                .transmit_qubit(sender, receiver, far)
                .map(|far| (near, far)));
        }
        let (delay, swap) = {
            let config = self.config.read();
            (config.hop_delay(), config.use_ent_swap)
        };
        let pair = if swap {
            self.count(metrics::EPR_SWAPPED);
            entanglement::swap_chain(&self.backend, route, id)?
        } else {
            self.count(metrics::EPR_FABRICATED);
            entanglement::fabricate(&self.backend, sender, receiver, id)?
        };
        let hops = (route.len() - 1) as u32;
        if !delay.is_zero() {
            thread::sleep(delay * 2 * hops);
        }
        Ok(Some(pair))
    }
}

impl Drop for NetworkShared {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for host in self.hosts.get_mut().values() {
            host.stop();
        }
    }
}
