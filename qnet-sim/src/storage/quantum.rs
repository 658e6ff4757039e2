use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use qnet_backend::Qubit;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sync::{ResultSlot, Wait};

/// Why a qubit is being held.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    Data,
    Epr,
    Ghz,
}

/// Capacity rule applied on every insert. Inserts beyond the cap release the
/// incoming qubit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum CapacityPolicy {
    #[default]
    Unlimited,
    /// Bounds the total number of stored qubits.
    Global { limit: usize },
    /// The same bound applied to every peer separately.
    SharedPerPeer { limit: usize },
    /// Per-peer bounds; peers without an entry inherit `default`, and a
    /// missing default means unbounded.
    IndividualPerPeer {
        #[serde(default)]
        default: Option<usize>,
        #[serde(default)]
        limits: BTreeMap<String, usize>,
    },
}

/// Outcome of [`QuantumStorage::add_from_host`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    Stored,
    /// Given directly to a caller blocked on a matching retrieval.
    HandedOff,
    /// Over capacity; the qubit was released.
    Rejected,
}

struct StoredQubit {
    peer: String,
    purpose: Purpose,
    qubit: Qubit,
}

struct Query {
    peer: String,
    id: Option<String>,
    purpose: Option<Purpose>,
}

impl Query {
    fn matches(&self, peer: &str, purpose: Purpose, qubit: &Qubit) -> bool {
        if self.peer != peer || self.purpose.is_some_and(|wanted| wanted != purpose) {
            return false;
        }
        match &self.id {
            Some(id) => qubit.id() == id,
            None => !qubit.blocked(),
        }
    }
}

struct PendingQubit {
    id: u64,
    query: Query,
    slot: Arc<ResultSlot<Qubit>>,
}

#[derive(Default)]
struct QuantumState {
    entries: Vec<StoredQubit>,
    policy: CapacityPolicy,
    requests: Vec<PendingQubit>,
    next_request: u64,
}

impl QuantumState {
    fn has_room(&self, peer: &str) -> bool {
        let held_by_peer = || self.entries.iter().filter(|entry| entry.peer == peer).count();
        match &self.policy {
            CapacityPolicy::Unlimited => true,
            CapacityPolicy::Global { limit } => self.entries.len() < *limit,
            CapacityPolicy::SharedPerPeer { limit } => held_by_peer() < *limit,
            CapacityPolicy::IndividualPerPeer { default, limits } => {
                match limits.get(peer).copied().or(*default) {
                    Some(limit) => held_by_peer() < limit,
                    None => true,
                }
            }
        }
    }

    fn take(&mut self, query: &Query) -> Option<Qubit> {
        let index = self
            .entries
            .iter()
            .position(|entry| query.matches(&entry.peer, entry.purpose, &entry.qubit))?;
        Some(self.entries.remove(index).qubit)
    }
}

/// Qubits held by one host, keyed by (peer, purpose, qubit id).
pub struct QuantumStorage {
    owner: String,
    state: Mutex<QuantumState>,
}

impl std::fmt::Debug for QuantumStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("QuantumStorage")
            .field("owner", &self.owner)
            .field("stored", &state.entries.len())
            .field("policy", &state.policy)
            .finish()
    }
}

impl QuantumStorage {
    pub fn new(owner: impl Into<String>, policy: CapacityPolicy) -> Self {
        Self {
            owner: owner.into(),
            state: Mutex::new(QuantumState {
                policy,
                ..QuantumState::default()
            }),
        }
    }

    pub fn add_from_host(&self, qubit: Qubit, purpose: Purpose, peer: &str) -> Insertion {
        let mut state = self.state.lock();
        let mut qubit = qubit;
        while let Some(index) = state
            .requests
            .iter()
            .position(|request| request.query.matches(peer, purpose, &qubit))
        {
            let request = state.requests.remove(index);
            match request.slot.fill(qubit) {
                Ok(()) => return Insertion::HandedOff,
                Err(returned) => qubit = returned,
            }
        }
        if !state.has_room(peer) {
            drop(state);
            debug!(
                owner = %self.owner,
                peer,
                qubit = %qubit.id(),
                ?purpose,
                "storage full, releasing qubit"
            );
            if let Err(err) = qubit.release() {
                warn!(owner = %self.owner, err = %err, "release of rejected qubit failed");
            }
            return Insertion::Rejected;
        }
        state.entries.push(StoredQubit {
            peer: peer.to_owned(),
            purpose,
            qubit,
        });
        Insertion::Stored
    }

    /// Removes one matching qubit. Without an explicit id, blocked qubits are
    /// passed over.
    pub fn get_from_host(
        &self,
        peer: &str,
        id: Option<&str>,
        purpose: Option<Purpose>,
        wait: Wait,
    ) -> Option<Qubit> {
        let query = Query {
            peer: peer.to_owned(),
            id: id.map(str::to_owned),
            purpose,
        };
        let (request_id, slot) = {
            let mut state = self.state.lock();
            if let Some(qubit) = state.take(&query) {
                return Some(qubit);
            }
            if wait.is_immediate() {
                return None;
            }
            let request_id = state.next_request;
            state.next_request += 1;
            let slot = Arc::new(ResultSlot::new());
            state.requests.push(PendingQubit {
                id: request_id,
                query,
                slot: Arc::clone(&slot),
            });
            (request_id, slot)
        };
        if let Some(qubit) = slot.wait(wait) {
            return Some(qubit);
        }
        let mut state = self.state.lock();
        state.requests.retain(|request| request.id != request_id);
        slot.take()
    }

    /// Removes every unblocked qubit held for `peer`.
    pub fn get_all_from_host(&self, peer: &str, purpose: Option<Purpose>) -> Vec<Qubit> {
        let query = Query {
            peer: peer.to_owned(),
            id: None,
            purpose,
        };
        let mut state = self.state.lock();
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.entries)
            .into_iter()
            .partition(|entry| query.matches(&entry.peer, entry.purpose, &entry.qubit));
        state.entries = kept;
        taken.into_iter().map(|entry| entry.qubit).collect()
    }

    pub fn peek_ids(&self, peer: Option<&str>, purpose: Option<Purpose>) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|entry| peer.map_or(true, |peer| entry.peer == peer))
            .filter(|entry| purpose.map_or(true, |purpose| entry.purpose == purpose))
            .map(|entry| entry.qubit.id().to_owned())
            .collect()
    }

    pub fn contains(&self, peer: &str, id: Option<&str>, purpose: Option<Purpose>) -> bool {
        self.state.lock().entries.iter().any(|entry| {
            entry.peer == peer
                && purpose.map_or(true, |purpose| entry.purpose == purpose)
                && id.map_or(true, |id| entry.qubit.id() == id)
        })
    }

    /// Renames the qubit `old_id` held for `peer`, or the first one when no
    /// id is given.
    pub fn change_id(&self, peer: &str, new_id: &str, old_id: Option<&str>) -> bool {
        let mut state = self.state.lock();
        let target = state.entries.iter_mut().find(|entry| {
            entry.peer == peer && old_id.map_or(true, |old| entry.qubit.id() == old)
        });
        match target {
            Some(entry) => {
                entry.qubit.set_id(new_id);
                true
            }
            None => false,
        }
    }

    pub fn set_blocked(&self, peer: &str, id: &str, blocked: bool) -> bool {
        let mut state = self.state.lock();
        match state
            .entries
            .iter_mut()
            .find(|entry| entry.peer == peer && entry.qubit.id() == id)
        {
            Some(entry) => {
                entry.qubit.set_blocked(blocked);
                true
            }
            None => false,
        }
    }

    pub fn count_stored(&self, peer: Option<&str>) -> usize {
        let state = self.state.lock();
        match peer {
            Some(peer) => state.entries.iter().filter(|entry| entry.peer == peer).count(),
            None => state.entries.len(),
        }
    }

    /// Releases stored qubits, for one peer or all of them.
    pub fn reset(&self, peer: Option<&str>) -> usize {
        let released: Vec<StoredQubit> = {
            let mut state = self.state.lock();
            let (released, kept) = std::mem::take(&mut state.entries)
                .into_iter()
                .partition(|entry| peer.map_or(true, |peer| entry.peer == peer));
            state.entries = kept;
            released
        };
        let count = released.len();
        for entry in released {
            let id = entry.qubit.id().to_owned();
            if let Err(err) = entry.qubit.release() {
                warn!(owner = %self.owner, qubit = %id, err = %err, "release during reset failed");
            }
        }
        count
    }

    pub fn capacity(&self) -> CapacityPolicy {
        self.state.lock().policy.clone()
    }

    pub fn set_capacity(&self, policy: CapacityPolicy) {
        self.state.lock().policy = policy;
    }

    /// Overrides one peer's cap, switching to per-peer limits if needed. A
    /// shared per-peer cap becomes the default for everyone else.
    pub fn set_peer_limit(&self, peer: &str, limit: usize) {
        let mut state = self.state.lock();
        if let CapacityPolicy::IndividualPerPeer { limits, .. } = &mut state.policy {
            limits.insert(peer.to_owned(), limit);
            return;
        }
        let default = match state.policy {
            CapacityPolicy::SharedPerPeer { limit } => Some(limit),
            _ => None,
        };
        state.policy = CapacityPolicy::IndividualPerPeer {
            default,
            limits: BTreeMap::from([(peer.to_owned(), limit)]),
        };
    }
}
