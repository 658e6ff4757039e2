use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    packet::Message,
    sync::{ResultSlot, Wait},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadMode {
    All,
    NextUnread,
}

struct Entry {
    message: Message,
    read: bool,
}

struct PendingRead {
    id: u64,
    sender: String,
    mode: ReadMode,
    slot: Arc<ResultSlot<Vec<Message>>>,
}

#[derive(Default)]
struct ClassicalState {
    entries: Vec<Entry>,
    requests: Vec<PendingRead>,
    next_request: u64,
}

impl ClassicalState {
    fn collect(&mut self, sender: &str, mode: ReadMode) -> Vec<Message> {
        match mode {
            ReadMode::All => self
                .entries
                .iter()
                .filter(|entry| entry.message.sender == sender)
                .map(|entry| entry.message.clone())
                .collect(),
            ReadMode::NextUnread => self
                .entries
                .iter_mut()
                .find(|entry| !entry.read && entry.message.sender == sender)
                .map(|entry| {
                    entry.read = true;
                    vec![entry.message.clone()]
                })
                .unwrap_or_default(),
        }
    }

    fn register(&mut self, sender: &str, mode: ReadMode) -> (u64, Arc<ResultSlot<Vec<Message>>>) {
        let id = self.next_request;
        self.next_request += 1;
        let slot = Arc::new(ResultSlot::new());
        self.requests.push(PendingRead {
            id,
            sender: sender.to_owned(),
            mode,
            slot: Arc::clone(&slot),
        });
        (id, slot)
    }
}

/// Ordered log of classical messages received by one host.
#[derive(Default)]
pub struct ClassicalStorage {
    state: Mutex<ClassicalState>,
}

impl std::fmt::Debug for ClassicalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ClassicalStorage")
            .field("messages", &state.entries.len())
            .field("pending", &state.requests.len())
            .finish()
    }
}

impl ClassicalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message and fulfills the first pending read it satisfies.
    pub fn append(&self, message: Message) {
        let mut state = self.state.lock();
        let sender = message.sender.clone();
        state.entries.push(Entry {
            message,
            read: false,
        });
        let matching = state
            .requests
            .iter()
            .position(|request| request.sender == sender);
        if let Some(index) = matching {
            let request = state.requests.remove(index);
            let messages = state.collect(&request.sender, request.mode);
            let _ = request.slot.fill(messages);
        }
    }

    pub fn get_all(&self) -> Vec<Message> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn get_all_from_sender(&self, sender: &str, wait: Wait) -> Vec<Message> {
        self.read(sender, ReadMode::All, wait)
    }

    /// Advances the per-sender read cursor by one message.
    pub fn get_next_unread_from_sender(&self, sender: &str, wait: Wait) -> Option<Message> {
        self.read(sender, ReadMode::NextUnread, wait)
            .into_iter()
            .next()
    }

    fn read(&self, sender: &str, mode: ReadMode, wait: Wait) -> Vec<Message> {
        let (id, slot) = {
            let mut state = self.state.lock();
            let found = state.collect(sender, mode);
            if !found.is_empty() || wait.is_immediate() {
                return found;
            }
            state.register(sender, mode)
        };
        if let Some(messages) = slot.wait(wait) {
            return messages;
        }
        // An append may have raced the timeout; it removes the request before
        // filling, so the slot is authoritative once the request is gone.
        let mut state = self.state.lock();
        state.requests.retain(|request| request.id != id);
        slot.take().unwrap_or_default()
    }

    /// Drops recorded ACK messages, optionally only those from one sender.
    pub fn remove_all_ack(&self, sender: Option<&str>) {
        self.state.lock().entries.retain(|entry| {
            !(entry.message.is_ack() && sender.map_or(true, |s| entry.message.sender == s))
        });
    }

    pub fn empty(&self) {
        self.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ACK_CONTENT;
    use pretty_assertions::assert_eq;
    use std::{thread, time::Duration};

    fn msg(sender: &str, content: &str) -> Message {
        Message::new(sender, content, None)
    }

    #[test]
    fn next_unread_advances_once_per_call() {
        let storage = ClassicalStorage::new();
        storage.append(msg("alice", "one"));
        storage.append(msg("bob", "other"));
        storage.append(msg("alice", "two"));
        let first = storage
            .get_next_unread_from_sender("alice", Wait::Immediate)
            .unwrap();
        let second = storage
            .get_next_unread_from_sender("alice", Wait::Immediate)
            .unwrap();
        assert_eq!(first.content, "one");
        assert_eq!(second.content, "two");
        assert!(storage
            .get_next_unread_from_sender("alice", Wait::Immediate)
            .is_none());
        assert_eq!(storage.get_all_from_sender("alice", Wait::Immediate).len(), 2);
    }

    #[test]
    fn blocked_reader_woken_by_append() {
        let storage = Arc::new(ClassicalStorage::new());
        let writer = Arc::clone(&storage);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.append(msg("bob", "late"));
            writer.append(msg("alice", "hello"));
        });
        let got = storage
            .get_next_unread_from_sender("alice", Wait::Timeout(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(got.content, "hello");
        handle.join().unwrap();
    }

    #[test]
    fn one_append_wakes_only_first_matching_reader() {
        let storage = Arc::new(ClassicalStorage::new());
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    storage.get_next_unread_from_sender("alice", Wait::millis(300))
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        storage.append(msg("alice", "only"));
        let results: Vec<_> = readers
            .into_iter()
            .map(|reader| reader.join().unwrap())
            .collect();
        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
    }

    #[test]
    fn timed_out_read_leaves_no_request_behind() {
        let storage = ClassicalStorage::new();
        assert!(storage
            .get_all_from_sender("alice", Wait::millis(10))
            .is_empty());
        assert_eq!(storage.state.lock().requests.len(), 0);
    }

    #[test]
    fn remove_all_ack_filters_by_sender() {
        let storage = ClassicalStorage::new();
        storage.append(msg("alice", ACK_CONTENT));
        storage.append(msg("bob", ACK_CONTENT));
        storage.append(msg("alice", "data"));
        storage.remove_all_ack(Some("alice"));
        assert_eq!(storage.len(), 2);
        storage.remove_all_ack(None);
        let remaining: Vec<_> = storage.get_all().into_iter().map(|m| m.content).collect();
        assert_eq!(remaining, vec!["data".to_string()]);
        storage.empty();
        assert!(storage.is_empty());
    }
}
