//! Per-peer sequence windows and the outbound ACK wait table.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Instant,
};

use parking_lot::Mutex;

use crate::sync::{ResultSlot, Wait};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Fresh,
    /// Seen before.
    Duplicate,
    /// Too far behind the window to tell whether it was seen.
    Stale,
}

/// Tracks which sequence numbers from one peer have been seen.
///
/// `next_expected` is the low-water mark. Numbers above it are buffered until
/// the gap closes, or until the highest number runs more than `window` ahead,
/// at which point the mark is forced forward. Numbers skipped that way are
/// remembered for one more window so a late arrival is still accepted; below
/// `forgotten_below` nothing is known any more.
#[derive(Clone, Debug)]
pub struct SequenceWindow {
    next_expected: u64,
    buffered: BTreeSet<u64>,
    skipped: BTreeSet<u64>,
    forgotten_below: u64,
    highest: Option<u64>,
    window: u64,
}

impl SequenceWindow {
    pub fn new(window: u64) -> Self {
        Self {
            next_expected: 0,
            buffered: BTreeSet::new(),
            skipped: BTreeSet::new(),
            forgotten_below: 0,
            highest: None,
            window: window.max(1),
        }
    }

    pub fn record(&mut self, seq: u64) -> Admission {
        if seq < self.next_expected {
            return if self.skipped.remove(&seq) {
                Admission::Fresh
            } else if seq < self.forgotten_below {
                Admission::Stale
            } else {
                Admission::Duplicate
            };
        }
        if !self.buffered.insert(seq) {
            return Admission::Duplicate;
        }
        self.highest = Some(self.highest.map_or(seq, |highest| highest.max(seq)));
        self.advance();
        if let Some(highest) = self.highest {
            if highest.saturating_sub(self.next_expected) > self.window {
                self.force_to(highest - self.window);
            }
        }
        Admission::Fresh
    }

    /// Gives up on every missing number below `mark`.
    fn force_to(&mut self, mark: u64) {
        let horizon = mark.saturating_sub(self.window);
        for missing in self.next_expected.max(horizon)..mark {
            if !self.buffered.contains(&missing) {
                self.skipped.insert(missing);
            }
        }
        let kept = self.skipped.split_off(&horizon);
        if !self.skipped.is_empty() || self.next_expected < horizon {
            self.forgotten_below = self.forgotten_below.max(horizon);
        }
        self.skipped = kept;
        self.next_expected = mark;
        self.buffered = self.buffered.split_off(&mark);
        self.advance();
    }

    fn advance(&mut self) {
        while self.buffered.remove(&self.next_expected) {
            self.next_expected += 1;
        }
    }

    /// Whether `seq` is known to have been seen. Numbers that fell out of
    /// memory count as unseen.
    pub fn covers(&self, seq: u64) -> bool {
        if seq < self.next_expected {
            seq >= self.forgotten_below && !self.skipped.contains(&seq)
        } else {
            self.buffered.contains(&seq)
        }
    }

    pub fn low_water_mark(&self) -> u64 {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    pub fn skipped(&self) -> usize {
        self.skipped.len()
    }
}

struct AckWaiter {
    id: u64,
    peer: String,
    seq: u64,
    deadline: Option<Instant>,
    slot: Arc<ResultSlot<()>>,
}

#[derive(Default)]
struct AckState {
    acked: HashMap<String, SequenceWindow>,
    waiters: Vec<AckWaiter>,
    next_waiter: u64,
}

/// ACKs received per peer plus the callers blocked on them.
pub struct AckTable {
    state: Mutex<AckState>,
    window: u64,
}

impl Default for AckTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AckTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AckTable")
            .field("peers", &state.acked.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl AckTable {
    pub fn new() -> Self {
        Self::with_window(u64::MAX)
    }

    /// ACK bookkeeping that gives up on numbers more than `window` behind
    /// the newest ACK from the same peer.
    pub fn with_window(window: u64) -> Self {
        Self {
            state: Mutex::new(AckState::default()),
            window,
        }
    }

    /// Marks a sequence number that will never be acknowledged as settled,
    /// so it leaves no gap behind later ACKs.
    pub fn settle(&self, peer: &str, seq: u64) {
        let window = self.window;
        self.state
            .lock()
            .acked
            .entry(peer.to_owned())
            .or_insert_with(|| SequenceWindow::new(window))
            .record(seq);
    }

    /// Records an ACK and wakes every waiter it satisfies. Waiters whose
    /// deadline already passed are retired on the way.
    pub fn acknowledge(&self, peer: &str, seq: u64) -> Admission {
        let mut state = self.state.lock();
        let AckState { acked, waiters, .. } = &mut *state;
        let window = acked
            .entry(peer.to_owned())
            .or_insert_with(|| SequenceWindow::new(self.window));
        let admission = window.record(seq);
        let now = Instant::now();
        waiters.retain(|waiter| {
            if waiter.peer == peer && window.covers(waiter.seq) {
                let _ = waiter.slot.fill(());
                return false;
            }
            waiter.deadline.map_or(true, |deadline| deadline > now)
        });
        admission
    }

    pub fn is_acked(&self, peer: &str, seq: u64) -> bool {
        self.state
            .lock()
            .acked
            .get(peer)
            .is_some_and(|window| window.covers(seq))
    }

    /// Blocks until `seq` from `peer` is acknowledged or `wait` runs out.
    pub fn await_ack(&self, peer: &str, seq: u64, wait: Wait) -> bool {
        let (id, slot) = {
            let mut state = self.state.lock();
            if state
                .acked
                .get(peer)
                .is_some_and(|window| window.covers(seq))
            {
                return true;
            }
            if wait.is_immediate() {
                return false;
            }
            let id = state.next_waiter;
            state.next_waiter += 1;
            let slot = Arc::new(ResultSlot::new());
            state.waiters.push(AckWaiter {
                id,
                peer: peer.to_owned(),
                seq,
                deadline: wait.deadline(),
                slot: Arc::clone(&slot),
            });
            (id, slot)
        };
        if slot.wait(wait).is_some() {
            return true;
        }
        let mut state = self.state.lock();
        state.waiters.retain(|waiter| waiter.id != id);
        slot.take().is_some()
    }

    pub fn pending_waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// ACKs from `peer` held above a gap.
    pub fn buffered(&self, peer: &str) -> usize {
        self.state
            .lock()
            .acked
            .get(peer)
            .map_or(0, SequenceWindow::buffered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn in_order_numbers_advance_mark() {
        let mut window = SequenceWindow::new(10);
        for seq in 0..5 {
            assert_eq!(window.record(seq), Admission::Fresh);
        }
        assert_eq!(window.low_water_mark(), 5);
        assert_eq!(window.buffered(), 0);
        assert_eq!(window.record(3), Admission::Duplicate);
    }

    #[test]
    fn out_of_order_numbers_are_buffered_until_gap_closes() {
        let mut window = SequenceWindow::new(10);
        window.record(0);
        window.record(2);
        window.record(3);
        assert_eq!(window.low_water_mark(), 1);
        assert_eq!(window.buffered(), 2);
        assert_eq!(window.record(2), Admission::Duplicate);
        window.record(1);
        assert_eq!(window.low_water_mark(), 4);
        assert_eq!(window.buffered(), 0);
    }

    #[test]
    fn mark_is_forced_forward_past_window() {
        let mut window = SequenceWindow::new(3);
        window.record(0);
        window.record(5);
        // 1..=4 never arrived; the mark jumps to highest - window.
        assert_eq!(window.low_water_mark(), 2);
        assert!(!window.covers(1));
        window.record(9);
        assert_eq!(window.low_water_mark(), 6);
        assert!(!window.covers(4));
        assert!(window.covers(5));
        assert_eq!(window.record(5), Admission::Duplicate);
    }

    #[test]
    fn late_arrival_below_forced_mark_is_accepted_once() {
        let mut window = SequenceWindow::new(3);
        window.record(0);
        window.record(5);
        assert_eq!(window.record(1), Admission::Fresh);
        assert!(window.covers(1));
        assert_eq!(window.record(1), Admission::Duplicate);
        assert_eq!(window.record(0), Admission::Duplicate);
    }

    #[test]
    fn skipped_numbers_are_forgotten_after_another_window() {
        let mut window = SequenceWindow::new(3);
        window.record(0);
        window.record(5);
        window.record(9);
        assert_eq!(window.skipped(), 2);
        assert_eq!(window.record(1), Admission::Stale);
        assert_eq!(window.record(4), Admission::Fresh);
        window.record(1_000_000);
        assert_eq!(window.skipped(), 3);
        assert_eq!(window.buffered(), 1);
        assert!(!window.covers(4));
    }

    #[test]
    fn ack_wakes_matching_waiter() {
        let table = Arc::new(AckTable::new());
        let acker = Arc::clone(&table);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            acker.acknowledge("bob", 1);
            acker.acknowledge("bob", 0);
        });
        assert!(table.await_ack("bob", 0, Wait::Timeout(Duration::from_secs(5))));
        handle.join().unwrap();
        assert!(table.is_acked("bob", 1));
        assert!(!table.is_acked("carol", 0));
        assert_eq!(table.pending_waiters(), 0);
    }

    #[test]
    fn unacknowledged_send_leaves_no_gap() {
        let table = AckTable::with_window(10);
        table.settle("bob", 0);
        for seq in 1..=500 {
            assert_eq!(table.acknowledge("bob", seq), Admission::Fresh);
        }
        assert_eq!(table.buffered("bob"), 0);
        assert!(table.is_acked("bob", 500));
    }

    #[test]
    fn lost_acks_do_not_pin_later_ones() {
        let table = AckTable::with_window(10);
        for seq in 1..=5_000 {
            table.acknowledge("bob", seq);
        }
        assert!(table.buffered("bob") <= 10);
        assert!(!table.is_acked("bob", 0));
    }

    #[test]
    fn timed_out_waiter_retires_itself() {
        let table = AckTable::new();
        assert!(!table.await_ack("bob", 0, Wait::millis(20)));
        assert_eq!(table.pending_waiters(), 0);
        assert!(!table.await_ack("bob", 0, Wait::Immediate));
    }
}
