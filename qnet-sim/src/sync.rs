//! Blocking primitives shared by storages, the ACK table and the worker group.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How long a retrieval or ACK wait may block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    Immediate,
    Timeout(Duration),
    Forever,
}

impl Wait {
    pub fn millis(ms: u64) -> Self {
        if ms == 0 {
            Wait::Immediate
        } else {
            Wait::Timeout(Duration::from_millis(ms))
        }
    }

    /// `None` waits forever.
    pub fn from_config(ms: Option<u64>) -> Self {
        ms.map_or(Wait::Forever, Wait::millis)
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Wait::Immediate)
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Wait::Timeout(timeout) => Some(Instant::now() + *timeout),
            Wait::Immediate => Some(Instant::now()),
            Wait::Forever => None,
        }
    }
}

impl From<Duration> for Wait {
    fn from(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Wait::Immediate
        } else {
            Wait::Timeout(timeout)
        }
    }
}

/// Single-assignment slot a blocked caller parks on until a producer fills it.
#[derive(Debug)]
pub struct ResultSlot<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Default for ResultSlot<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands the value back if the slot was already filled.
    pub fn fill(&self, value: T) -> Result<(), T> {
        let mut guard = self.value.lock();
        if guard.is_some() {
            return Err(value);
        }
        *guard = Some(value);
        self.ready.notify_all();
        Ok(())
    }

    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    pub fn wait(&self, wait: Wait) -> Option<T> {
        let deadline = wait.deadline();
        let mut guard = self.value.lock();
        while guard.is_none() {
            match deadline {
                None => self.ready.wait(&mut guard),
                Some(deadline) => {
                    if self.ready.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        guard.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn wait_returns_value_filled_by_other_thread() {
        let slot = Arc::new(ResultSlot::new());
        let producer = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.fill(7u8).unwrap();
        });
        assert_eq!(slot.wait(Wait::Timeout(Duration::from_secs(5))), Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn immediate_wait_never_blocks() {
        let slot: ResultSlot<u8> = ResultSlot::new();
        assert_eq!(slot.wait(Wait::Immediate), None);
        assert_eq!(slot.wait(Wait::millis(10)), None);
    }

    #[test]
    fn second_fill_is_rejected() {
        let slot = ResultSlot::new();
        slot.fill("first").unwrap();
        assert_eq!(slot.fill("second"), Err("second"));
        assert_eq!(slot.take(), Some("first"));
    }

    #[test]
    fn config_wait_mapping() {
        assert_eq!(Wait::from_config(None), Wait::Forever);
        assert_eq!(Wait::from_config(Some(0)), Wait::Immediate);
        assert_eq!(
            Wait::from_config(Some(25)),
            Wait::Timeout(Duration::from_millis(25))
        );
    }
}
