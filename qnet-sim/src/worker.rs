use std::{
    collections::HashSet,
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::{
    error::{SimError, SimResult},
    sync::Wait,
};

/// Bounded group of detached worker threads.
///
/// `spawn` blocks while `limit` workers are running, which gives the packet
/// consumers natural backpressure instead of an unbounded thread fan-out.
#[derive(Debug)]
pub struct WorkerGroup {
    name: String,
    limit: usize,
    active: Mutex<usize>,
    changed: Condvar,
    threads: Mutex<HashSet<ThreadId>>,
}

struct Permit(Arc<WorkerGroup>);

impl Drop for Permit {
    fn drop(&mut self) {
        self.0.threads.lock().remove(&thread::current().id());
        let mut active = self.0.active.lock();
        *active = active.saturating_sub(1);
        self.0.changed.notify_all();
    }
}

impl WorkerGroup {
    pub fn new(name: impl Into<String>, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            limit: limit.max(1),
            active: Mutex::new(0),
            changed: Condvar::new(),
            threads: Mutex::new(HashSet::new()),
        })
    }

    pub fn spawn<F>(self: &Arc<Self>, task: F) -> SimResult<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut active = self.active.lock();
            while *active >= self.limit {
                self.changed.wait(&mut active);
            }
            *active += 1;
        }
        let permit = Permit(Arc::clone(self));
        thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || {
                permit.0.threads.lock().insert(thread::current().id());
                let _permit = permit;
                task();
            })
            .map_err(|err| {
                error!(group = %self.name, err = %err, "worker spawn failed");
                SimError::Spawn(err)
            })
    }

    pub fn active(&self) -> usize {
        *self.active.lock()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The calling thread is one of this group's workers.
    pub fn is_worker(&self) -> bool {
        self.threads.lock().contains(&thread::current().id())
    }

    /// Returns `true` once no worker is running.
    pub fn wait_idle(&self, wait: Wait) -> bool {
        let deadline = wait.deadline();
        let mut active = self.active.lock();
        while *active > 0 {
            match deadline {
                None => self.changed.wait(&mut active),
                Some(deadline) => {
                    if self.changed.wait_until(&mut active, deadline).timed_out() {
                        return *active == 0;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[test]
    fn never_exceeds_limit() {
        let group = WorkerGroup::new("unit", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            group
                .spawn(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert!(group.wait_idle(Wait::Timeout(Duration::from_secs(5))));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(group.active(), 0);
    }

    #[test]
    fn workers_know_their_group() {
        let group = WorkerGroup::new("own", 1);
        let other = WorkerGroup::new("other", 1);
        assert!(!group.is_worker());
        let (inner, outer) = (Arc::clone(&group), Arc::clone(&other));
        let handle = group
            .spawn(move || assert!(inner.is_worker() && !outer.is_worker()))
            .unwrap();
        handle.join().unwrap();
        assert!(group.wait_idle(Wait::Timeout(Duration::from_secs(1))));
    }

    #[test]
    fn permit_released_when_task_panics() {
        let group = WorkerGroup::new("panicky", 1);
        let handle = group.spawn(|| panic!("boom")).unwrap();
        assert!(handle.join().is_err());
        assert!(group.wait_idle(Wait::Timeout(Duration::from_secs(1))));
    }
}
