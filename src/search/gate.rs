//! Per-search admission gate.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct GateState {
    permits: usize,
    closed: bool,
}

/// A counting semaphore bounding how many of one search's shard tasks run at once.
///
/// Closing the gate wakes every waiter; no permit is handed out afterwards.
#[derive(Debug)]
pub struct TaskGate {
    state: Mutex<GateState>,
    changed: Condvar,
    capacity: usize,
}

impl TaskGate {
    /// Create a gate with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(GateState {
                permits: capacity,
                closed: false,
            }),
            changed: Condvar::new(),
            capacity,
        }
    }

    /// Total permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.state.lock().permits
    }

    /// Whether the gate was closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Take a permit if one is free.
    pub fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        let mut state = self.state.lock();
        if state.closed || state.permits == 0 {
            return None;
        }
        state.permits -= 1;
        Some(GatePermit {
            gate: Arc::clone(self),
        })
    }

    /// Block for a permit. Returns `None` once the gate is closed.
    pub fn acquire(self: &Arc<Self>) -> Option<GatePermit> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return Some(GatePermit {
                    gate: Arc::clone(self),
                });
            }
            self.changed.wait(&mut state);
        }
    }

    /// Refuse all further permits and wake every waiter.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.permits += 1;
        self.changed.notify_one();
    }
}

/// A held gate permit. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<TaskGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_permits_are_bounded() {
        let gate = Arc::new(TaskGate::new(2));
        let a = gate.try_acquire().unwrap();
        let _b = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.available(), 0);

        drop(a);
        assert_eq!(gate.available(), 1);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let gate = Arc::new(TaskGate::new(1));
        let held = gate.acquire().unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.acquire().is_some())
        };

        thread::sleep(Duration::from_millis(30));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_close_wakes_waiters() {
        let gate = Arc::new(TaskGate::new(1));
        let _held = gate.acquire().unwrap();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.acquire().is_none())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        let closed_at = Instant::now();
        gate.close();
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        assert!(closed_at.elapsed() < Duration::from_secs(1));
        assert!(gate.is_closed());
        assert!(gate.try_acquire().is_none());
    }

    #[test]
    fn test_zero_capacity_is_one() {
        assert_eq!(TaskGate::new(0).capacity(), 1);
    }
}
