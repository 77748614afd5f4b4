//! # Barrier — N-Party Start Rendezvous
//!
//! Holds every participant until all N have arrived, so the measured phases
//! of all workers begin simultaneously (to within release latency). The
//! supervisor counts as a participant: a run with N workers uses a barrier
//! of N + 1, and the supervisor's own `wait` is the arrival that starts the
//! benchmark.
//!
//! ## Protocol
//!
//! A count guarded by a mutex plus a gate semaphore:
//!
//! 1. Take the count lock and increment. The arrival that reaches N resets
//!    the count to zero and becomes the releaser.
//! 2. The releaser posts the gate once.
//! 3. Every waiter waits on the gate, then immediately re-posts it — a chain
//!    release where each woken waiter wakes the next.
//!
//! The barrier is single-use per round: after the N-th arrival releases
//! everyone the count is back at zero, and a fresh barrier is expected for
//! any later rendezvous.

use std::sync::{Arc, Condvar, Mutex};

/// A counting semaphore. The gate of the rendezvous; also the shape the
/// cross-process version of this barrier would use.
struct Semaphore {
    permits: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.cv.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    fn post(&self) {
        *self.permits.lock().unwrap() += 1;
        self.cv.notify_one();
    }
}

struct Inner {
    count: Mutex<usize>,
    gate: Semaphore,
    participants: usize,
}

/// An N-party rendezvous. Clone one handle per participant; all clones share
/// the same barrier state.
#[derive(Clone)]
pub struct Barrier {
    inner: Arc<Inner>,
}

impl Barrier {
    /// A barrier for exactly `participants` parties.
    pub fn new(participants: usize) -> Self {
        assert!(participants > 0, "a barrier needs at least one participant");
        Barrier {
            inner: Arc::new(Inner {
                count: Mutex::new(0),
                gate: Semaphore::new(0),
                participants,
            }),
        }
    }

    /// Block until all participants have arrived. The N-th arrival resets the
    /// count and releases the chain.
    pub fn wait(&self) {
        let release = {
            let mut count = self.inner.count.lock().unwrap();
            *count += 1;
            if *count == self.inner.participants {
                *count = 0;
                true
            } else {
                false
            }
        };

        if release {
            self.inner.gate.post();
        }

        self.inner.gate.wait();
        self.inner.gate.post();
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        *self.inner.count.lock().unwrap()
    }
}
