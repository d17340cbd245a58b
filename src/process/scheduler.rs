//! The cooperative FIFO scheduler (§4.2).
//!
//! Grounded on `keos::thread::scheduler::{Scheduler, Fifo}`: a trait so
//! alternate disciplines can be swapped in, with a single FIFO runqueue
//! as the default and only implementation this crate ships. Context
//! switching itself is out of scope (§1 boot/MMU enablement) — this
//! type only tracks *which slot runs next*, driven by [`super::ProcessTable`].

use std::collections::VecDeque;
use std::sync::Mutex;

/// A pluggable scheduling discipline over process-table slot indices.
pub trait Scheduler: Send + Sync {
    /// Returns the next runnable slot, if any.
    fn next_to_run(&self) -> Option<usize>;
    /// Admits `slot` to the runnable set.
    fn push(&self, slot: usize);
    /// Called on every timer tick; a FIFO scheduler re-enqueues the
    /// currently running slot at the tail (RUN -> READY, §4.2).
    fn timer_tick(&self, running: Option<usize>);
}

/// The default, and only, discipline: single ready queue, FIFO.
pub struct Fifo {
    runqueue: Mutex<VecDeque<usize>>,
}

impl Fifo {
    pub fn new() -> Self {
        Fifo {
            runqueue: Mutex::new(VecDeque::new()),
        }
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<usize> {
        self.runqueue.lock().unwrap().pop_front()
    }

    fn push(&self, slot: usize) {
        self.runqueue.lock().unwrap().push_back(slot);
    }

    fn timer_tick(&self, running: Option<usize>) {
        if let Some(slot) = running {
            self.push(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let s = Fifo::new();
        s.push(3);
        s.push(1);
        s.push(2);
        assert_eq!(s.next_to_run(), Some(3));
        assert_eq!(s.next_to_run(), Some(1));
        assert_eq!(s.next_to_run(), Some(2));
        assert_eq!(s.next_to_run(), None);
    }

    #[test]
    fn timer_tick_requeues_running() {
        let s = Fifo::new();
        s.push(5);
        assert_eq!(s.next_to_run(), Some(5));
        s.timer_tick(Some(5));
        assert_eq!(s.next_to_run(), Some(5));
    }
}
