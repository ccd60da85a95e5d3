//! Deferred delivery of overload notifications.
//!
//! The tick path only records transitions here; fan-out to subscribers
//! happens later through [`NotifyQueue::drain_into`], called from whatever
//! context the host considers cheap. The queue is bounded and sheds its
//! oldest entry on overflow, so a stalled drain can delay notifications
//! but never stall the tick.

use core::sync::atomic::{AtomicU32, Ordering};
use heapless::Deque;
use spin::Mutex;

use crate::bus::{OverloadBus, BUS_DEPTH};
use crate::overload::OverloadTransition;

/// Transitions waiting to be published.
pub struct NotifyQueue {
    pending: Mutex<Deque<OverloadTransition, BUS_DEPTH>>,
    overflow: AtomicU32,
}

impl NotifyQueue {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Deque::new()),
            overflow: AtomicU32::new(0),
        }
    }

    /// Queue a transition for later delivery.
    pub fn push(&self, event: OverloadTransition) {
        let mut pending = self.pending.lock();
        if pending.is_full() {
            let _ = pending.pop_front();
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
        let _ = pending.push_back(event);
    }

    /// Publish everything queued so far. Returns the number delivered.
    pub fn drain_into(&self, bus: &OverloadBus) -> usize {
        let mut delivered = 0;
        loop {
            // Take one at a time so push from another context interleaves
            // instead of waiting for the whole drain.
            let event = match self.pending.lock().pop_front() {
                Some(event) => event,
                None => break,
            };
            bus.publish(event);
            delivered += 1;
        }
        delivered
    }

    /// Transitions lost to overflow since creation.
    pub fn overflowed(&self) -> u32 {
        self.overflow.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NotifyQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overload::OverloadState;

    fn event(tick: u64) -> OverloadTransition {
        OverloadTransition {
            from: OverloadState::Elevated,
            to: OverloadState::Normal,
            tick,
        }
    }

    #[test]
    fn test_drain_delivers_in_order() {
        let queue = NotifyQueue::new();
        let bus = OverloadBus::new();
        let sub = bus.subscribe();

        queue.push(event(1));
        queue.push(event(2));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.drain_into(&bus), 2);
        assert!(queue.is_empty());
        assert_eq!(sub.recv().unwrap().tick, 1);
        assert_eq!(sub.recv().unwrap().tick, 2);
    }

    #[test]
    fn test_overflow_sheds_oldest() {
        let queue = NotifyQueue::new();
        for tick in 0..(BUS_DEPTH as u64 + 3) {
            queue.push(event(tick));
        }
        assert_eq!(queue.overflowed(), 3);

        let bus = OverloadBus::new();
        let sub = bus.subscribe();
        queue.drain_into(&bus);
        assert_eq!(sub.recv().unwrap().tick, 3);
    }

    #[test]
    fn test_drain_on_empty_is_a_no_op() {
        let queue = NotifyQueue::new();
        let bus = OverloadBus::new();
        assert_eq!(queue.drain_into(&bus), 0);
    }
}
