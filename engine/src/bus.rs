//! Observer channel for overload transitions.
//!
//! Subsystems that re-tune themselves on overload changes subscribe here
//! and poll their own bounded queue whenever convenient. Publishing never
//! blocks: a subscriber that stopped reading loses its oldest events first,
//! since the newest state is the one it must eventually see. Dropping a
//! subscription is enough to unsubscribe; the slot is pruned on the next
//! publish.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU32, Ordering};
use heapless::Deque;
use spin::{Mutex, RwLock};

use crate::overload::OverloadTransition;

/// Events each subscriber may hold before the oldest is overwritten.
pub const BUS_DEPTH: usize = 16;

struct Slot {
    queue: Mutex<Deque<OverloadTransition, BUS_DEPTH>>,
    dropped: AtomicU32,
}

/// One subscriber's end of the channel.
pub struct OverloadSubscription {
    slot: Arc<Slot>,
}

impl OverloadSubscription {
    /// Next pending event, oldest first.
    pub fn recv(&self) -> Option<OverloadTransition> {
        self.slot.queue.lock().pop_front()
    }

    /// Events lost to overflow since subscribing.
    pub fn dropped(&self) -> u32 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.slot.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The publishing end, owned by the engine.
pub struct OverloadBus {
    slots: RwLock<Vec<Arc<Slot>>>,
}

impl OverloadBus {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> OverloadSubscription {
        let slot = Arc::new(Slot {
            queue: Mutex::new(Deque::new()),
            dropped: AtomicU32::new(0),
        });
        self.slots.write().push(Arc::clone(&slot));
        OverloadSubscription { slot }
    }

    /// Deliver an event to every live subscriber and prune dead ones.
    pub fn publish(&self, event: OverloadTransition) {
        let mut slots = self.slots.write();
        slots.retain(|slot| Arc::strong_count(slot) > 1);
        for slot in slots.iter() {
            let mut queue = slot.queue.lock();
            if queue.is_full() {
                let _ = queue.pop_front();
                slot.dropped.fetch_add(1, Ordering::Relaxed);
            }
            let _ = queue.push_back(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.read().len()
    }
}

impl Default for OverloadBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
