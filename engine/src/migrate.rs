//! In-flight migration accounting.
//!
//! The tick sweep decides that a task should move; the actual move happens
//! later, off the hot path, when the host drains the hub. Between those two
//! moments the hub remembers the intent and keeps both endpoints honest: a
//! source core runs one outbound push at a time, and destination cores
//! absorbing a boosted migration are visible to the filter so a second
//! heavy task does not pile onto them.

extern crate alloc;

use alloc::vec::Vec;

use arrayvec::ArrayVec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use spin::Mutex;
use strata_types::{CoreId, IntentId, TaskId, MAX_CORES};

use crate::mask::CoreMask;

// ============================================================================
// INTENTS
// ============================================================================

/// One planned migration, waiting for the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationIntent {
    pub intent: IntentId,
    pub task: TaskId,
    pub src: CoreId,
    pub dst: CoreId,
    /// Raised by boosted or on-top picks; reserves the destination.
    pub boost: bool,
}

// ============================================================================
// HUB
// ============================================================================

/// Pending migrations and the per-core accounting around them.
pub struct MigrationHub {
    next_intent: AtomicU64,
    /// Source cores with an outbound push in flight.
    balancing: Vec<AtomicBool>,
    /// Inbound migrations per destination core.
    inbound: Vec<AtomicU32>,
    /// Boosted inbound migrations per destination core.
    boosted: Vec<AtomicU32>,
    pending: Mutex<ArrayVec<MigrationIntent, MAX_CORES>>,
}

impl MigrationHub {
    pub fn new() -> Self {
        let mut balancing = Vec::with_capacity(MAX_CORES);
        let mut inbound = Vec::with_capacity(MAX_CORES);
        let mut boosted = Vec::with_capacity(MAX_CORES);
        for _ in 0..MAX_CORES {
            balancing.push(AtomicBool::new(false));
            inbound.push(AtomicU32::new(0));
            boosted.push(AtomicU32::new(0));
        }
        Self {
            next_intent: AtomicU64::new(1),
            balancing,
            inbound,
            boosted,
            pending: Mutex::new(ArrayVec::new()),
        }
    }

    /// Register a planned move. Claims the source core; a source already
    /// pushing, or a move that goes nowhere, is refused.
    pub fn submit(&self, task: TaskId, src: CoreId, dst: CoreId, boost: bool) -> Option<IntentId> {
        if src == dst {
            return None;
        }
        if self.balancing[src.index()]
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let intent = IntentId::new(self.next_intent.fetch_add(1, Ordering::Relaxed));
        let record = MigrationIntent { intent, task, src, dst, boost };
        if self.pending.lock().try_push(record).is_err() {
            self.balancing[src.index()].store(false, Ordering::Release);
            return None;
        }

        self.inbound[dst.index()].fetch_add(1, Ordering::Relaxed);
        if boost {
            self.boosted[dst.index()].fetch_add(1, Ordering::Relaxed);
        }
        Some(intent)
    }

    /// True while `core` has an outbound push in flight.
    pub fn is_balancing(&self, core: CoreId) -> bool {
        self.balancing[core.index()].load(Ordering::Acquire)
    }

    /// True while `core` is the destination of any pending migration.
    pub fn is_receiving(&self, core: CoreId) -> bool {
        self.inbound[core.index()].load(Ordering::Relaxed) > 0
    }

    /// Destinations of boosted migrations, which the filter steers around.
    pub fn boost_inbound_mask(&self) -> CoreMask {
        let mut mask = CoreMask::new();
        for (idx, count) in self.boosted.iter().enumerate() {
            if count.load(Ordering::Relaxed) > 0 {
                mask.set(CoreId::from_index(idx));
            }
        }
        mask
    }

    /// Number of moves waiting for a drain.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Take every pending intent. Endpoint accounting stays in place until
    /// each intent is passed back through [`MigrationHub::complete`].
    pub fn take_pending(&self) -> ArrayVec<MigrationIntent, MAX_CORES> {
        core::mem::take(&mut *self.pending.lock())
    }

    /// Take the pending intents sourced at `src`, leaving the rest queued.
    /// Each source runs one push at a time, so this yields at most one.
    pub fn take_for(&self, src: CoreId) -> ArrayVec<MigrationIntent, MAX_CORES> {
        let mut pending = self.pending.lock();
        let mut taken = ArrayVec::new();
        let mut kept = ArrayVec::new();
        for intent in pending.drain(..) {
            if intent.src == src {
                taken.push(intent);
            } else {
                kept.push(intent);
            }
        }
        *pending = kept;
        taken
    }

    /// Release both endpoints of a drained intent, moved or not.
    pub fn complete(&self, intent: &MigrationIntent) {
        self.balancing[intent.src.index()].store(false, Ordering::Release);
        let _ = self.inbound[intent.dst.index()].fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |count| count.checked_sub(1),
        );
        if intent.boost {
            let _ = self.boosted[intent.dst.index()].fetch_update(
                Ordering::Relaxed,
                Ordering::Relaxed,
                |count| count.checked_sub(1),
            );
        }
    }
}

impl Default for MigrationHub {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
