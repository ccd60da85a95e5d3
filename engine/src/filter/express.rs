//! Priority-pinning lanes.
//!
//! Express classes get a reserved subset of cores mostly to themselves. The
//! engine keeps a per-core count of enqueued express tasks, so a second
//! express task routes around a lane that is already taken, and suppressed
//! classes know which lanes to stay off besides the fastest group.

extern crate alloc;

use alloc::vec::Vec;

use core::sync::atomic::{AtomicU32, Ordering};

use spin::RwLock;
use strata_types::{CoreId, MAX_CORES};

use crate::error::{EngineError, EngineResult};
use crate::mask::CoreMask;
use crate::topology::Topology;

/// Lane reservations and occupancy for express placement.
pub struct ExpressLanes {
    /// Cores set aside for express tasks.
    reserved: RwLock<CoreMask>,
    /// Enqueued express tasks per core.
    occupancy: Vec<AtomicU32>,
}

impl ExpressLanes {
    pub fn new() -> Self {
        let mut occupancy = Vec::with_capacity(MAX_CORES);
        for _ in 0..MAX_CORES {
            occupancy.push(AtomicU32::new(0));
        }
        Self {
            reserved: RwLock::new(CoreMask::new()),
            occupancy,
        }
    }

    /// Replace the reserved lane set. An empty set turns the mechanism off.
    pub fn set_reserved(&self, topo: &Topology, lanes: CoreMask) -> EngineResult<()> {
        if !lanes.subset_of(&topo.all_cores()) {
            return Err(EngineError::invalid_config(
                "lanes",
                "reserved lanes must be topology cores",
            ));
        }
        *self.reserved.write() = lanes;
        Ok(())
    }

    /// The reserved lane set.
    pub fn reserved(&self) -> CoreMask {
        *self.reserved.read()
    }

    /// An express task was enqueued on `core`.
    pub fn occupy(&self, core: CoreId) {
        self.occupancy[core.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// An express task left `core`.
    pub fn release(&self, core: CoreId) {
        let slot = &self.occupancy[core.index()];
        let _ = slot.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
            count.checked_sub(1)
        });
    }

    /// Cores at least one express task is enqueued on.
    pub fn occupied(&self) -> CoreMask {
        let mut mask = CoreMask::new();
        for (idx, slot) in self.occupancy.iter().enumerate() {
            if slot.load(Ordering::Relaxed) > 0 {
                mask.set(CoreId::from_index(idx));
            }
        }
        mask
    }

    /// Candidate cores for an express task: open reserved lanes while any
    /// remain, every active core once they are all taken.
    pub fn express_candidates(&self, active: CoreMask) -> CoreMask {
        let reserved = *self.reserved.read() & active;
        if reserved.is_empty() {
            return active;
        }
        let open = reserved.and_not(&self.occupied());
        if open.any() {
            open
        } else {
            active
        }
    }

    /// Cores a suppressed task must avoid: the fastest group plus every
    /// lane an express task holds.
    pub fn suppressed_exclusion(&self, topo: &Topology) -> CoreMask {
        topo.fastest_mask() | self.occupied()
    }
}

impl Default for ExpressLanes {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
