//! # Load Mirror
//!
//! The engine does not measure load itself; the host scheduler owns the
//! decayed utilization signals and feeds them in. This module mirrors those
//! signals per core and derives the views every placement path consumes:
//! utilization with or without a waking task, busy and free classification,
//! and idle bookkeeping.

extern crate alloc;

use alloc::vec::Vec;

use spin::RwLock;
use strata_types::CoreId;

use crate::error::{EngineError, EngineResult};
use crate::mask::CoreMask;
use crate::topology::Topology;

/// A core is busy when demand outstrips supply by this margin:
/// `util * BUSY_CORE_RATIO < runnable * 100` with runnable at capacity.
pub const BUSY_CORE_RATIO: u64 = 150;

/// A core is free when utilization is below `cap_orig >> FREE_CORE_SHIFT`,
/// roughly three percent of its capacity.
pub const FREE_CORE_SHIFT: u32 = 5;

/// Demand beats eighty percent of supply.
#[inline(always)]
pub fn check_busy(util: u64, capacity: u64) -> bool {
    util * 100 >= capacity * 80
}

/// Utilization exceeds capacity by the 1280/1024 overutilization margin.
#[inline(always)]
pub fn overutilized(capacity: u64, util: u64) -> bool {
    capacity * 1024 < util * 1280
}

// ============================================================================
// PER-CORE SLOT
// ============================================================================

/// Mirrored load state of one core.
#[derive(Debug, Clone, Copy)]
struct CoreSlot {
    /// Decayed running-time utilization.
    util_avg: u64,
    /// Enqueued utilization estimate, held up while tasks sleep.
    util_est: u64,
    /// Decayed runnable-time load, grows under contention.
    runnable_avg: u64,
    /// Utilization claimed by realtime work.
    rt_util: u64,
    /// Capacity at the current operating frequency.
    cap_curr: u64,
    /// Design capacity at the top frequency.
    cap_orig: u64,
    /// Runnable tasks on the core, including the running one.
    nr_running: u32,
    /// True while the core sits in an idle state.
    idle: bool,
    /// Wakeup cost of the idle state the core entered, in nanoseconds.
    exit_latency: u64,
}

/// Fresh host-side load figures for one core.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreSample {
    pub util_avg: u64,
    pub util_est: u64,
    pub runnable_avg: u64,
    pub rt_util: u64,
}

// ============================================================================
// LOAD MIRROR
// ============================================================================

/// Per-core mirror of the host's load tracking.
pub struct LoadMirror {
    slots: Vec<RwLock<CoreSlot>>,
    /// Cores currently eligible to run work.
    active: RwLock<CoreMask>,
    all: CoreMask,
}

impl LoadMirror {
    /// Build the mirror with one slot per topology core. Every core starts
    /// active, idle, and at its design capacity.
    pub fn new(topo: &Topology) -> Self {
        let mut slots = Vec::with_capacity(strata_types::MAX_CORES);
        for idx in 0..strata_types::MAX_CORES {
            let core = CoreId::from_index(idx);
            let cap = if topo.holds(core) { topo.cap_orig(core) } else { 0 };
            slots.push(RwLock::new(CoreSlot {
                util_avg: 0,
                util_est: 0,
                runnable_avg: 0,
                rt_util: 0,
                cap_curr: cap,
                cap_orig: cap,
                nr_running: 0,
                idle: true,
                exit_latency: 0,
            }));
        }
        Self {
            slots,
            active: RwLock::new(topo.all_cores()),
            all: topo.all_cores(),
        }
    }

    fn check_core(&self, core: CoreId) -> EngineResult<()> {
        if !self.all.contains(core) {
            return Err(EngineError::InvalidCore(core));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Host feed
    // ------------------------------------------------------------------

    /// Replace the load figures of one core.
    pub fn update(&self, core: CoreId, sample: CoreSample) -> EngineResult<()> {
        self.check_core(core)?;
        let mut slot = self.slots[core.index()].write();
        slot.util_avg = sample.util_avg;
        slot.util_est = sample.util_est;
        slot.runnable_avg = sample.runnable_avg;
        slot.rt_util = sample.rt_util;
        Ok(())
    }

    /// Update the frequency-scaled capacity, clamped to the design capacity.
    pub fn set_cap_curr(&self, core: CoreId, cap: u64) -> EngineResult<()> {
        self.check_core(core)?;
        let mut slot = self.slots[core.index()].write();
        slot.cap_curr = cap.min(slot.cap_orig);
        Ok(())
    }

    /// Core entered an idle state whose wakeup costs `exit_latency` ns.
    pub fn idle_enter(&self, core: CoreId, exit_latency: u64) -> EngineResult<()> {
        self.check_core(core)?;
        let mut slot = self.slots[core.index()].write();
        slot.idle = true;
        slot.exit_latency = exit_latency;
        Ok(())
    }

    /// Core left idle.
    pub fn idle_exit(&self, core: CoreId) -> EngineResult<()> {
        self.check_core(core)?;
        let mut slot = self.slots[core.index()].write();
        slot.idle = false;
        slot.exit_latency = 0;
        Ok(())
    }

    /// Mark a core eligible or ineligible for placement.
    pub fn set_active(&self, core: CoreId, active: bool) -> EngineResult<()> {
        self.check_core(core)?;
        let mut mask = self.active.write();
        if active {
            mask.set(core);
        } else {
            mask.clear(core);
        }
        Ok(())
    }

    pub(crate) fn nr_running_inc(&self, core: CoreId) {
        let mut slot = self.slots[core.index()].write();
        slot.nr_running += 1;
        slot.idle = false;
    }

    pub(crate) fn nr_running_dec(&self, core: CoreId) {
        let mut slot = self.slots[core.index()].write();
        slot.nr_running = slot.nr_running.saturating_sub(1);
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Cores currently eligible to run work.
    #[inline]
    pub fn active_mask(&self) -> CoreMask {
        *self.active.read()
    }

    /// Utilization of a core: the larger of the decayed average and the
    /// enqueued estimate, never above the design capacity.
    pub fn cpu_util(&self, core: CoreId) -> u64 {
        let slot = self.slots[core.index()].read();
        slot.util_avg.max(slot.util_est).min(slot.cap_orig)
    }

    /// Utilization with one task's contribution removed. Tasks counted on a
    /// different core, or with no load history yet, contribute nothing.
    pub fn cpu_util_without(&self, core: CoreId, task_util: u64, counted_here: bool) -> u64 {
        let slot = self.slots[core.index()].read();
        let mut util = slot.util_avg;
        if counted_here {
            util = util.saturating_sub(task_util);
        }
        util.min(slot.cap_orig)
    }

    /// Utilization with a waking task placed on this core. The task's own
    /// contribution moves: removed if already counted here, then re-added
    /// through its enqueued estimate.
    pub fn cpu_util_with(
        &self,
        core: CoreId,
        task_util: u64,
        task_util_est: u64,
        counted_here: bool,
    ) -> u64 {
        let slot = self.slots[core.index()].read();
        let mut util = slot.util_avg;
        if counted_here {
            util = util.saturating_sub(task_util);
        }
        util += task_util_est.max(1);
        util.min(slot.cap_orig)
    }

    pub fn runnable_avg(&self, core: CoreId) -> u64 {
        self.slots[core.index()].read().runnable_avg
    }

    pub fn rt_util(&self, core: CoreId) -> u64 {
        self.slots[core.index()].read().rt_util
    }

    pub fn cap_curr(&self, core: CoreId) -> u64 {
        self.slots[core.index()].read().cap_curr
    }

    pub fn cap_orig(&self, core: CoreId) -> u64 {
        self.slots[core.index()].read().cap_orig
    }

    pub fn nr_running(&self, core: CoreId) -> u32 {
        self.slots[core.index()].read().nr_running
    }

    pub fn is_idle(&self, core: CoreId) -> bool {
        self.slots[core.index()].read().idle
    }

    pub fn exit_latency(&self, core: CoreId) -> u64 {
        self.slots[core.index()].read().exit_latency
    }

    /// A core is busy when its runnable load reached capacity, it has work,
    /// and utilization trails runnable load by more than the contention
    /// margin. High runnable with low running time means tasks are waiting.
    pub fn is_busy(&self, core: CoreId) -> bool {
        let slot = self.slots[core.index()].read();
        let util = slot.util_avg.max(slot.util_est).min(slot.cap_orig);
        if slot.runnable_avg < slot.cap_orig {
            return false;
        }
        if slot.nr_running == 0 {
            return false;
        }
        if util * BUSY_CORE_RATIO >= slot.runnable_avg * 100 {
            return false;
        }
        true
    }

    /// True when the core's utilization pushed past the overutilization
    /// margin of its design capacity.
    pub fn is_overutilized(&self, core: CoreId) -> bool {
        let slot = self.slots[core.index()].read();
        let util = slot.util_avg.max(slot.util_est).min(slot.cap_orig);
        overutilized(slot.cap_orig, util)
    }

    /// Cores with almost no utilization, the fallback when every allowed
    /// core is over capacity.
    pub fn free_mask(&self, among: CoreMask) -> CoreMask {
        let mut mask = CoreMask::new();
        for core in among.iter() {
            let slot = self.slots[core.index()].read();
            let util = slot.util_avg.max(slot.util_est).min(slot.cap_orig);
            if util < slot.cap_orig >> FREE_CORE_SHIFT {
                mask.set(core);
            }
        }
        mask
    }

    /// Busy cores within `among`.
    pub fn busy_mask(&self, among: CoreMask) -> CoreMask {
        let mut mask = CoreMask::new();
        for core in among.iter() {
            if self.is_busy(core) {
                mask.set(core);
            }
        }
        mask
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;

    fn topo() -> Topology {
        Topology::builder()
            .with_group(CoreMask::from_bits(0x0f), 430)
            .with_group(CoreMask::from_bits(0xf0), 1024)
            .build()
            .unwrap()
    }

    fn core(idx: usize) -> CoreId {
        CoreId::from_index(idx)
    }

    #[test]
    fn test_util_views_clamp_to_capacity() {
        let mirror = LoadMirror::new(&topo());
        mirror
            .update(
                core(1),
                CoreSample {
                    util_avg: 2000,
                    util_est: 100,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(mirror.cpu_util(core(1)), 430);
        assert_eq!(mirror.cpu_util_with(core(1), 0, 600, false), 430);
        assert_eq!(mirror.cpu_util_without(core(1), 0, false), 430);
    }

    #[test]
    fn test_util_without_discounts_only_here() {
        let mirror = LoadMirror::new(&topo());
        mirror
            .update(
                core(4),
                CoreSample {
                    util_avg: 300,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(mirror.cpu_util_without(core(4), 120, true), 180);
        assert_eq!(mirror.cpu_util_without(core(4), 120, false), 300);
        // Oversized contribution saturates at zero
        assert_eq!(mirror.cpu_util_without(core(4), 500, true), 0);
    }

    #[test]
    fn test_util_with_moves_contribution() {
        let mirror = LoadMirror::new(&topo());
        mirror
            .update(
                core(5),
                CoreSample {
                    util_avg: 200,
                    ..Default::default()
                },
            )
            .unwrap();
        // Already counted here: remove 150, add back the estimate 180
        assert_eq!(mirror.cpu_util_with(core(5), 150, 180, true), 230);
        // Counted elsewhere: estimate lands on top
        assert_eq!(mirror.cpu_util_with(core(5), 150, 180, false), 380);
        // Zero-estimate tasks still count for at least one unit
        assert_eq!(mirror.cpu_util_with(core(5), 0, 0, false), 201);
    }

    #[test]
    fn test_busy_classification() {
        let mirror = LoadMirror::new(&topo());
        let c = core(0);
        mirror
            .update(
                c,
                CoreSample {
                    util_avg: 100,
                    runnable_avg: 500,
                    ..Default::default()
                },
            )
            .unwrap();
        // No runnable task yet
        assert!(!mirror.is_busy(c));
        mirror.nr_running_inc(c);
        assert!(mirror.is_busy(c));
        // High utilization relative to runnable load is throughput, not queueing
        mirror
            .update(
                c,
                CoreSample {
                    util_avg: 400,
                    runnable_avg: 500,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!mirror.is_busy(c));
    }

    #[test]
    fn test_free_mask() {
        let mirror = LoadMirror::new(&topo());
        mirror
            .update(
                core(0),
                CoreSample {
                    util_avg: 5,
                    ..Default::default()
                },
            )
            .unwrap();
        mirror
            .update(
                core(1),
                CoreSample {
                    util_avg: 100,
                    ..Default::default()
                },
            )
            .unwrap();
        let free = mirror.free_mask(CoreMask::from_bits(0x03));
        assert!(free.contains(core(0)));
        assert!(!free.contains(core(1)));
    }

    #[test]
    fn test_active_mask_and_validation() {
        let mirror = LoadMirror::new(&topo());
        assert_eq!(mirror.active_mask().bits(), 0xff);
        mirror.set_active(core(7), false).unwrap();
        assert_eq!(mirror.active_mask().bits(), 0x7f);
        assert!(mirror.update(core(9), CoreSample::default()).is_err());
    }

    #[test]
    fn test_idle_bookkeeping() {
        let mirror = LoadMirror::new(&topo());
        mirror.idle_enter(core(2), 1500).unwrap();
        assert!(mirror.is_idle(core(2)));
        assert_eq!(mirror.exit_latency(core(2)), 1500);
        mirror.idle_exit(core(2)).unwrap();
        assert!(!mirror.is_idle(core(2)));
        assert_eq!(mirror.exit_latency(core(2)), 0);
    }
}
