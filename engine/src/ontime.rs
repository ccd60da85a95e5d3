//! Boundary-driven steering of long-running tasks between capacity groups.
//!
//! Each capacity group can carry a load band. A task below the band's lower
//! bound is light enough for any core; one inside the band may stay where it
//! is or move up; one past the upper bound has outgrown its group and should
//! run on something faster. Wakeup placement consults the band through
//! [`OntimeBounds::fit_cores`], the load balancer gates pulls through
//! [`OntimeBounds::can_migrate`], and the tick sweep uses
//! [`OntimeBounds::pick_heavy`] to find a task worth pushing upward.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use spin::RwLock;
use strata_types::{CoreId, TaskId};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::load::LoadMirror;
use crate::mask::CoreMask;
use crate::task::{TaskFlags, TaskRegistry, TaskState};
use crate::topology::Topology;

/// Share of the source core's utilization a task may hold and still be
/// shed downward from an overloaded core.
const DOWN_MIGRATION_PCT: u64 = 75;

// ============================================================================
// BOUNDARIES
// ============================================================================

/// Load band of one capacity group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    /// Below this load a task fits anywhere.
    pub lower: u64,
    /// At or above this load a task has outgrown the group.
    pub upper: u64,
}

/// What the tick sweep found on one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeavyPick {
    /// Nothing worth moving.
    None,
    /// A task past its group's upper bound.
    Heavy(TaskId),
    /// A boosted or on-top task that moves regardless of load.
    Boosted(TaskId),
}

/// Per-group load bands plus the placement queries built on them.
///
/// A group without a band places no restriction on its tasks.
pub struct OntimeBounds {
    bounds: RwLock<Vec<Option<Boundary>>>,
}

impl OntimeBounds {
    pub fn new(topo: &Topology) -> Self {
        Self {
            bounds: RwLock::new(vec![None; topo.groups().len()]),
        }
    }

    /// Set a group's band from percentages of its design capacity.
    pub fn set_boundary(
        &self,
        topo: &Topology,
        group: usize,
        lower_pct: u32,
        upper_pct: u32,
    ) -> EngineResult<()> {
        let Some(info) = topo.groups().get(group) else {
            return Err(EngineError::invalid_config(
                "ontime",
                "no such capacity group",
            ));
        };
        if lower_pct > upper_pct {
            return Err(EngineError::invalid_config(
                "ontime",
                "lower boundary above upper",
            ));
        }
        let cap = info.cap_orig;
        self.bounds.write()[group] = Some(Boundary {
            lower: cap * lower_pct as u64 / 100,
            upper: cap * upper_pct as u64 / 100,
        });
        Ok(())
    }

    /// Drop a group's band; its tasks roam freely again.
    pub fn clear_boundary(&self, group: usize) {
        if let Some(slot) = self.bounds.write().get_mut(group) {
            *slot = None;
        }
    }

    /// The band covering `core`, if one is set.
    pub fn boundary_of(&self, topo: &Topology, core: CoreId) -> Option<Boundary> {
        let idx = topo.group_of(core).index;
        self.bounds.read().get(idx).copied().flatten()
    }

    // ------------------------------------------------------------------
    // Placement queries
    // ------------------------------------------------------------------

    /// Candidate cores for a task of `load` currently homed on `src`.
    ///
    /// The result can be empty when a task on the fastest group has outgrown
    /// it; the filter treats that as no restriction.
    pub fn fit_cores(
        &self,
        topo: &Topology,
        enabled: bool,
        migrating: bool,
        load: u64,
        src: CoreId,
        active: CoreMask,
    ) -> CoreMask {
        if !enabled || migrating {
            return active;
        }
        let Some(bound) = self.boundary_of(topo, src) else {
            return active;
        };
        if load < bound.lower {
            return active;
        }

        let group = topo.group_of(src);
        let faster = topo.faster_mask(group.index);
        if load < bound.upper {
            (group.cores | faster) & active
        } else {
            faster & active
        }
    }

    /// Gate a balancer pull of `state`'s task onto `dst`.
    ///
    /// A move to a slower group is refused while the task sits inside its
    /// band, unless the source core is drowning and the task is only a
    /// small share of what it runs.
    pub fn can_migrate(
        &self,
        topo: &Topology,
        load: &LoadMirror,
        enabled: bool,
        state: &TaskState,
        dst: CoreId,
    ) -> bool {
        if !enabled {
            return true;
        }
        if state.flags.contains(TaskFlags::MIGRATING) {
            return false;
        }

        let src = state.on_core;
        let downward = !topo.same_group(src, dst) && topo.cap_orig(src) > topo.cap_orig(dst);
        if !downward {
            return true;
        }
        let Some(bound) = self.boundary_of(topo, src) else {
            return true;
        };
        if state.load_clamped() < bound.lower {
            return true;
        }
        load.is_overutilized(src)
            && state.util_est() * 100 < load.cpu_util(src) * DOWN_MIGRATION_PCT
    }

    /// Find the task the tick sweep should pull off `core`.
    ///
    /// The running task is examined first: an on-top or boost-carrying one
    /// moves unconditionally. Otherwise the heaviest task past the group's
    /// upper bound wins, and a boosted queued task trumps the lot.
    pub fn pick_heavy(
        &self,
        topo: &Topology,
        config: &EngineConfig,
        tasks: &TaskRegistry,
        core: CoreId,
    ) -> HeavyPick {
        let bound = self.boundary_of(topo, core);
        let mut candidate = None;
        let mut max_load = 0u64;

        if let Some(curr) = tasks.running_on(core) {
            if let Ok(state) = tasks.get(curr) {
                if state.flags.contains(TaskFlags::ON_TOP) || task_boosted(config, curr, &state) {
                    return HeavyPick::Boosted(curr);
                }
                if let Some(bound) = bound {
                    if ontime_on(config, &state) && state.load_clamped() >= bound.upper {
                        max_load = state.load_clamped();
                        candidate = Some(curr);
                    }
                }
            }
        }

        for task in tasks.queued_on(core) {
            let Ok(state) = tasks.get(task) else {
                continue;
            };
            if state.flags.contains(TaskFlags::MIGRATING) {
                continue;
            }
            if task_boosted(config, task, &state) {
                return HeavyPick::Boosted(task);
            }
            let Some(bound) = bound else {
                continue;
            };
            if !ontime_on(config, &state) {
                continue;
            }
            let load = state.load_clamped();
            if load >= bound.upper && load > max_load {
                max_load = load;
                candidate = Some(task);
            }
        }

        match candidate {
            Some(task) => HeavyPick::Heavy(task),
            None => HeavyPick::None,
        }
    }
}

fn ontime_on(config: &EngineConfig, state: &TaskState) -> bool {
    config
        .classes
        .get(state.class)
        .map(|class| class.ontime_enabled)
        .unwrap_or(false)
}

fn task_boosted(config: &EngineConfig, task: TaskId, state: &TaskState) -> bool {
    if config.boost.is_task_boosted(task) {
        return true;
    }
    config
        .classes
        .get(state.class)
        .map(|class| class.boosted())
        .unwrap_or(false)
        || state.boosted_floor()
}

// ============================================================================
// TESTS
// ============================================================================
