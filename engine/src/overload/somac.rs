//! Emergency redistribution for the Critical state.
//!
//! Once per interval while the system stays Critical, the rotor plans a
//! batch of forced moves: tasks leave overloaded cores for idle ones when
//! both exist, and failing that, slow and fast capacity siblings trade
//! their heaviest and lightest queued tasks. The plan is handed to the
//! migration hub, whose drain re-validates every move before it happens.

use arrayvec::ArrayVec;
use core::sync::atomic::{AtomicU64, Ordering};
use strata_types::{CoreId, TaskId, MAX_CORES};

use crate::error::{EngineError, EngineResult};
use crate::load::LoadMirror;
use crate::mask::CoreMask;
use crate::task::{TaskFlags, TaskRegistry};
use crate::topology::Topology;

/// Default ticks between rotation sweeps.
const SOMAC_INTERVAL: u64 = 1;

/// One forced move in a rotation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SomacMove {
    pub task: TaskId,
    pub src: CoreId,
    pub dst: CoreId,
}

/// Plans the Critical-state redistribution batches.
pub struct SomacRotor {
    interval: AtomicU64,
    last_run: AtomicU64,
}

impl SomacRotor {
    pub fn new() -> Self {
        Self {
            interval: AtomicU64::new(SOMAC_INTERVAL),
            last_run: AtomicU64::new(0),
        }
    }

    pub fn set_interval(&self, ticks: u64) -> EngineResult<()> {
        if ticks == 0 {
            return Err(EngineError::invalid_config(
                "somac_interval",
                "must be at least one tick",
            ));
        }
        self.interval.store(ticks, Ordering::Relaxed);
        Ok(())
    }

    /// Claim this tick for a sweep. At most one claim per interval.
    fn claim(&self, tick: u64) -> bool {
        let last = self.last_run.load(Ordering::Relaxed);
        if tick.saturating_sub(last) < self.interval.load(Ordering::Relaxed) {
            return false;
        }
        self.last_run
            .compare_exchange(last, tick, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Plan one redistribution batch, empty when the sweep is not due.
    pub fn plan(
        &self,
        tick: u64,
        topo: &Topology,
        load: &LoadMirror,
        tasks: &TaskRegistry,
    ) -> ArrayVec<SomacMove, MAX_CORES> {
        let mut moves = ArrayVec::new();
        if !self.claim(tick) {
            return moves;
        }

        let active = load.active_mask() & topo.all_cores();
        let mut overloaded = CoreMask::new();
        let mut idle = CoreMask::new();
        for core in active.iter() {
            if load.is_overutilized(core) {
                overloaded.set(core);
            } else if load.is_idle(core) {
                idle.set(core);
            }
        }

        if overloaded.any() && idle.any() {
            let mut idle_iter = idle.iter();
            for src in overloaded.iter() {
                let Some(dst) = idle_iter.next() else { break };
                if let Some(task) = heaviest_queued(tasks, src) {
                    let _ = moves.try_push(SomacMove { task, src, dst });
                }
            }
            return moves;
        }

        // No drained pairing available: rotate between capacity siblings.
        let mut fast_iter = (topo.fastest_mask() & active).iter();
        for src in (topo.slowest_mask() & active).iter() {
            let Some(dst) = fast_iter.next() else { break };
            if let Some(task) = heaviest_queued(tasks, src) {
                let _ = moves.try_push(SomacMove { task, src, dst });
            }
            if let Some(task) = lightest_queued(tasks, dst) {
                let _ = moves.try_push(SomacMove { task, src: dst, dst: src });
            }
        }
        moves
    }
}

impl Default for SomacRotor {
    fn default() -> Self {
        Self::new()
    }
}

/// Heaviest waiting task on `core`, excluding the one running and any
/// already in flight.
fn heaviest_queued(tasks: &TaskRegistry, core: CoreId) -> Option<TaskId> {
    pick_queued(tasks, core, |load, best| load > best)
}

/// Lightest waiting task on `core`, same exclusions.
fn lightest_queued(tasks: &TaskRegistry, core: CoreId) -> Option<TaskId> {
    pick_queued(tasks, core, |load, best| load < best)
}

fn pick_queued(
    tasks: &TaskRegistry,
    core: CoreId,
    better: impl Fn(u64, u64) -> bool,
) -> Option<TaskId> {
    let running = tasks.running_on(core);
    let mut best = None;
    let mut best_load = 0u64;
    for task in tasks.queued_on(core) {
        if Some(task) == running {
            continue;
        }
        let Ok(state) = tasks.get(task) else {
            continue;
        };
        if state.flags.contains(TaskFlags::MIGRATING) {
            continue;
        }
        let load = state.load_clamped();
        if best.is_none() || better(load, best_load) {
            best_load = load;
            best = Some(task);
        }
    }
    best
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::CoreSample;
    use crate::mask::CoreMask;
    use strata_types::ClassId;

    fn core(idx: usize) -> CoreId {
        CoreId::from_index(idx)
    }

    fn topo() -> Topology {
        Topology::builder()
            .with_group(CoreMask::from_bits(0x0f), 384)
            .with_group(CoreMask::from_bits(0xf0), 1024)
            .build()
            .unwrap()
    }

    fn queue(tasks: &TaskRegistry, id: u64, on: usize, util: u64) -> TaskId {
        let task = TaskId::new(id);
        tasks
            .attach(task, ClassId::new(0), CoreMask::from_bits(0xff), core(on), util)
            .unwrap();
        tasks.enqueue(task, core(on)).unwrap();
        task
    }

    fn overload_core(load: &LoadMirror, idx: usize) {
        load.idle_exit(core(idx)).unwrap();
        load.update(
            core(idx),
            CoreSample { util_avg: 380, ..Default::default() },
        )
        .unwrap();
    }

    #[test]
    fn test_sweep_waits_for_its_interval() {
        let topo = topo();
        let load = LoadMirror::new(&topo);
        let tasks = TaskRegistry::new();
        let rotor = SomacRotor::new();
        rotor.set_interval(8).unwrap();

        assert!(rotor.plan(3, &topo, &load, &tasks).is_empty());
        // Due at the interval; immediately after, it is spent.
        let _ = rotor.plan(8, &topo, &load, &tasks);
        assert!(rotor.plan(9, &topo, &load, &tasks).is_empty());
    }

    #[test]
    fn test_overloaded_cores_drain_to_idle_ones() {
        let topo = topo();
        let load = LoadMirror::new(&topo);
        let tasks = TaskRegistry::new();
        let rotor = SomacRotor::new();

        overload_core(&load, 1);
        let heavy = queue(&tasks, 1, 1, 300);
        queue(&tasks, 2, 1, 100);

        let moves = rotor.plan(8, &topo, &load, &tasks);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].task, heavy);
        assert_eq!(moves[0].src, core(1));
        // Destination is one of the still idle cores.
        assert!(load.is_idle(moves[0].dst));
    }

    #[test]
    fn test_rotation_pairs_capacity_siblings() {
        let topo = topo();
        let load = LoadMirror::new(&topo);
        let tasks = TaskRegistry::new();
        let rotor = SomacRotor::new();

        // Everything awake and moderately loaded: no overloaded/idle pair.
        for idx in 0..8 {
            load.idle_exit(core(idx)).unwrap();
            load.update(
                core(idx),
                CoreSample { util_avg: 100, ..Default::default() },
            )
            .unwrap();
        }
        let slow_heavy = queue(&tasks, 1, 0, 300);
        queue(&tasks, 2, 0, 50);
        let fast_light = queue(&tasks, 3, 4, 40);
        queue(&tasks, 4, 4, 200);

        let moves = rotor.plan(8, &topo, &load, &tasks);
        assert!(moves.contains(&SomacMove {
            task: slow_heavy,
            src: core(0),
            dst: core(4),
        }));
        assert!(moves.contains(&SomacMove {
            task: fast_light,
            src: core(4),
            dst: core(0),
        }));
    }

    #[test]
    fn test_running_task_stays_put() {
        let topo = topo();
        let load = LoadMirror::new(&topo);
        let tasks = TaskRegistry::new();
        let rotor = SomacRotor::new();

        overload_core(&load, 1);
        let runner = queue(&tasks, 1, 1, 300);
        tasks.set_running(core(1), Some(runner));

        let moves = rotor.plan(8, &topo, &load, &tasks);
        assert!(moves.is_empty());
    }
}
