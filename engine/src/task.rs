//! # Task Registry
//!
//! Mirrors the host's per-task load signals and queue membership. The
//! registry answers two questions the placement paths keep asking: how much
//! capacity does this task demand, and which tasks are runnable on a given
//! core right now.

extern crate alloc;

use alloc::vec::Vec;

use arrayvec::ArrayVec;
use bitflags::bitflags;
use hashbrown::HashMap;
use spin::RwLock;
use strata_types::{ClassId, CoreId, TaskId};

use crate::error::{EngineError, EngineResult};
use crate::mask::CoreMask;

/// Queue walks inspect at most this many tasks per core. Anything deeper is
/// churn the walk would only slow down.
pub const TRACK_TASK_COUNT: usize = 5;

bitflags! {
    /// Per-task markers the engine reads on every decision.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// Task drives the foreground surface the user is touching.
        const ON_TOP = 1 << 0;
        /// Background worker thread, placed for energy over latency.
        const WORKER = 1 << 1;
        /// Stuck runnable behind other work, flagged by the rescue sweep.
        const RUNNABLE_BUSY = 1 << 2;
        /// Picked up by the rescue sweep this tick.
        const RESCUE = 1 << 3;
        /// An upward migration for this task is in flight.
        const MIGRATING = 1 << 4;
    }
}

// ============================================================================
// TASK STATE
// ============================================================================

/// Mirrored state of one task.
#[derive(Debug, Clone, Copy)]
pub struct TaskState {
    /// Class the task belongs to.
    pub class: ClassId,
    /// Decayed running-time utilization.
    pub util_avg: u64,
    /// Enqueued utilization estimate.
    pub util_est: u64,
    /// Decayed load, the signal the upward-migration boundaries compare.
    pub load_avg: u64,
    /// Host-requested utilization floor.
    pub uclamp_min: u64,
    /// Host-requested utilization ceiling.
    pub uclamp_max: u64,
    /// Core the task's load currently counts against.
    pub on_core: CoreId,
    /// True while the task sits on a runqueue.
    pub runnable: bool,
    /// False until the first load report arrives.
    pub has_history: bool,
    /// Cores the task may run on.
    pub allowed: CoreMask,
    pub flags: TaskFlags,
}

impl TaskState {
    /// Plain running-time utilization.
    #[inline]
    pub fn util(&self) -> u64 {
        self.util_avg
    }

    /// Utilization held up by the enqueued estimate.
    #[inline]
    pub fn util_est(&self) -> u64 {
        self.util_avg.max(self.util_est)
    }

    /// Estimated utilization clamped into the host's requested band.
    #[inline]
    pub fn util_clamped(&self) -> u64 {
        self.util_est().clamp(self.uclamp_min, self.uclamp_max)
    }

    /// Load signal clamped into the requested band, consumed by the
    /// upward-migration boundaries.
    #[inline]
    pub fn load_clamped(&self) -> u64 {
        self.load_avg.clamp(self.uclamp_min, self.uclamp_max)
    }

    /// True if the host raised the task's utilization floor.
    #[inline]
    pub fn boosted_floor(&self) -> bool {
        self.uclamp_min > 0
    }
}

/// Fresh host-side load figures for one task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSample {
    pub util_avg: u64,
    pub util_est: u64,
    pub load_avg: u64,
}

// ============================================================================
// PER-CORE QUEUE
// ============================================================================

#[derive(Debug, Default)]
struct CoreQueue {
    /// Runnable tasks, including the one currently executing.
    tasks: Vec<TaskId>,
    /// The task currently executing, if any.
    running: Option<TaskId>,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Shared registry of every task the engine tracks.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskState>>,
    queues: Vec<RwLock<CoreQueue>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let mut queues = Vec::with_capacity(strata_types::MAX_CORES);
        for _ in 0..strata_types::MAX_CORES {
            queues.push(RwLock::new(CoreQueue::default()));
        }
        Self {
            tasks: RwLock::new(HashMap::new()),
            queues,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start tracking a task. `seed_util` primes the load signals so a new
    /// task is not mistaken for an idle one.
    pub fn attach(
        &self,
        task: TaskId,
        class: ClassId,
        allowed: CoreMask,
        on_core: CoreId,
        seed_util: u64,
    ) -> EngineResult<()> {
        if allowed.is_empty() {
            return Err(EngineError::invalid_config(
                "allowed",
                "a task needs at least one allowed core",
            ));
        }
        let state = TaskState {
            class,
            util_avg: seed_util,
            util_est: seed_util,
            load_avg: seed_util,
            uclamp_min: 0,
            uclamp_max: strata_types::CAPACITY_SCALE,
            on_core,
            runnable: false,
            has_history: seed_util > 0,
            allowed,
            flags: TaskFlags::empty(),
        };
        self.tasks.write().insert(task, state);
        Ok(())
    }

    /// Stop tracking a task. Returns its final state so callers can undo
    /// queue accounting.
    pub fn detach(&self, task: TaskId) -> EngineResult<TaskState> {
        let state = self
            .tasks
            .write()
            .remove(&task)
            .ok_or(EngineError::UnknownTask(task))?;
        if state.runnable {
            self.queue_remove(state.on_core, task);
        }
        Ok(state)
    }

    /// Copy of a task's state.
    pub fn get(&self, task: TaskId) -> EngineResult<TaskState> {
        self.tasks
            .read()
            .get(&task)
            .copied()
            .ok_or(EngineError::UnknownTask(task))
    }

    /// True if the task is tracked.
    pub fn holds(&self, task: TaskId) -> bool {
        self.tasks.read().contains_key(&task)
    }

    /// Number of tracked tasks.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    // ------------------------------------------------------------------
    // Host feed
    // ------------------------------------------------------------------

    /// Replace the load figures of one task.
    pub fn update(&self, task: TaskId, sample: TaskSample) -> EngineResult<()> {
        let mut tasks = self.tasks.write();
        let state = tasks.get_mut(&task).ok_or(EngineError::UnknownTask(task))?;
        state.util_avg = sample.util_avg;
        state.util_est = sample.util_est;
        state.load_avg = sample.load_avg;
        state.has_history = true;
        Ok(())
    }

    /// Replace the allowed-core mask.
    pub fn set_allowed(&self, task: TaskId, allowed: CoreMask) -> EngineResult<()> {
        if allowed.is_empty() {
            return Err(EngineError::invalid_config(
                "allowed",
                "a task needs at least one allowed core",
            ));
        }
        let mut tasks = self.tasks.write();
        let state = tasks.get_mut(&task).ok_or(EngineError::UnknownTask(task))?;
        state.allowed = allowed;
        Ok(())
    }

    /// Replace the utilization clamp band.
    pub fn set_uclamp(&self, task: TaskId, min: u64, max: u64) -> EngineResult<()> {
        if min > max || max > strata_types::CAPACITY_SCALE {
            return Err(EngineError::invalid_config(
                "uclamp",
                "band must satisfy min <= max <= 1024",
            ));
        }
        let mut tasks = self.tasks.write();
        let state = tasks.get_mut(&task).ok_or(EngineError::UnknownTask(task))?;
        state.uclamp_min = min;
        state.uclamp_max = max;
        Ok(())
    }

    /// Move a task to a different class.
    pub fn set_class(&self, task: TaskId, class: ClassId) -> EngineResult<()> {
        let mut tasks = self.tasks.write();
        let state = tasks.get_mut(&task).ok_or(EngineError::UnknownTask(task))?;
        state.class = class;
        Ok(())
    }

    /// Set or clear marker flags.
    pub fn set_flags(&self, task: TaskId, flags: TaskFlags, on: bool) -> EngineResult<()> {
        let mut tasks = self.tasks.write();
        let state = tasks.get_mut(&task).ok_or(EngineError::UnknownTask(task))?;
        if on {
            state.flags |= flags;
        } else {
            state.flags -= flags;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queue membership
    // ------------------------------------------------------------------

    /// Task became runnable on `core`.
    pub fn enqueue(&self, task: TaskId, core: CoreId) -> EngineResult<()> {
        let prev = {
            let mut tasks = self.tasks.write();
            let state = tasks.get_mut(&task).ok_or(EngineError::UnknownTask(task))?;
            let prev = (state.runnable && state.on_core != core).then_some(state.on_core);
            state.on_core = core;
            state.runnable = true;
            prev
        };
        if let Some(old) = prev {
            self.queue_remove(old, task);
        }

        let mut queue = self.queues[core.index()].write();
        if !queue.tasks.contains(&task) {
            queue.tasks.push(task);
        }
        Ok(())
    }

    /// Task left the runqueue.
    pub fn dequeue(&self, task: TaskId) -> EngineResult<()> {
        let mut tasks = self.tasks.write();
        let state = tasks.get_mut(&task).ok_or(EngineError::UnknownTask(task))?;
        let core = state.on_core;
        state.runnable = false;
        drop(tasks);

        self.queue_remove(core, task);
        Ok(())
    }

    /// Mark which task is executing on a core.
    pub fn set_running(&self, core: CoreId, task: Option<TaskId>) {
        self.queues[core.index()].write().running = task;
    }

    /// Task currently executing on a core.
    pub fn running_on(&self, core: CoreId) -> Option<TaskId> {
        self.queues[core.index()].read().running
    }

    /// Move a runnable task's accounting to another core without a host
    /// enqueue round trip. Used when a migration is applied.
    pub fn relocate(&self, task: TaskId, to: CoreId) -> EngineResult<()> {
        let mut tasks = self.tasks.write();
        let state = tasks.get_mut(&task).ok_or(EngineError::UnknownTask(task))?;
        let from = state.on_core;
        state.on_core = to;
        let runnable = state.runnable;
        drop(tasks);

        if runnable && from != to {
            self.queue_remove(from, task);
            let mut queue = self.queues[to.index()].write();
            if !queue.tasks.contains(&task) {
                queue.tasks.push(task);
            }
        }
        Ok(())
    }

    fn queue_remove(&self, core: CoreId, task: TaskId) {
        let mut queue = self.queues[core.index()].write();
        queue.tasks.retain(|t| *t != task);
        if queue.running == Some(task) {
            queue.running = None;
        }
    }

    /// First few runnable tasks on a core, in queue order.
    pub fn queued_on(&self, core: CoreId) -> ArrayVec<TaskId, TRACK_TASK_COUNT> {
        let queue = self.queues[core.index()].read();
        queue
            .tasks
            .iter()
            .take(TRACK_TASK_COUNT)
            .copied()
            .collect()
    }

    /// Runnable tasks on a core, including the running one.
    pub fn queue_len(&self, core: CoreId) -> usize {
        self.queues[core.index()].read().tasks.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
