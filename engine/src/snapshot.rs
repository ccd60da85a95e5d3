//! # Placement Environment
//!
//! Every placement decision starts by freezing a consistent snapshot of all
//! candidate cores: utilization with and without the waking task, capacity,
//! queue depth, idle state. All later filtering and selection stages read
//! this snapshot, never live state, so one decision observes one world.
//!
//! The snapshot also resolves the selection policy for this decision by
//! running the task's class baseline through the boost promotion ladder.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use strata_types::{ClassId, CoreId, TaskId, MAX_CORES};

use crate::config::{BootBoost, ClassConfig, EngineConfig};
use crate::load::LoadMirror;
use crate::mask::CoreMask;
use crate::select::SchedPolicy;
use crate::task::{TaskFlags, TaskState};
use crate::topology::Topology;

// ============================================================================
// PER-CORE SNAPSHOT
// ============================================================================

/// One core's state as seen by one placement decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreStat {
    /// Design capacity at top frequency.
    pub cap_orig: u64,
    /// Capacity at the current operating frequency.
    pub cap_curr: u64,
    /// Utilization for comparisons: projected on the source core, current
    /// elsewhere.
    pub util: u64,
    /// Utilization without the waking task.
    pub util_wo: u64,
    /// Utilization with the waking task placed here.
    pub util_with: u64,
    /// Cumulative demand if the task landed here.
    pub util_cuml: u64,
    /// Decayed runnable load.
    pub runnable: u64,
    pub nr_running: u32,
    pub idle: bool,
    /// Wakeup cost of the idle state, nanoseconds.
    pub exit_latency: u64,
}

/// The capacity class placement starts the search from.
#[derive(Debug, Clone, Copy)]
pub struct StartCore {
    pub core: CoreId,
    pub cap: u64,
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Frozen inputs of one placement decision.
pub struct PlacementEnv {
    pub task: TaskId,
    pub class: ClassId,
    /// Core the task's load currently counts against.
    pub src: CoreId,
    pub policy: SchedPolicy,
    /// Task utilization, floored at one so energy math sees the task.
    pub task_util: u64,
    /// Clamped task utilization, floored at one.
    pub task_util_clamped: u64,
    pub flags: TaskFlags,
    pub on_top: bool,
    pub boosted: bool,
    pub latency_sensitive: bool,
    /// Synchronous-wakeup hint from the host.
    pub sync: bool,
    /// False when the migration engine asks where a running task would go.
    pub wake: bool,
    /// System is suspending; capacity-class filters relax.
    pub suspending: bool,
    pub start: StartCore,
    /// Active cores at snapshot time. Group-wide sums read these, not the
    /// live mirror.
    pub active: CoreMask,
    /// Candidate cores: task affinity intersected with active cores.
    pub allowed: CoreMask,
    /// Survivors of the filter pipeline. Always a subset of `allowed`.
    pub fit: CoreMask,
    /// Idle cores within the fit set.
    pub idle_count: u32,
    stats: Vec<CoreStat>,
}

impl PlacementEnv {
    /// Snapshot of one core. Cores outside the allowed set read as zeroed.
    #[inline]
    pub fn stat(&self, core: CoreId) -> &CoreStat {
        &self.stats[core.index()]
    }

    /// Count idle cores once the fit set is final.
    pub fn finalize_fit(&mut self) {
        self.idle_count = self
            .fit
            .iter()
            .filter(|core| self.stats[core.index()].idle)
            .count() as u32;
    }

    /// Idle cores within an arbitrary mask.
    pub fn idle_in(&self, mask: CoreMask) -> CoreMask {
        mask.iter()
            .filter(|core| self.stats[core.index()].idle)
            .collect()
    }
}

impl core::fmt::Debug for PlacementEnv {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PlacementEnv")
            .field("task", &self.task)
            .field("src", &self.src)
            .field("policy", &self.policy)
            .field("allowed", &self.allowed)
            .field("fit", &self.fit)
            .finish()
    }
}

/// What environment construction concluded.
#[derive(Debug)]
pub enum EnvOutcome {
    /// No core is allowed; the caller has no advice to give.
    NoCandidate,
    /// The decision is already made, no pipeline needed.
    Decided(CoreId),
    /// Full pipeline required.
    Ready(PlacementEnv),
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// Build the environment for one decision.
///
/// Short-circuits without a full snapshot when the allowed set collapses to
/// a single core or the fast path holds the task on its previous core.
pub fn build_env(
    topo: &Topology,
    load: &LoadMirror,
    config: &EngineConfig,
    model_ready: bool,
    task: TaskId,
    state: &TaskState,
    class: &ClassConfig,
    prev: CoreId,
    sync: bool,
    wake: bool,
) -> EnvOutcome {
    let active = load.active_mask() & topo.all_cores();
    let allowed = active & state.allowed;
    if allowed.is_empty() {
        return EnvOutcome::NoCandidate;
    }
    if allowed.weight() == 1 {
        if let Some(core) = allowed.first() {
            return EnvOutcome::Decided(core);
        }
    }

    let on_top = state.flags.contains(TaskFlags::ON_TOP);
    let boosted = class.boosted() || state.boosted_floor();
    let suspending = config.is_suspending();

    let start = select_start_core(topo, load, config, state, boosted, on_top, suspending);

    // Cache-affinity shortcut: an idle, lightly loaded previous core of the
    // starting capacity class keeps the task without a full snapshot.
    if allowed.contains(prev)
        && load.is_idle(prev)
        && !load.is_overutilized(prev)
        && topo.cap_orig(prev) == start.cap
    {
        return EnvOutcome::Decided(prev);
    }

    let task_util = state.util().max(1);
    let task_util_clamped = state.util_clamped().max(1);

    // Stats cover every active core, not just allowed ones: group-wide
    // energy sums need the neighbors too.
    let mut stats = vec![CoreStat::default(); MAX_CORES];
    for core in active.iter() {
        let idx = core.index();
        let counted_here = state.on_core == core && state.has_history;
        let cap_orig = topo.cap_orig(core);
        let rt_util = load.rt_util(core);

        let util_wo =
            (load.cpu_util_without(core, state.util(), counted_here) + rt_util).min(cap_orig);
        let util_with = (load
            .cpu_util_with(core, state.util(), state.util_est(), counted_here)
            + rt_util)
            .min(cap_orig);
        let util = if core == prev { util_with } else { util_wo };

        let mut util_cuml = (util + task_util_clamped).min(cap_orig);
        if counted_here {
            util_cuml = util_cuml.saturating_sub(task_util);
        }

        stats[idx] = CoreStat {
            cap_orig,
            cap_curr: load.cap_curr(core),
            util,
            util_wo,
            util_with,
            util_cuml,
            runnable: load.runnable_avg(core),
            nr_running: load.nr_running(core),
            idle: load.is_idle(core),
            exit_latency: load.exit_latency(core),
        };
    }

    let policy = resolve_policy(
        config,
        class,
        state.flags,
        boosted,
        on_top,
        task,
        task_util,
        model_ready,
    );

    EnvOutcome::Ready(PlacementEnv {
        task,
        class: state.class,
        src: prev,
        policy,
        task_util,
        task_util_clamped,
        flags: state.flags,
        on_top,
        boosted,
        latency_sensitive: class.latency_sensitive,
        sync,
        wake,
        suspending,
        start,
        active,
        allowed,
        fit: CoreMask::new(),
        idle_count: 0,
        stats,
    })
}

/// Pick the capacity class the search starts from: the slowest active core,
/// promoted to the fastest class for boosted or on-top placements that may
/// run there.
fn select_start_core(
    topo: &Topology,
    load: &LoadMirror,
    config: &EngineConfig,
    state: &TaskState,
    boosted: bool,
    on_top: bool,
    suspending: bool,
) -> StartCore {
    let active = load.active_mask();
    let slow_start = (topo.slowest_mask() & active)
        .first()
        .or_else(|| active.first())
        .unwrap_or(CoreId::from_index(0));

    let mut start = slow_start;

    // Fast cores wind down first on suspend, keep recommendations off them.
    if !suspending && state.allowed.intersects(&topo.fastest_mask()) {
        let active_fast = topo.fastest_mask() & active;
        if let Some(fast) = active_fast.first() {
            let boot = config.boost.boot() != BootBoost::None;
            if boosted || on_top || config.boost.global_active() || boot {
                start = fast;
            }
        }
    }

    StartCore {
        core: start,
        cap: topo.cap_orig(start),
    }
}

/// Run the class's baseline policy through the boost promotion ladder.
#[allow(clippy::too_many_arguments)]
fn resolve_policy(
    config: &EngineConfig,
    class: &ClassConfig,
    flags: TaskFlags,
    boosted: bool,
    on_top: bool,
    task: TaskId,
    task_util: u64,
    model_ready: bool,
) -> SchedPolicy {
    use crate::config::BoostResponse;

    let tunables = config.tunables();
    let mut policy = class.policy;

    if on_top || config.boost.boot() == BootBoost::Init {
        return SchedPolicy::Performance;
    }
    if config.boost.global_active() && class.boost_response == BoostResponse::Performance {
        return SchedPolicy::Performance;
    }
    if policy >= SchedPolicy::Performance {
        return policy;
    }

    if config.boost.is_task_boosted(task) {
        return SchedPolicy::SemiPerformance;
    }
    if boosted
        || (config.boost.global_active() && class.boost_response == BoostResponse::SemiPerformance)
        || config.boost.boot() == BootBoost::Boot
    {
        return SchedPolicy::SemiPerformance;
    }

    // Background worker units never chase latency.
    if class.worker || flags.contains(TaskFlags::WORKER) {
        policy = SchedPolicy::Energy;
    }
    if policy >= SchedPolicy::SemiPerformance {
        return policy;
    }

    if policy == SchedPolicy::Efficiency && task_util <= tunables.small_task_util() {
        policy = SchedPolicy::Energy;
    }

    // Energy comparisons need the model's tables.
    if policy == SchedPolicy::Energy && !model_ready {
        policy = SchedPolicy::MinUtil;
    }

    policy
}

// ============================================================================
// TESTS
// ============================================================================
