//! # Placement Engine
//!
//! The facade every host callback lands on. One [`PlacementEngine`] owns
//! the subsystems and wires them together: lifecycle events and load
//! reports keep the mirrors current, the periodic tick drives profiling
//! and the migration sweeps, and the placement query runs the snapshot,
//! filter, and selector pipeline. Everything executes inline on the
//! calling core; the only deferred work is observer notification, queued
//! at tick time and delivered by [`PlacementEngine::drain_deferred`].

use core::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};
use strata_types::{ClassId, CoreId, TaskId, CAPACITY_SCALE};

use crate::bus::{OverloadBus, OverloadSubscription};
use crate::config::{BootBoost, ClassPinning, EngineConfig};
use crate::energy::{EnergyModel, FreqStep, GroupWeights, TableSpec};
use crate::error::{EngineError, EngineResult};
use crate::filter::{self, ExpressLanes, FitContext};
use crate::load::{check_busy, CoreSample, LoadMirror};
use crate::mask::CoreMask;
use crate::migrate::{MigrationHub, MigrationIntent};
use crate::ontime::{HeavyPick, OntimeBounds};
use crate::overload::{
    OverloadMonitor, OverloadSignals, OverloadState, OverloadStatus, SomacRotor,
};
use crate::ratio::{DemandHint, RatioSnapshot, RatioTracker};
use crate::select::{self, SchedPolicy};
use crate::snapshot::{self, EnvOutcome, PlacementEnv};
use crate::task::{TaskFlags, TaskRegistry, TaskSample};
use crate::topology::Topology;
use crate::work::NotifyQueue;

/// Host tick period in nanoseconds. The overload monitor and the sweep
/// cadences count ticks of this length.
pub const TICK_PERIOD_NS: u64 = 4_000_000;

// ============================================================================
// COUNTERS
// ============================================================================

/// Running totals since construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub placements: u64,
    pub fast_path: u64,
    pub policy_downgrades: u64,
    pub migrations_submitted: u64,
    pub migrations_applied: u64,
    pub migrations_abandoned: u64,
    pub overload_transitions: u64,
}

struct Counters {
    placements: AtomicU64,
    fast_path: AtomicU64,
    policy_downgrades: AtomicU64,
    migrations_submitted: AtomicU64,
    migrations_applied: AtomicU64,
    migrations_abandoned: AtomicU64,
    overload_transitions: AtomicU64,
}

impl Counters {
    const fn new() -> Self {
        Self {
            placements: AtomicU64::new(0),
            fast_path: AtomicU64::new(0),
            policy_downgrades: AtomicU64::new(0),
            migrations_submitted: AtomicU64::new(0),
            migrations_applied: AtomicU64::new(0),
            migrations_abandoned: AtomicU64::new(0),
            overload_transitions: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            placements: self.placements.load(Ordering::Relaxed),
            fast_path: self.fast_path.load(Ordering::Relaxed),
            policy_downgrades: self.policy_downgrades.load(Ordering::Relaxed),
            migrations_submitted: self.migrations_submitted.load(Ordering::Relaxed),
            migrations_applied: self.migrations_applied.load(Ordering::Relaxed),
            migrations_abandoned: self.migrations_abandoned.load(Ordering::Relaxed),
            overload_transitions: self.overload_transitions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The decision engine. One instance serves the whole machine and every
/// method is safe to call from any core concurrently.
pub struct PlacementEngine {
    topo: Topology,
    load: LoadMirror,
    tasks: TaskRegistry,
    config: EngineConfig,
    model: EnergyModel,
    express: ExpressLanes,
    bounds: OntimeBounds,
    ratio: RatioTracker,
    hub: MigrationHub,
    monitor: OverloadMonitor,
    rotor: SomacRotor,
    bus: OverloadBus,
    notify: NotifyQueue,
    counters: Counters,
}

impl PlacementEngine {
    /// Stand the engine up for `topo`. Every core starts active, idle, and
    /// at design capacity; the energy model reports not-ready until each
    /// group registers a table.
    pub fn new(topo: Topology) -> Self {
        let load = LoadMirror::new(&topo);
        let bounds = OntimeBounds::new(&topo);
        let ratio = RatioTracker::new(&topo);
        let model = EnergyModel::new(&topo);
        debug!(
            "engine: up with {} cores in {} groups",
            topo.nr_cores(),
            topo.groups().len()
        );
        Self {
            load,
            bounds,
            ratio,
            model,
            tasks: TaskRegistry::new(),
            config: EngineConfig::new(),
            express: ExpressLanes::new(),
            hub: MigrationHub::new(),
            monitor: OverloadMonitor::new(),
            rotor: SomacRotor::new(),
            bus: OverloadBus::new(),
            notify: NotifyQueue::new(),
            counters: Counters::new(),
            topo,
        }
    }

    // ------------------------------------------------------------------
    // Task lifecycle
    // ------------------------------------------------------------------

    /// Admit a forked task. Its utilization is seeded from the starting
    /// core's capacity and its first activity window opens boost-armed.
    pub fn task_fork(
        &self,
        task: TaskId,
        class: ClassId,
        allowed: CoreMask,
        core: CoreId,
        now: u64,
    ) -> EngineResult<()> {
        if !self.topo.holds(core) {
            return Err(EngineError::InvalidCore(core));
        }
        let seed = self
            .config
            .tunables()
            .new_task_util(self.topo.cap_orig(core));
        self.tasks.attach(task, class, allowed, core, seed)?;
        self.ratio.mark_new_task(core, now)?;
        debug!("engine: {:?} forked on {:?} seeded at {}", task, core, seed);
        Ok(())
    }

    /// Forget an exiting task, unwinding queue accounting when it was
    /// still runnable.
    pub fn task_exit(&self, task: TaskId, now: u64) -> EngineResult<()> {
        let state = self.tasks.detach(task)?;
        if state.runnable {
            let core = state.on_core;
            self.release_express(state.class, core);
            self.load.nr_running_dec(core);
            let last = self.load.nr_running(core) == 0;
            self.ratio.mark_dequeue(core, now, last)?;
        }
        Ok(())
    }

    /// A task joined `core`'s runqueue.
    pub fn enqueue(&self, task: TaskId, core: CoreId, now: u64) -> EngineResult<()> {
        if !self.topo.holds(core) {
            return Err(EngineError::InvalidCore(core));
        }
        self.tasks.enqueue(task, core)?;
        let first = self.load.nr_running(core) == 0;
        self.load.nr_running_inc(core);
        self.ratio.mark_enqueue(core, now, first)?;

        let state = self.tasks.get(task)?;
        if let Ok(class) = self.config.classes.get(state.class) {
            if class.pinning == ClassPinning::Express {
                self.express.occupy(core);
            }
        }
        if state.flags.contains(TaskFlags::RESCUE) {
            self.tasks.set_flags(task, TaskFlags::RESCUE, false)?;
        }
        Ok(())
    }

    /// A task left its runqueue.
    pub fn dequeue(&self, task: TaskId, now: u64) -> EngineResult<()> {
        let state = self.tasks.get(task)?;
        let core = state.on_core;
        self.tasks.dequeue(task)?;
        self.release_express(state.class, core);
        self.load.nr_running_dec(core);
        let last = self.load.nr_running(core) == 0;
        self.ratio.mark_dequeue(core, now, last)?;
        Ok(())
    }

    /// A sleeping task is about to be placed. One that never reported load
    /// counts as brand-new work on its current core.
    pub fn wakeup(&self, task: TaskId, now: u64) -> EngineResult<()> {
        let state = self.tasks.get(task)?;
        if !state.has_history {
            self.ratio.mark_new_task(state.on_core, now)?;
        }
        if state.flags.contains(TaskFlags::RESCUE) {
            self.tasks.set_flags(task, TaskFlags::RESCUE, false)?;
        }
        Ok(())
    }

    fn release_express(&self, class: ClassId, core: CoreId) {
        if let Ok(config) = self.config.classes.get(class) {
            if config.pinning == ClassPinning::Express {
                self.express.release(core);
            }
        }
    }

    // ------------------------------------------------------------------
    // Load and frequency feeds
    // ------------------------------------------------------------------

    /// Replace a task's load signals with the host's current figures.
    pub fn update_task_load(&self, task: TaskId, sample: TaskSample) -> EngineResult<()> {
        self.tasks.update(task, sample)
    }

    /// Replace a core's load signals with the host's current figures.
    pub fn update_core_load(&self, core: CoreId, sample: CoreSample) -> EngineResult<()> {
        self.load.update(core, sample)
    }

    /// A frequency change on `core` retunes its whole sibling group's
    /// current capacity.
    pub fn update_frequency(&self, core: CoreId, freq_khz: u64) -> EngineResult<()> {
        if !self.topo.holds(core) {
            return Err(EngineError::InvalidCore(core));
        }
        let cap = self.model.cap_at_freq(&self.topo, core, freq_khz);
        for sibling in self.topo.siblings(core).iter() {
            self.load.set_cap_curr(sibling, cap)?;
        }
        Ok(())
    }

    /// `core` entered an idle state it takes `exit_latency` to leave.
    pub fn idle_enter(&self, core: CoreId, exit_latency: u64) -> EngineResult<()> {
        self.load.idle_enter(core, exit_latency)
    }

    /// `core` woke from idle.
    pub fn idle_exit(&self, core: CoreId) -> EngineResult<()> {
        self.load.idle_exit(core)
    }

    /// Bring a core into or out of the active set.
    pub fn set_active(&self, core: CoreId, active: bool) -> EngineResult<()> {
        self.load.set_active(core, active)
    }

    /// The task executing on `core` changed.
    pub fn set_running(&self, core: CoreId, task: Option<TaskId>) {
        self.tasks.set_running(core, task);
    }

    /// Mark the system suspending. Placement relaxes its capacity-class
    /// filters until this is cleared.
    pub fn set_suspending(&self, on: bool) {
        self.config.set_suspending(on);
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    /// Pick a core for `task` relative to `prev`, its last home.
    ///
    /// `wake` distinguishes a real wakeup from a migration query about a
    /// running task; `sync` carries the host's synchronous-wakeup hint and
    /// `waker` the core driving it. `None` means no core is worth a move:
    /// affinity and the active set left nothing, or a queried migration
    /// found only destinations worse than staying put.
    pub fn select_core(
        &self,
        task: TaskId,
        prev: CoreId,
        sync: bool,
        wake: bool,
        waker: Option<CoreId>,
    ) -> Option<CoreId> {
        self.place(task, prev, sync, wake, waker, CoreMask::EMPTY)
    }

    /// Least-loaded active core the task may use, for hosts that need an
    /// answer after placement declined to give one.
    pub fn fallback_core(&self, task: TaskId) -> Option<CoreId> {
        let state = self.tasks.get(task).ok()?;
        let candidates = self.load.active_mask() & self.topo.all_cores() & state.allowed;
        let mut best = None;
        let mut min_util = u64::MAX;
        for core in candidates.iter() {
            let util = self.load.cpu_util(core);
            if util < min_util {
                min_util = util;
                best = Some(core);
            }
        }
        best
    }

    fn place(
        &self,
        task: TaskId,
        prev: CoreId,
        sync: bool,
        wake: bool,
        waker: Option<CoreId>,
        exclude: CoreMask,
    ) -> Option<CoreId> {
        let state = self.tasks.get(task).ok()?;
        let class = self.config.classes.get(state.class).ok()?;

        let mut env = match snapshot::build_env(
            &self.topo,
            &self.load,
            &self.config,
            self.model.ready(),
            task,
            &state,
            &class,
            prev,
            sync,
            wake,
        ) {
            EnvOutcome::NoCandidate => return None,
            EnvOutcome::Decided(core) => {
                self.counters.fast_path.fetch_add(1, Ordering::Relaxed);
                self.counters.placements.fetch_add(1, Ordering::Relaxed);
                return Some(core);
            }
            EnvOutcome::Ready(env) => env,
        };

        if exclude.any() {
            env.allowed = env.allowed.and_not(&exclude);
            if env.allowed.is_empty() {
                return None;
            }
        }

        // The overload ladder may commandeer a wakeup before the pipeline
        // runs.
        if wake {
            if let Some(core) = self.overload_override(&env) {
                self.counters.placements.fetch_add(1, Ordering::Relaxed);
                return Some(core);
            }
        }

        let ontime_fit = self.bounds.fit_cores(
            &self.topo,
            class.ontime_enabled,
            state.flags.contains(TaskFlags::MIGRATING),
            state.load_clamped(),
            state.on_core,
            env.active,
        );
        let ctx = FitContext {
            topo: &self.topo,
            config: &self.config,
            class: &class,
            tasks: &self.tasks,
            express: &self.express,
            ontime_fit,
            inbound: self.hub.boost_inbound_mask(),
            waker,
        };
        filter::find_fit(&ctx, &mut env);

        // The stalled-runnable hint buys exactly one shortcut placement.
        if state.flags.contains(TaskFlags::RUNNABLE_BUSY) {
            let _ = self.tasks.set_flags(task, TaskFlags::RUNNABLE_BUSY, false);
        }

        // A push of a running task never lands beside its source or on the
        // slowest class; nothing left means the move is not worth making.
        if !wake {
            env.fit = env
                .fit
                .and_not(&(self.topo.siblings(env.src) | self.topo.slowest_mask()));
            if env.fit.is_empty() {
                return None;
            }
        }
        env.finalize_fit();

        let tunables = self.config.tunables();
        let best = select::find_best_core(&env, &self.topo, &tunables, &self.model);
        if best.is_some() {
            self.counters.placements.fetch_add(1, Ordering::Relaxed);
            if policy_downgraded(class.policy, env.policy) {
                self.counters.policy_downgrades.fetch_add(1, Ordering::Relaxed);
            }
        }
        best
    }

    /// Per-state emergency routing. `None` falls through to the normal
    /// pipeline.
    fn overload_override(&self, env: &PlacementEnv) -> Option<CoreId> {
        let heavy = self.config.tunables().is_heavy_task(env.task_util);
        match self.monitor.state() {
            OverloadState::Normal => None,
            OverloadState::Elevated => {
                if heavy {
                    self.override_fastest(env)
                } else {
                    None
                }
            }
            OverloadState::Saturated => self.override_min_util(env),
            OverloadState::Critical => {
                if heavy {
                    self.override_fastest(env)
                } else {
                    self.override_min_util(env)
                }
            }
        }
    }

    /// Steer a heavy task at the fastest group, settling for the highest
    /// allowed core when none of that group is reachable. A busy answer
    /// falls through so the pipeline can do better.
    fn override_fastest(&self, env: &PlacementEnv) -> Option<CoreId> {
        let fast = self.topo.fastest_mask() & env.allowed;
        if fast.is_empty() {
            return env.allowed.iter().last();
        }

        let mut best = None;
        let mut min_util = u64::MAX;
        for core in fast.iter() {
            let util = env.stat(core).util_wo;
            if util < min_util {
                min_util = util;
                best = Some(core);
            }
        }
        let core = best?;
        let stat = env.stat(core);
        if stat.nr_running == 0 {
            return Some(core);
        }
        if check_busy(stat.util_wo, stat.cap_orig) {
            return None;
        }
        Some(core)
    }

    /// Least-loaded allowed core, judged without the task's own
    /// contribution. Ties go to the higher-numbered core.
    fn override_min_util(&self, env: &PlacementEnv) -> Option<CoreId> {
        let mut best = None;
        let mut min_util = u64::MAX;
        for core in env.allowed.iter() {
            let util = env.stat(core).util_wo;
            if util <= min_util {
                min_util = util;
                best = Some(core);
            }
        }
        best
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Periodic work driven by `core`'s tick, `now` in nanoseconds.
    ///
    /// Rolls the core's activity window, grades the whole system, and runs
    /// the migration sweeps: the Critical-state rotation, the heavy-task
    /// push, and the stalled-task mulligan. A committed overload transition
    /// is queued for [`PlacementEngine::drain_deferred`], never delivered
    /// inline.
    pub fn tick(&self, core: CoreId, now: u64) -> EngineResult<()> {
        if !self.topo.holds(core) {
            return Err(EngineError::InvalidCore(core));
        }
        self.ratio.mark_update(core, now)?;

        let tick = now / TICK_PERIOD_NS;
        let signals = self.profile();
        if let Some(change) = self.monitor.observe(&self.topo, &signals, tick) {
            self.counters.overload_transitions.fetch_add(1, Ordering::Relaxed);
            self.notify.push(change);
            if change.to == OverloadState::Critical {
                warn!(
                    "engine: overload {} -> {} at tick {}",
                    change.from, change.to, change.tick
                );
            } else {
                debug!(
                    "engine: overload {} -> {} at tick {}",
                    change.from, change.to, change.tick
                );
            }
        }

        if self.monitor.state() == OverloadState::Critical {
            let active = self.load.active_mask() & self.topo.all_cores();
            if active == self.topo.all_cores() {
                for mv in self.rotor.plan(tick, &self.topo, &self.load, &self.tasks) {
                    self.submit_migration(mv.task, mv.src, mv.dst, false);
                }
            }
        }

        self.ontime_sweep(core);
        self.mulligan(core, now);
        Ok(())
    }

    /// One profiling pass over the active cores, feeding the overload
    /// monitor.
    fn profile(&self) -> OverloadSignals {
        let tunables = self.config.tunables();
        let active = self.load.active_mask() & self.topo.all_cores();

        let mut signals = OverloadSignals {
            busy_cores: self.load.busy_mask(active).weight() as u32,
            ..OverloadSignals::default()
        };
        for core in active.iter() {
            signals.util_sum += self.load.cpu_util(core);
            for task in self.tasks.queued_on(core) {
                let Ok(state) = self.tasks.get(task) else {
                    continue;
                };
                let util = state.util();
                if tunables.is_heavy_task(util) {
                    signals.heavy_util_sum += util;
                }
                if tunables.is_misfit_task(util) {
                    signals.misfit_count += 1;
                }
            }
        }
        signals
    }

    /// Heavy-task push: one task per tick moves up off `core` when the
    /// boundaries say it has outgrown its group.
    fn ontime_sweep(&self, core: CoreId) {
        if self.topo.is_fastest(core) {
            return;
        }
        if self.hub.is_balancing(core) {
            return;
        }
        let pick = self
            .bounds
            .pick_heavy(&self.topo, &self.config, &self.tasks, core);
        let (task, boost) = match pick {
            HeavyPick::None => return,
            HeavyPick::Heavy(task) => (task, false),
            HeavyPick::Boosted(task) => (task, true),
        };
        let Some(dst) = self.place(task, core, false, false, None, CoreMask::EMPTY) else {
            return;
        };
        if dst == core {
            return;
        }
        self.submit_migration(task, core, dst, boost);
    }

    /// Idle second chance: a core drowning in runnable work hands its
    /// lightest waiting task a fresh placement with itself barred.
    fn mulligan(&self, core: CoreId, now: u64) {
        let stalled = self.load.is_busy(core)
            || (self.load.nr_running(core) > 1
                && self.ratio.last_window(core) == CAPACITY_SCALE);
        if !stalled {
            return;
        }

        let running = self.tasks.running_on(core);
        let mut lightest: Option<(TaskId, u64)> = None;
        for task in self.tasks.queued_on(core) {
            if Some(task) == running {
                continue;
            }
            let Ok(state) = self.tasks.get(task) else {
                continue;
            };
            if state.flags.intersects(TaskFlags::MIGRATING | TaskFlags::RESCUE) {
                continue;
            }
            let _ = self.tasks.set_flags(task, TaskFlags::RUNNABLE_BUSY, true);
            let util = state.util();
            if lightest.map_or(true, |(_, best)| util < best) {
                lightest = Some((task, util));
            }
        }
        let Some((task, _)) = lightest else {
            return;
        };

        let Some(dst) = self.place(task, core, false, true, None, CoreMask::single(core))
        else {
            return;
        };
        if dst == core || self.tasks.relocate(task, dst).is_err() {
            return;
        }
        self.load.nr_running_dec(core);
        let last = self.load.nr_running(core) == 0;
        let _ = self.ratio.mark_dequeue(core, now, last);
        let first = self.load.nr_running(dst) == 0;
        self.load.nr_running_inc(dst);
        let _ = self.ratio.mark_enqueue(dst, now, first);
        let _ = self.tasks.set_flags(task, TaskFlags::RESCUE, true);
        self.counters.migrations_applied.fetch_add(1, Ordering::Relaxed);
        debug!("engine: rescued {:?} off busy {:?} to {:?}", task, core, dst);
    }

    /// Hand an intended move to the hub and mark the task in flight.
    fn submit_migration(&self, task: TaskId, src: CoreId, dst: CoreId, boost: bool) {
        if self.tasks.set_flags(task, TaskFlags::MIGRATING, true).is_err() {
            return;
        }
        if self.hub.submit(task, src, dst, boost).is_none() {
            let _ = self.tasks.set_flags(task, TaskFlags::MIGRATING, false);
            return;
        }
        self.counters.migrations_submitted.fetch_add(1, Ordering::Relaxed);
        debug!("engine: migration of {:?} queued {:?} -> {:?}", task, src, dst);
    }

    // ------------------------------------------------------------------
    // Drains
    // ------------------------------------------------------------------

    /// Execute the pending pushes sourced at `core`. The host calls this
    /// from that core's stopper context; every intent is re-validated and
    /// a stale one is dropped, never retried. Returns the number of tasks
    /// actually moved.
    pub fn drain_migrations(&self, core: CoreId, now: u64) -> usize {
        let mut moved = 0;
        for intent in self.hub.take_for(core) {
            if self.apply_migration(&intent, now) {
                moved += 1;
            }
            self.hub.complete(&intent);
        }
        moved
    }

    fn apply_migration(&self, intent: &MigrationIntent, now: u64) -> bool {
        let still_valid = self.tasks.get(intent.task).map_or(false, |state| {
            state.flags.contains(TaskFlags::MIGRATING)
                && state.runnable
                && state.on_core == intent.src
                && state.allowed.contains(intent.dst)
                && self.load.active_mask().contains(intent.dst)
        });

        if !still_valid || self.tasks.relocate(intent.task, intent.dst).is_err() {
            let _ = self.tasks.set_flags(intent.task, TaskFlags::MIGRATING, false);
            self.counters.migrations_abandoned.fetch_add(1, Ordering::Relaxed);
            debug!("engine: migration of {:?} abandoned", intent.task);
            return false;
        }

        self.load.nr_running_dec(intent.src);
        let last = self.load.nr_running(intent.src) == 0;
        let _ = self.ratio.mark_dequeue(intent.src, now, last);
        let first = self.load.nr_running(intent.dst) == 0;
        self.load.nr_running_inc(intent.dst);
        let _ = self.ratio.mark_enqueue(intent.dst, now, first);
        let _ = self.tasks.set_flags(intent.task, TaskFlags::MIGRATING, false);
        self.counters.migrations_applied.fetch_add(1, Ordering::Relaxed);
        debug!(
            "engine: migration of {:?} applied {:?} -> {:?}",
            intent.task, intent.src, intent.dst
        );
        true
    }

    /// Deliver queued overload notices to the subscribers. Runs in the
    /// host's deferred-work context, off the tick path.
    pub fn drain_deferred(&self) -> usize {
        self.notify.drain_into(&self.bus)
    }

    /// Watch committed overload transitions.
    pub fn subscribe_overload(&self) -> OverloadSubscription {
        self.bus.subscribe()
    }

    // ------------------------------------------------------------------
    // Balancer gates
    // ------------------------------------------------------------------

    /// Advisory gate for the host's balancer pulling `task` onto `dst`.
    pub fn can_migrate(&self, task: TaskId, dst: CoreId) -> bool {
        if !self.topo.holds(dst) {
            return false;
        }
        let Ok(state) = self.tasks.get(task) else {
            return true;
        };
        let src = state.on_core;

        // Work on an uncrowded slowest-class core stays where it is.
        if self.load.active_mask().contains(src)
            && self.topo.is_slowest(src)
            && !self.load.is_overutilized(src)
        {
            return false;
        }

        let class = self.config.classes.get(state.class).ok();
        let ontime = class.as_ref().map_or(false, |c| c.ontime_enabled);
        if !self
            .bounds
            .can_migrate(&self.topo, &self.load, ontime, &state, dst)
        {
            return false;
        }

        // Boosted work never sinks to the slowest class.
        let boosted = self.config.boost.is_task_boosted(task)
            || class.map_or(false, |c| c.boosted())
            || state.boosted_floor();
        !(self.topo.is_slowest(dst) && boosted)
    }

    /// Should the host start an active push of `src`'s one running task
    /// toward `dst`? True only for a lone task pressed for capacity, with
    /// the destination both faster right now and not overutilized itself.
    pub fn need_active_balance(&self, src: CoreId, dst: CoreId) -> bool {
        if !self.topo.holds(src) || !self.topo.holds(dst) {
            return false;
        }
        if self.hub.is_balancing(src) {
            return false;
        }
        if self.load.nr_running(src) != 1 {
            return false;
        }
        if self.load.cap_curr(src) >= self.load.cap_curr(dst) {
            return false;
        }
        let boosted =
            self.config.boost.global_active() || self.config.boost.boot() != BootBoost::None;
        if !self.load.is_overutilized(src) && !boosted {
            return false;
        }
        !self.load.is_overutilized(dst)
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Register one capacity group's operating points. The model reports
    /// ready once every group has a table.
    pub fn register_energy_table(
        &self,
        core: CoreId,
        spec: TableSpec,
        steps: &[FreqStep],
    ) -> EngineResult<()> {
        self.model.register(&self.topo, core, spec, steps)
    }

    /// Reweigh one core's capacity and energy terms.
    pub fn set_energy_weights(&self, core: CoreId, weights: GroupWeights) -> EngineResult<()> {
        self.model.set_weights(&self.topo, core, weights)
    }

    /// Replace the reserved express lane set.
    pub fn set_express_lanes(&self, lanes: CoreMask) -> EngineResult<()> {
        self.express.set_reserved(&self.topo, lanes)
    }

    /// Set a capacity group's migration band from percentages of its
    /// design capacity.
    pub fn set_ontime_boundary(
        &self,
        group: usize,
        lower_pct: u32,
        upper_pct: u32,
    ) -> EngineResult<()> {
        self.bounds.set_boundary(&self.topo, group, lower_pct, upper_pct)
    }

    /// Drop a capacity group's migration band.
    pub fn clear_ontime_boundary(&self, group: usize) {
        self.bounds.clear_boundary(group);
    }

    /// Cap a core group's reported activity ratio.
    pub fn set_ratio_limit(&self, core: CoreId, ratio: u64) -> EngineResult<()> {
        self.ratio.set_limit(&self.topo, core, ratio)
    }

    /// Set a core group's fresh-task boost floor.
    pub fn set_ratio_boost_floor(&self, core: CoreId, ratio: u64) -> EngineResult<()> {
        self.ratio.set_boost_floor(&self.topo, core, ratio)
    }

    /// Change the rotation sweep cadence, in ticks.
    pub fn set_somac_interval(&self, ticks: u64) -> EngineResult<()> {
        self.rotor.set_interval(ticks)
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Current overload state and time spent in each.
    pub fn overload_status(&self) -> OverloadStatus {
        self.monitor.status()
    }

    /// One core's activity-ratio history.
    pub fn ratio_history(&self, core: CoreId) -> EngineResult<RatioSnapshot> {
        self.ratio.snapshot(core)
    }

    /// Near-future demand of `core`, for a frequency governor.
    pub fn demand_hint(&self, core: CoreId, now: u64) -> DemandHint {
        self.ratio.demand_estimate(
            core,
            now,
            self.load.cpu_util(core),
            self.load.cap_curr(core),
        )
    }

    /// One core's energy weighting.
    pub fn energy_weights(&self, core: CoreId) -> GroupWeights {
        self.model.weights_of(&self.topo, core)
    }

    /// Copy of the engine counters.
    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    // ------------------------------------------------------------------
    // Component access
    // ------------------------------------------------------------------

    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn load(&self) -> &LoadMirror {
        &self.load
    }

    #[inline]
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    #[inline]
    pub fn model(&self) -> &EnergyModel {
        &self.model
    }

    #[inline]
    pub fn ratio(&self) -> &RatioTracker {
        &self.ratio
    }

    #[inline]
    pub fn express(&self) -> &ExpressLanes {
        &self.express
    }

    #[inline]
    pub fn bounds(&self) -> &OntimeBounds {
        &self.bounds
    }

    #[inline]
    pub fn hub(&self) -> &MigrationHub {
        &self.hub
    }
}

static_assertions::assert_impl_all!(PlacementEngine: Send, Sync);

/// A resolved policy counts as downgraded when the ladder settled for a
/// blunter selector than the class asked for.
fn policy_downgraded(base: SchedPolicy, resolved: SchedPolicy) -> bool {
    (base == SchedPolicy::Efficiency && resolved == SchedPolicy::Energy)
        || (resolved == SchedPolicy::MinUtil && base != SchedPolicy::MinUtil)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassConfig;

    fn topo() -> Topology {
        Topology::builder()
            .with_group(CoreMask::from_bits(0x0f), 384)
            .with_group(CoreMask::from_bits(0xf0), 1024)
            .build()
            .unwrap()
    }

    fn core(idx: usize) -> CoreId {
        CoreId::from_index(idx)
    }

    fn engine_with_class() -> (PlacementEngine, ClassId) {
        let engine = PlacementEngine::new(topo());
        let class = engine
            .config
            .classes
            .register(ClassConfig::builder("app"))
            .unwrap();
        (engine, class)
    }

    fn spawn(engine: &PlacementEngine, class: ClassId, id: u64, on: CoreId, util: u64) -> TaskId {
        let task = TaskId::new(id);
        engine
            .task_fork(task, class, CoreMask::from_bits(0xff), on, 0)
            .unwrap();
        engine
            .update_task_load(
                task,
                TaskSample {
                    util_avg: util,
                    util_est: util,
                    load_avg: util,
                },
            )
            .unwrap();
        task
    }

    fn occupy_core(engine: &PlacementEngine, target: CoreId, util: u64, runnable: u64) {
        engine.load.idle_exit(target).unwrap();
        engine
            .load
            .update(
                target,
                CoreSample {
                    util_avg: util,
                    util_est: util,
                    runnable_avg: runnable,
                    rt_util: 0,
                },
            )
            .unwrap();
    }

    fn register_tables(engine: &PlacementEngine) {
        engine
            .register_energy_table(
                core(0),
                TableSpec { mips: 10, coefficient: 120, min_freq: 0, max_freq: u64::MAX },
                &[
                    FreqStep { freq_khz: 600_000, volt_uv: 600_000 },
                    FreqStep { freq_khz: 1_200_000, volt_uv: 700_000 },
                    FreqStep { freq_khz: 1_800_000, volt_uv: 850_000 },
                ],
            )
            .unwrap();
        engine
            .register_energy_table(
                core(4),
                TableSpec { mips: 20, coefficient: 500, min_freq: 0, max_freq: u64::MAX },
                &[
                    FreqStep { freq_khz: 800_000, volt_uv: 650_000 },
                    FreqStep { freq_khz: 1_600_000, volt_uv: 800_000 },
                    FreqStep { freq_khz: 2_400_000, volt_uv: 1_000_000 },
                ],
            )
            .unwrap();
    }

    #[test]
    fn test_fork_seeds_util_from_core_capacity() {
        let (engine, class) = engine_with_class();
        let task = TaskId::new(1);
        engine
            .task_fork(task, class, CoreMask::from_bits(0xff), core(4), 0)
            .unwrap();

        let state = engine.tasks.get(task).unwrap();
        // A quarter of the big core's 1024.
        assert_eq!(state.util_avg, 256);
        assert!(state.has_history);
    }

    #[test]
    fn test_select_holds_task_on_idle_prev_core() {
        let (engine, class) = engine_with_class();
        let task = spawn(&engine, class, 1, core(1), 128);

        let picked = engine.select_core(task, core(1), false, true, None);
        assert_eq!(picked, Some(core(1)));
        assert_eq!(engine.stats().fast_path, 1);
        assert_eq!(engine.stats().placements, 1);
    }

    #[test]
    fn test_select_declines_with_nothing_active() {
        let (engine, class) = engine_with_class();
        let task = spawn(&engine, class, 1, core(1), 128);
        for idx in 0..8 {
            engine.set_active(core(idx), false).unwrap();
        }
        assert_eq!(engine.select_core(task, core(1), false, true, None), None);
    }

    #[test]
    fn test_busy_prev_core_takes_the_full_pipeline() {
        let (engine, class) = engine_with_class();
        let task = spawn(&engine, class, 1, core(1), 128);
        occupy_core(&engine, core(1), 800, 900);

        let picked = engine.select_core(task, core(1), false, true, None);
        assert!(picked.is_some());
        assert_eq!(engine.stats().fast_path, 0);
        assert_eq!(engine.stats().placements, 1);
    }

    #[test]
    fn test_energy_policy_without_model_counts_a_downgrade() {
        let engine = PlacementEngine::new(topo());
        let class = engine
            .config
            .classes
            .register(ClassConfig::builder("batch").with_policy(SchedPolicy::Energy))
            .unwrap();
        let task = spawn(&engine, class, 1, core(1), 128);
        occupy_core(&engine, core(1), 300, 300);

        assert!(engine.select_core(task, core(1), false, true, None).is_some());
        assert_eq!(engine.stats().policy_downgrades, 1);
    }

    #[test]
    fn test_enqueue_and_dequeue_mirror_occupancy() {
        let (engine, class) = engine_with_class();
        let task = spawn(&engine, class, 1, core(2), 100);

        engine.enqueue(task, core(2), 1_000_000).unwrap();
        assert_eq!(engine.load.nr_running(core(2)), 1);
        assert!(engine.tasks.get(task).unwrap().runnable);

        engine.dequeue(task, 2_000_000).unwrap();
        assert_eq!(engine.load.nr_running(core(2)), 0);
        assert!(!engine.tasks.get(task).unwrap().runnable);
    }

    #[test]
    fn test_exit_of_runnable_task_unwinds_accounting() {
        let (engine, class) = engine_with_class();
        let task = spawn(&engine, class, 1, core(2), 100);
        engine.enqueue(task, core(2), 1_000_000).unwrap();

        engine.task_exit(task, 2_000_000).unwrap();
        assert_eq!(engine.load.nr_running(core(2)), 0);
        assert!(!engine.tasks.holds(task));
    }

    #[test]
    fn test_tick_grades_overload_and_defers_the_notice() {
        let (engine, class) = engine_with_class();
        let waiter = spawn(&engine, class, 1, core(0), 100);
        engine.enqueue(waiter, core(0), 0).unwrap();
        occupy_core(&engine, core(0), 100, 400);
        let misfit = spawn(&engine, class, 2, core(4), 900);
        engine.enqueue(misfit, core(4), 0).unwrap();
        occupy_core(&engine, core(4), 900, 900);

        let sub = engine.subscribe_overload();
        engine.tick(core(0), TICK_PERIOD_NS).unwrap();

        assert_eq!(engine.overload_status().state, OverloadState::Elevated);
        assert_eq!(engine.stats().overload_transitions, 1);
        // Delivery is deferred work, not a tick-path side effect.
        assert!(sub.recv().is_none());
        assert_eq!(engine.drain_deferred(), 1);
        let seen = sub.recv().unwrap();
        assert_eq!(seen.from, OverloadState::Normal);
        assert_eq!(seen.to, OverloadState::Elevated);
    }

    #[test]
    fn test_overload_ladder_passes_through_saturated() {
        let (engine, class) = engine_with_class();
        for (i, idx) in [0usize, 4, 5, 6, 7].iter().enumerate() {
            let task = spawn(&engine, class, 10 + i as u64, core(*idx), 950);
            engine.enqueue(task, core(*idx), 0).unwrap();
            occupy_core(&engine, core(*idx), 950, 1100);
        }

        engine.tick(core(0), TICK_PERIOD_NS).unwrap();
        assert_eq!(engine.overload_status().state, OverloadState::Saturated);

        engine.tick(core(0), 3 * TICK_PERIOD_NS).unwrap();
        assert_eq!(engine.overload_status().state, OverloadState::Critical);
        assert_eq!(engine.stats().overload_transitions, 2);
    }

    #[test]
    fn test_elevated_routes_heavy_wakeup_to_fastest_group() {
        let (engine, class) = engine_with_class();
        let waiter = spawn(&engine, class, 1, core(0), 100);
        engine.enqueue(waiter, core(0), 0).unwrap();
        occupy_core(&engine, core(0), 100, 400);
        let misfit = spawn(&engine, class, 2, core(4), 900);
        engine.enqueue(misfit, core(4), 0).unwrap();
        occupy_core(&engine, core(4), 900, 900);
        engine.tick(core(0), TICK_PERIOD_NS).unwrap();
        assert_eq!(engine.overload_status().state, OverloadState::Elevated);

        let heavy = spawn(&engine, class, 3, core(1), 500);
        occupy_core(&engine, core(1), 500, 500);
        // core 4 carries the misfit; the emptiest fast core wins.
        let picked = engine.select_core(heavy, core(1), false, true, None);
        assert_eq!(picked, Some(core(5)));
    }

    #[test]
    fn test_mulligan_rescues_the_lightest_waiting_task() {
        let (engine, class) = engine_with_class();
        let runner = spawn(&engine, class, 1, core(0), 200);
        engine.enqueue(runner, core(0), 0).unwrap();
        engine.set_running(core(0), Some(runner));
        let heavy_waiter = spawn(&engine, class, 2, core(0), 100);
        engine.enqueue(heavy_waiter, core(0), 0).unwrap();
        let light_waiter = spawn(&engine, class, 3, core(0), 50);
        engine.enqueue(light_waiter, core(0), 0).unwrap();
        occupy_core(&engine, core(0), 200, 500);

        engine.tick(core(0), TICK_PERIOD_NS).unwrap();

        let moved = engine.tasks.get(light_waiter).unwrap();
        assert_ne!(moved.on_core, core(0));
        assert!(moved.flags.contains(TaskFlags::RESCUE));
        let stayed = engine.tasks.get(heavy_waiter).unwrap();
        assert_eq!(stayed.on_core, core(0));
        assert!(stayed.flags.contains(TaskFlags::RUNNABLE_BUSY));
        assert_eq!(engine.load.nr_running(core(0)), 2);
        assert_eq!(engine.stats().migrations_applied, 1);
    }

    #[test]
    fn test_heavy_push_submits_and_drain_applies() {
        let engine = PlacementEngine::new(topo());
        let class = engine
            .config
            .classes
            .register(ClassConfig::builder("app").with_ontime(true))
            .unwrap();
        engine.set_ontime_boundary(0, 30, 60).unwrap();
        let heavy = spawn(&engine, class, 1, core(0), 300);
        engine.enqueue(heavy, core(0), 0).unwrap();
        occupy_core(&engine, core(0), 300, 300);

        engine.tick(core(0), TICK_PERIOD_NS).unwrap();
        assert_eq!(engine.stats().migrations_submitted, 1);
        assert!(engine.hub.is_balancing(core(0)));
        assert!(engine
            .tasks
            .get(heavy)
            .unwrap()
            .flags
            .contains(TaskFlags::MIGRATING));

        assert_eq!(engine.drain_migrations(core(0), 2 * TICK_PERIOD_NS), 1);
        let landed = engine.tasks.get(heavy).unwrap();
        assert!(engine.topo.is_fastest(landed.on_core));
        assert!(!landed.flags.contains(TaskFlags::MIGRATING));
        assert!(!engine.hub.is_balancing(core(0)));
        assert_eq!(engine.load.nr_running(core(0)), 0);
        assert_eq!(engine.stats().migrations_applied, 1);
    }

    #[test]
    fn test_drain_abandons_a_stale_intent() {
        let (engine, class) = engine_with_class();
        let task = spawn(&engine, class, 1, core(0), 300);
        engine.enqueue(task, core(0), 0).unwrap();
        engine.submit_migration(task, core(0), core(4), false);
        assert_eq!(engine.stats().migrations_submitted, 1);

        // The task goes to sleep before the stopper runs.
        engine.dequeue(task, 1_000_000).unwrap();
        assert_eq!(engine.drain_migrations(core(0), 2_000_000), 0);
        assert_eq!(engine.stats().migrations_abandoned, 1);
        let state = engine.tasks.get(task).unwrap();
        assert!(!state.flags.contains(TaskFlags::MIGRATING));
        assert_eq!(state.on_core, core(0));
        assert!(!engine.hub.is_balancing(core(0)));
    }

    #[test]
    fn test_rotation_waits_for_every_core_active() {
        let (engine, class) = engine_with_class();
        engine.set_active(core(3), false).unwrap();
        for (i, idx) in [0usize, 4, 5, 6, 7].iter().enumerate() {
            let task = spawn(&engine, class, 10 + i as u64, core(*idx), 950);
            engine.enqueue(task, core(*idx), 0).unwrap();
            occupy_core(&engine, core(*idx), 950, 1100);
        }
        engine.tick(core(0), TICK_PERIOD_NS).unwrap();
        engine.tick(core(0), 3 * TICK_PERIOD_NS).unwrap();
        assert_eq!(engine.overload_status().state, OverloadState::Critical);
        assert_eq!(engine.hub.pending_len(), 0);

        // Every core back in play arms the rotation.
        engine.set_active(core(3), true).unwrap();
        engine.tick(core(0), 4 * TICK_PERIOD_NS).unwrap();
        assert!(engine.hub.pending_len() > 0);
    }

    #[test]
    fn test_can_migrate_protects_a_calm_slow_core() {
        let (engine, class) = engine_with_class();
        let task = spawn(&engine, class, 1, core(1), 200);
        assert!(!engine.can_migrate(task, core(5)));

        // An overutilized source lets the task go.
        occupy_core(&engine, core(1), 384, 600);
        assert!(engine.can_migrate(task, core(5)));

        // But boosted work never sinks back to the slowest class.
        engine.config.boost.set_task(Some(task));
        assert!(!engine.can_migrate(task, core(2)));
    }

    #[test]
    fn test_need_active_balance_wants_a_lone_pressed_task() {
        let (engine, class) = engine_with_class();
        let task = spawn(&engine, class, 1, core(1), 384);
        engine.enqueue(task, core(1), 0).unwrap();
        occupy_core(&engine, core(1), 384, 400);
        assert!(engine.need_active_balance(core(1), core(4)));

        // A second runnable task rules the push out.
        let other = spawn(&engine, class, 2, core(1), 50);
        engine.enqueue(other, core(1), 0).unwrap();
        assert!(!engine.need_active_balance(core(1), core(4)));
    }

    #[test]
    fn test_update_frequency_rescales_the_sibling_group() {
        let (engine, _class) = engine_with_class();
        register_tables(&engine);
        assert!(engine.model.ready());

        engine.update_frequency(core(0), 600_000).unwrap();
        for idx in 0..4 {
            assert_eq!(engine.load.cap_curr(core(idx)), 128);
        }
        // The other group is untouched.
        assert_eq!(engine.load.cap_curr(core(4)), 1024);
    }

    #[test]
    fn test_fallback_core_picks_least_loaded_allowed() {
        let (engine, class) = engine_with_class();
        let task = TaskId::new(1);
        engine
            .task_fork(task, class, CoreMask::from_bits(0x06), core(1), 0)
            .unwrap();
        occupy_core(&engine, core(1), 50, 50);
        occupy_core(&engine, core(2), 10, 10);
        assert_eq!(engine.fallback_core(task), Some(core(2)));

        engine.set_active(core(1), false).unwrap();
        engine.set_active(core(2), false).unwrap();
        assert_eq!(engine.fallback_core(task), None);
    }

    #[test]
    fn test_wakeup_of_history_less_task_arms_the_boost_floor() {
        let (engine, class) = engine_with_class();
        engine.config.tunables.write().set_new_task_pct(0).unwrap();
        engine.set_ratio_boost_floor(core(2), 512).unwrap();

        let task = TaskId::new(1);
        engine
            .task_fork(task, class, CoreMask::from_bits(0xff), core(2), 0)
            .unwrap();
        assert!(!engine.tasks.get(task).unwrap().has_history);
        let before = engine.demand_hint(core(2), 1_000_000);
        assert_eq!(before.util, 0);

        engine.wakeup(task, 2_000_000).unwrap();
        let hint = engine.demand_hint(core(2), 2_500_000);
        assert_eq!(hint.util, 512);
        assert_eq!(hint.scale, CAPACITY_SCALE);
    }
}
