//! # Fit-Core Filter Pipeline
//!
//! Narrows the allowed set down to cores that can actually take the task
//! before a selector ranks what is left. Stages run in a fixed order, and
//! any stage that would empty the set is skipped instead, so the pipeline
//! always hands the selector at least one candidate. A stage that forces
//! the answer, or leaves a single core, ends the walk early.

mod express;
mod prefer;

pub use express::ExpressLanes;
pub use prefer::prefer_mask;

use strata_types::CoreId;

use crate::config::{ClassConfig, ClassPinning, EngineConfig};
use crate::load::{check_busy, BUSY_CORE_RATIO, FREE_CORE_SHIFT};
use crate::mask::CoreMask;
use crate::select;
use crate::snapshot::PlacementEnv;
use crate::task::{TaskFlags, TaskRegistry};
use crate::topology::Topology;

// ============================================================================
// CONTEXT
// ============================================================================

/// Read-only state the pipeline consults besides the snapshot.
pub struct FitContext<'a> {
    pub topo: &'a Topology,
    pub config: &'a EngineConfig,
    pub class: &'a ClassConfig,
    pub tasks: &'a TaskRegistry,
    pub express: &'a ExpressLanes,
    /// Cores the upward-migration boundaries leave open for this task.
    pub ontime_fit: CoreMask,
    /// Cores already receiving a boosted migration.
    pub inbound: CoreMask,
    /// Core driving the wakeup, for synchronous-wake placement.
    pub waker: Option<CoreId>,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Fill `env.fit` with the placement candidates and return how many there
/// are. Never leaves the set empty while any core is allowed.
pub fn find_fit(ctx: &FitContext<'_>, env: &mut PlacementEnv) -> usize {
    // A task stuck runnable behind other work goes straight to the least
    // loaded core it may use.
    if env.flags.contains(TaskFlags::RUNNABLE_BUSY) {
        if let Some(core) = select::find_min_load_core(env) {
            return done(env, CoreMask::single(core));
        }
    }

    let tunables = ctx.config.tunables();

    // Drop cores the task would push over capacity. When that clears the
    // board on a wakeup, nearly-empty cores stand in; failing those, the
    // stage is skipped.
    let mut fit = env.allowed.and_not(&overcap_cores(ctx, env));
    if fit.is_empty() && env.wake {
        fit = free_cores(env);
    }
    if fit.is_empty() {
        fit = env.allowed;
    }
    if fit.weight() <= 1 {
        return done(env, fit);
    }

    fit = apply_pinning(ctx, env, fit);
    if fit.weight() <= 1 {
        return done(env, fit);
    }

    // Cores where runnable load says tasks already sit waiting.
    fit = narrow_exclude(fit, busy_cores(env));
    if fit.weight() <= 1 {
        return done(env, fit);
    }

    // Cores already receiving a boosted migration are spoken for.
    fit = narrow_exclude(fit, ctx.inbound.and_not(&ctx.topo.slowest_mask()));
    if fit.weight() <= 1 {
        return done(env, fit);
    }

    fit = narrow_exclude(fit, preempt_shield_cores(ctx, env));
    if fit.weight() <= 1 {
        return done(env, fit);
    }

    // An on-top task searching beyond the slowest group, or the boost
    // target, belongs on the fastest group when it can reach one.
    let wants_fastest = (env.on_top && !ctx.topo.is_slowest(env.start.core))
        || ctx.config.boost.is_task_boosted(env.task);
    if wants_fastest {
        let fastest = fit & ctx.topo.fastest_mask();
        if fastest.any() {
            return done(env, fastest);
        }
    }

    // A synchronous wake lands on the waking core when that core is about
    // to go quiet and is not a slow one.
    if tunables.sync_hint_enabled() && env.sync {
        if let Some(waker) = ctx.waker {
            let engaged = env.on_top || env.boosted || core_preemptible(ctx, env, waker);
            if engaged
                && fit.contains(waker)
                && env.stat(waker).nr_running <= 1
                && !ctx.topo.is_slowest(waker)
            {
                return done(env, CoreMask::single(waker));
            }
        }
    }

    // Pinning again: the exclusions above may have drifted off the lanes.
    fit = apply_pinning(ctx, env, fit);

    fit = narrow_intersect(fit, ctx.ontime_fit);
    fit = narrow_intersect(fit, prefer::prefer_mask(ctx.class, env));

    done(env, fit)
}

fn done(env: &mut PlacementEnv, fit: CoreMask) -> usize {
    env.fit = fit;
    fit.weight()
}

/// Intersect when the result keeps at least one core.
fn narrow_intersect(fit: CoreMask, candidate: CoreMask) -> CoreMask {
    if fit.intersects(&candidate) {
        fit & candidate
    } else {
        fit
    }
}

/// Exclude when the result keeps at least one core.
fn narrow_exclude(fit: CoreMask, excluded: CoreMask) -> CoreMask {
    let next = fit.and_not(&excluded);
    if next.any() {
        next
    } else {
        fit
    }
}

fn apply_pinning(ctx: &FitContext<'_>, env: &PlacementEnv, fit: CoreMask) -> CoreMask {
    match ctx.class.pinning {
        ClassPinning::None => fit,
        ClassPinning::Express => {
            narrow_intersect(fit, ctx.express.express_candidates(env.active))
        }
        ClassPinning::Suppressed => {
            narrow_exclude(fit, ctx.express.suppressed_exclusion(ctx.topo))
        }
    }
}

// ============================================================================
// STAGE MASKS
// ============================================================================

/// Cores the task would push past their design capacity.
///
/// A misfit-sized task overflows every core by definition, so the rule
/// flips: only cores that can hold it outright, with headroom and an empty
/// queue, escape the mask.
fn overcap_cores(ctx: &FitContext<'_>, env: &PlacementEnv) -> CoreMask {
    let tunables = ctx.config.tunables();
    let util = env.task_util_clamped;
    let mut mask = CoreMask::new();

    if tunables.is_misfit_task(util) {
        for core in env.allowed.iter() {
            let stat = env.stat(core);
            let fits = util <= stat.cap_orig
                && !check_busy(stat.util_wo, stat.cap_orig)
                && stat.nr_running == 0;
            if !fits {
                mask.set(core);
            }
        }
        return mask;
    }

    for core in env.allowed.iter() {
        let stat = env.stat(core);
        if stat.util_wo + util > stat.cap_orig {
            mask.set(core);
        }
    }
    mask
}

/// Cores running next to nothing, the fallback when everything is overcap.
fn free_cores(env: &PlacementEnv) -> CoreMask {
    let mut mask = CoreMask::new();
    for core in env.allowed.iter() {
        let stat = env.stat(core);
        if stat.util < stat.cap_orig >> FREE_CORE_SHIFT {
            mask.set(core);
        }
    }
    mask
}

/// Cores whose runnable load has outgrown what they execute.
fn busy_cores(env: &PlacementEnv) -> CoreMask {
    let mut mask = CoreMask::new();
    for core in env.allowed.iter() {
        let stat = env.stat(core);
        if stat.runnable < stat.cap_orig {
            continue;
        }
        if stat.nr_running == 0 {
            continue;
        }
        if stat.util * BUSY_CORE_RATIO < stat.runnable * 100 {
            mask.set(core);
        }
    }
    mask
}

/// Cores whose current task should not be preempted by this one. An empty
/// mask comes back for placements important enough to preempt anyone, and
/// when every allowed core would be shielded.
fn preempt_shield_cores(ctx: &FitContext<'_>, env: &PlacementEnv) -> CoreMask {
    if env.on_top || ctx.config.boost.is_task_boosted(env.task) {
        return CoreMask::new();
    }
    if env.sync && env.boosted {
        return CoreMask::new();
    }

    let mut mask = CoreMask::new();
    for core in env.allowed.iter() {
        if !core_preemptible(ctx, env, core) {
            mask.set(core);
        }
    }
    if mask == env.allowed {
        return CoreMask::new();
    }
    mask
}

fn core_preemptible(ctx: &FitContext<'_>, env: &PlacementEnv, core: CoreId) -> bool {
    // Slow cores only guard the synchronous-wake case.
    if !ctx.topo.is_slowest(core) {
        if let Some(curr) = ctx.tasks.running_on(core) {
            if ctx.config.boost.is_task_boosted(curr) {
                return false;
            }
            if let Ok(state) = ctx.tasks.get(curr) {
                if state.flags.contains(TaskFlags::ON_TOP) && curr != env.task {
                    return false;
                }
            }
        }
    }
    if env.sync && env.stat(core).nr_running != 1 {
        return false;
    }
    true
}

// ============================================================================
// TESTS
// ============================================================================
