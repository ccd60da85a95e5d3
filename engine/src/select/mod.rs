//! # Core Selectors
//!
//! The filter pipeline leaves a fit set; one of five selectors turns it into
//! a single core. Every selector reads the frozen snapshot only, so the same
//! environment always yields the same answer. A selector that finds nothing
//! falls back to the task's current core.

mod policy;

pub use policy::SchedPolicy;

use strata_types::CoreId;

use crate::config::Tunables;
use crate::energy::{EnergyModel, ENERGY_UNKNOWN};
use crate::mask::CoreMask;
use crate::snapshot::PlacementEnv;
use crate::topology::Topology;

// ============================================================================
// DISPATCH
// ============================================================================

/// Choose the final core for one decision.
///
/// Dispatches on the environment's resolved policy. When the policy's
/// selector finds no candidate, the task's current core wins if it is still
/// allowed, otherwise the first fit core does.
pub fn find_best_core(
    env: &PlacementEnv,
    topo: &Topology,
    tunables: &Tunables,
    model: &EnergyModel,
) -> Option<CoreId> {
    let best = match env.policy {
        SchedPolicy::Efficiency => find_best_eff_core(env, topo, tunables, model),
        SchedPolicy::Energy => find_energy_core(env, topo, tunables, model),
        SchedPolicy::SemiPerformance => find_semi_perf_core(env),
        SchedPolicy::Performance => find_best_perf_core(env),
        SchedPolicy::MinUtil => find_min_util_with_core(env, topo, tunables),
    };

    best.or_else(|| {
        if env.allowed.contains(env.src) {
            Some(env.src)
        } else {
            env.fit.first()
        }
    })
}

// ============================================================================
// MINIMUM UTILIZATION
// ============================================================================

/// Least-loaded allowed core by the snapshot's comparison view. Serves the
/// rescue path for tasks stuck runnable behind other work.
pub(crate) fn find_min_load_core(env: &PlacementEnv) -> Option<CoreId> {
    let mut best = None;
    let mut min_util = u64::MAX;

    for core in env.allowed.iter() {
        let util = env.stat(core).util;
        if util < min_util {
            min_util = util;
            best = Some(core);
        }
    }
    best
}

/// Fit core in `mask` with the lowest projected utilization.
///
/// Awake cores below the starting capacity class are skipped; idle ones stay
/// eligible, and during suspend the class filter relaxes entirely. The
/// task's current core competes with a utilization advantage so marginal
/// differences do not force a migration.
fn find_min_util_core(
    env: &PlacementEnv,
    tunables: &Tunables,
    mask: CoreMask,
    among_idle: bool,
) -> Option<CoreId> {
    let mut best = None;
    let mut min_util = u64::MAX;

    for core in (env.fit & mask).iter() {
        let stat = env.stat(core);
        if among_idle && !stat.idle {
            continue;
        }
        if !(env.suspending || stat.idle) && stat.cap_orig < env.start.cap {
            continue;
        }

        let mut util = stat.util_with;
        if core == env.src {
            util = util.saturating_sub(tunables.prev_core_advantage(env.task_util));
        }
        if util < min_util {
            min_util = util;
            best = Some(core);
        }
    }
    best
}

/// MinUtil policy: walk capacity groups slowest first and take the first
/// group that yields a core. The slowest group searches idle members only
/// while any fit core is idle.
fn find_min_util_with_core(
    env: &PlacementEnv,
    topo: &Topology,
    tunables: &Tunables,
) -> Option<CoreId> {
    for group in topo.groups() {
        let mask = group.cores & env.fit;
        if mask.is_empty() {
            continue;
        }
        let among_idle = env.idle_count > 0 && group.index == 0;
        if let Some(core) = find_min_util_core(env, tunables, mask, among_idle) {
            return Some(core);
        }
    }
    None
}

// ============================================================================
// EFFICIENCY
// ============================================================================

fn search_eff_core(
    env: &PlacementEnv,
    topo: &Topology,
    tunables: &Tunables,
    model: &EnergyModel,
    among_idle: bool,
) -> Option<CoreId> {
    if !model.ready() {
        return find_min_util_core(env, tunables, env.fit, among_idle);
    }

    let mut best = None;
    let mut min_eff = u64::MAX;

    for core in env.fit.iter() {
        let stat = env.stat(core);
        if among_idle && !stat.idle {
            continue;
        }
        if !(env.suspending || stat.idle) && stat.cap_orig < env.start.cap {
            continue;
        }

        let mut eff = model.estimate_efficiency(topo, env, core);
        if eff == ENERGY_UNKNOWN {
            continue;
        }
        if core == env.src {
            eff -= tunables.eff_discount(eff);
        }
        if eff < min_eff {
            min_eff = eff;
            best = Some(core);
        }
    }
    best
}

/// Efficiency policy: lowest weighted energy-per-capacity figure wins.
/// Latency-sensitive tasks scan idle cores first and widen only when none
/// qualifies.
fn find_best_eff_core(
    env: &PlacementEnv,
    topo: &Topology,
    tunables: &Tunables,
    model: &EnergyModel,
) -> Option<CoreId> {
    if env.idle_count > 0 && env.latency_sensitive {
        if let Some(core) = search_eff_core(env, topo, tunables, model, true) {
            return Some(core);
        }
    }
    search_eff_core(env, topo, tunables, model, false)
}

// ============================================================================
// ENERGY
// ============================================================================

/// Lowest whole-system energy among `candidates`; projected utilization
/// breaks ties. Cores the model cannot price never win.
fn pick_energy_core(
    env: &PlacementEnv,
    topo: &Topology,
    model: &EnergyModel,
    candidates: CoreMask,
) -> Option<CoreId> {
    let mut best = None;
    let mut min_energy = u64::MAX;
    let mut min_util = u64::MAX;

    for core in candidates.iter() {
        let energy = model.estimate_energy(topo, env, core);
        if energy == ENERGY_UNKNOWN {
            continue;
        }
        let util = env.stat(core).util_with;
        if energy < min_energy || (energy == min_energy && util < min_util) {
            best = Some(core);
            min_energy = energy;
            min_util = util;
        }
    }
    best
}

/// Energy policy: price each group's least-loaded member and take the
/// cheapest. A tiny task that wins a loaded slow core re-settles on an idle
/// member of the slowest group when one exists.
fn find_energy_core(
    env: &PlacementEnv,
    topo: &Topology,
    tunables: &Tunables,
    model: &EnergyModel,
) -> Option<CoreId> {
    if !model.ready() {
        return find_min_util_core(env, tunables, env.fit, false);
    }

    let mut candidates = CoreMask::new();
    for group in topo.groups() {
        let mask = group.cores & env.fit;
        if mask.is_empty() {
            continue;
        }
        if let Some(core) = find_min_util_core(env, tunables, mask, false) {
            candidates.set(core);
        }
    }
    if candidates.weight() == 1 {
        return candidates.first();
    }

    let best = pick_energy_core(env, topo, model, candidates)?;

    let slowest = &topo.groups()[0];
    if slowest.cores.contains(best) && env.task_util < tunables.tiny_task_util(slowest.cap_orig) {
        if let Some(idle) = find_min_util_core(env, tunables, slowest.cores, true) {
            return Some(idle);
        }
    }
    Some(best)
}

// ============================================================================
// PERFORMANCE
// ============================================================================

/// Fit core with the most headroom at its current operating point. Equal
/// headroom goes to the lower cumulative demand.
fn find_max_spare_core(env: &PlacementEnv, among_idle: bool) -> Option<CoreId> {
    let mut best = None;
    let mut max_spare = 0u64;
    let mut min_cuml = u64::MAX;

    for core in env.fit.iter() {
        let stat = env.stat(core);
        if among_idle && !stat.idle {
            continue;
        }
        let spare = stat.cap_curr.saturating_sub(stat.util_with);
        if spare > max_spare || (spare == max_spare && stat.util_cuml < min_cuml) {
            best = Some(core);
            max_spare = spare;
            min_cuml = stat.util_cuml;
        }
    }
    best
}

/// Performance policy: greatest spare capacity wins, idle cores first for
/// latency-sensitive tasks.
fn find_best_perf_core(env: &PlacementEnv) -> Option<CoreId> {
    if env.latency_sensitive && env.idle_count > 0 {
        if let Some(core) = find_max_spare_core(env, true) {
            return Some(core);
        }
    }
    find_max_spare_core(env, false)
}

// ============================================================================
// SEMI PERFORMANCE
// ============================================================================

/// SemiPerformance policy: the deepest idle capacity with the cheapest
/// wakeup wins. Without idle candidates the busiest-headroom core does,
/// defaulting to the task's current core. A busy core displaces an idle one
/// only for latency-tolerant tasks, and only with strictly more headroom.
fn find_semi_perf_core(env: &PlacementEnv) -> Option<CoreId> {
    let mut best_idle = None;
    let mut idle_cap = 0u64;
    let mut idle_lat = u64::MAX;
    let mut idle_cuml = u64::MAX;

    for core in env.fit.iter() {
        let stat = env.stat(core);
        if !stat.idle {
            continue;
        }
        let take = stat.cap_orig > idle_cap
            || (stat.cap_orig == idle_cap && stat.exit_latency < idle_lat)
            || (stat.cap_orig == idle_cap
                && stat.exit_latency == idle_lat
                && (core == env.src || stat.util_cuml < idle_cuml));
        if take {
            best_idle = Some(core);
            idle_cap = stat.cap_orig;
            idle_lat = stat.exit_latency;
            // The current core pins the tie so later equals cannot displace it.
            idle_cuml = if core == env.src { 0 } else { stat.util_cuml };
        }
    }

    let src_stat = env.stat(env.src);
    let mut busy = env.src;
    let mut busy_spare = src_stat.cap_orig.saturating_sub(src_stat.util_with);
    for core in env.fit.iter() {
        let stat = env.stat(core);
        if stat.idle {
            continue;
        }
        let spare = stat.cap_orig.saturating_sub(stat.util_with);
        if spare > busy_spare {
            busy = core;
            busy_spare = spare;
        }
    }

    match best_idle {
        Some(idle) => {
            if !env.latency_sensitive {
                let stat = env.stat(idle);
                let idle_spare = stat.cap_orig.saturating_sub(stat.util_with);
                if busy_spare > idle_spare {
                    return Some(busy);
                }
            }
            Some(idle)
        },
        None => Some(busy),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassConfig, EngineConfig};
    use crate::energy::{FreqStep, TableSpec};
    use crate::load::{CoreSample, LoadMirror};
    use crate::snapshot::{build_env, EnvOutcome};
    use crate::task::TaskRegistry;
    use strata_types::TaskId;

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

    fn filled_model(topo: &Topology) -> EnergyModel {
        let little = [
            FreqStep { freq_khz: 600_000, volt_uv: 600_000 },
            FreqStep { freq_khz: 1_200_000, volt_uv: 700_000 },
            FreqStep { freq_khz: 1_800_000, volt_uv: 850_000 },
        ];
        let big = [
            FreqStep { freq_khz: 800_000, volt_uv: 650_000 },
            FreqStep { freq_khz: 1_600_000, volt_uv: 800_000 },
            FreqStep { freq_khz: 2_400_000, volt_uv: 1_000_000 },
        ];
        let model = EnergyModel::new(topo);
        model
            .register(
                topo,
                core(0),
                TableSpec { mips: 10, coefficient: 120, min_freq: 0, max_freq: u64::MAX },
                &little,
            )
            .unwrap();
        model
            .register(
                topo,
                core(4),
                TableSpec { mips: 20, coefficient: 500, min_freq: 0, max_freq: u64::MAX },
                &big,
            )
            .unwrap();
        model
    }

    struct World {
        topo: Topology,
        load: LoadMirror,
        config: EngineConfig,
        tasks: TaskRegistry,
        model: EnergyModel,
        task: TaskId,
    }

    fn world(task_util: u64) -> World {
        let topo = topo();
        let load = LoadMirror::new(&topo);
        let config = EngineConfig::new();
        let class = config
            .classes
            .register(ClassConfig::builder("default"))
            .unwrap();
        let tasks = TaskRegistry::new();
        let model = filled_model(&topo);

        let task = TaskId::new(1);
        tasks
            .attach(task, class, CoreMask::from_bits(0xff), core(0), task_util)
            .unwrap();
        // Busy source so the fast path cannot decide early.
        load.idle_exit(core(0)).unwrap();
        World { topo, load, config, tasks, model, task }
    }

    fn env_of(w: &World, prev: CoreId, fit: CoreMask, policy: SchedPolicy) -> PlacementEnv {
        let state = w.tasks.get(w.task).unwrap();
        let class = w.config.classes.get(state.class).unwrap();
        let mut env = match build_env(
            &w.topo, &w.load, &w.config, true, w.task, &state, &class, prev, false, true,
        ) {
            EnvOutcome::Ready(env) => env,
            other => panic!("expected full env, got {:?}", other),
        };
        env.fit = fit;
        env.policy = policy;
        env.finalize_fit();
        env
    }

    fn best(w: &World, env: &PlacementEnv) -> CoreId {
        let tunables = w.config.tunables();
        find_best_core(env, &w.topo, &tunables, &w.model).unwrap()
    }

    fn load_core(w: &World, idx: usize, util: u64) {
        w.load.idle_exit(core(idx)).unwrap();
        w.load
            .update(
                core(idx),
                CoreSample { util_avg: util, ..Default::default() },
            )
            .unwrap();
    }

    fn residue(w: &World, idx: usize, util: u64) {
        // Decayed utilization left on a core that is idle again.
        w.load
            .update(
                core(idx),
                CoreSample { util_avg: util, ..Default::default() },
            )
            .unwrap();
    }

    #[test]
    fn test_min_load_core_scans_allowed() {
        let w = world(100);
        w.tasks.set_allowed(w.task, CoreMask::from_bits(0x0e)).unwrap();
        load_core(&w, 1, 90);
        load_core(&w, 2, 40);
        load_core(&w, 3, 250);
        let env = env_of(&w, core(1), CoreMask::from_bits(0x0e), SchedPolicy::MinUtil);
        // The source core carries the projected view, the others their own.
        assert_eq!(find_min_load_core(&env).unwrap(), core(2));
    }

    #[test]
    fn test_min_util_prefers_idle_slowest_member() {
        let w = world(100);
        load_core(&w, 0, 300);
        residue(&w, 1, 50);
        residue(&w, 2, 20);
        let env = env_of(&w, core(0), CoreMask::from_bits(0x17), SchedPolicy::MinUtil);
        // Idle members of the slowest group shadow the busy one.
        assert_eq!(best(&w, &env), core(2));
    }

    #[test]
    fn test_min_util_skips_undersized_awake_cores() {
        let w = world(100);
        // A raised floor promotes the starting class to the fast group.
        w.tasks.set_uclamp(w.task, 200, 1024).unwrap();
        load_core(&w, 1, 10);
        residue(&w, 5, 100);
        load_core(&w, 6, 400);
        let env = env_of(&w, core(0), CoreMask::from_bits(0x62), SchedPolicy::MinUtil);
        assert_eq!(env.start.cap, 1024);
        // Core 1 is awake and under the start class, so the fast group wins.
        assert_eq!(best(&w, &env), core(5));
    }

    #[test]
    fn test_min_util_advantage_keeps_current_core() {
        let w = world(100);
        load_core(&w, 4, 200);
        load_core(&w, 5, 200);
        let env = env_of(&w, core(4), CoreMask::from_bits(0x30), SchedPolicy::MinUtil);
        // Equal projections, but the current core runs with a discount.
        assert_eq!(best(&w, &env), core(4));
    }

    #[test]
    fn test_energy_picks_cheaper_group() {
        let w = world(100);
        let env = env_of(&w, core(0), CoreMask::from_bits(0x22), SchedPolicy::Energy);
        // A small task is cheaper on the little group.
        assert_eq!(best(&w, &env), core(1));
    }

    #[test]
    fn test_energy_single_group_shortcut() {
        let w = world(100);
        residue(&w, 4, 80);
        residue(&w, 5, 10);
        let env = env_of(&w, core(0), CoreMask::from_bits(0x30), SchedPolicy::Energy);
        // One group in fit: its least-loaded member is the answer.
        assert_eq!(best(&w, &env), core(5));
    }

    #[test]
    fn test_energy_tiny_task_resettles_on_idle_member() {
        let w = world(30);
        // The busy little core is the group's least-loaded candidate, but a
        // tiny task sleeps better next door on the idle member.
        load_core(&w, 1, 10);
        residue(&w, 2, 60);
        let env = env_of(&w, core(0), CoreMask::from_bits(0x16), SchedPolicy::Energy);
        assert_eq!(best(&w, &env), core(2));
    }

    #[test]
    fn test_energy_without_model_falls_to_min_util() {
        let w = world(100);
        let empty = EnergyModel::new(&w.topo);
        residue(&w, 1, 90);
        residue(&w, 2, 30);
        let env = env_of(&w, core(0), CoreMask::from_bits(0x06), SchedPolicy::Energy);
        let tunables = w.config.tunables();
        let got = find_best_core(&env, &w.topo, &tunables, &empty).unwrap();
        assert_eq!(got, core(2));
    }

    #[test]
    fn test_eff_idle_first_for_latency_sensitive() {
        let w = world(100);
        // Weight the little group so its busy core scores as the most
        // efficient home for the task.
        w.model
            .set_weights(
                &w.topo,
                core(0),
                crate::energy::GroupWeights { c_weight: 400, e_weight: 100 },
            )
            .unwrap();
        load_core(&w, 1, 50);
        let mut env = env_of(&w, core(0), CoreMask::from_bits(0x22), SchedPolicy::Efficiency);
        env.latency_sensitive = true;
        env.finalize_fit();
        // A latency-sensitive task still takes the idle fast core first.
        assert_eq!(best(&w, &env), core(5));

        env.latency_sensitive = false;
        assert_eq!(best(&w, &env), core(1));
    }

    #[test]
    fn test_eff_discount_keeps_current_core() {
        let w = world(100);
        load_core(&w, 1, 50);
        load_core(&w, 2, 50);
        let env = env_of(&w, core(2), CoreMask::from_bits(0x06), SchedPolicy::Efficiency);
        // Identical twins in one group: the discounted current core wins.
        assert_eq!(best(&w, &env), core(2));
    }

    #[test]
    fn test_perf_takes_max_spare() {
        let w = world(100);
        load_core(&w, 1, 200);
        load_core(&w, 5, 200);
        let env = env_of(&w, core(0), CoreMask::from_bits(0x22), SchedPolicy::Performance);
        assert_eq!(best(&w, &env), core(5));
    }

    #[test]
    fn test_perf_idle_first_for_latency_sensitive() {
        let w = world(100);
        residue(&w, 1, 30);
        load_core(&w, 5, 200);
        let mut env = env_of(&w, core(0), CoreMask::from_bits(0x22), SchedPolicy::Performance);
        env.latency_sensitive = true;
        env.finalize_fit();
        // The idle little core beats the fast one with more raw spare.
        assert_eq!(best(&w, &env), core(1));
    }

    #[test]
    fn test_semi_perf_prefers_shallow_idle_capacity() {
        let w = world(100);
        w.load.idle_enter(core(4), 2000).unwrap();
        w.load.idle_enter(core(5), 500).unwrap();
        let env = env_of(&w, core(0), CoreMask::from_bits(0x32), SchedPolicy::SemiPerformance);
        // Among equal-capacity idle cores the cheaper wakeup wins, and both
        // beat the idle little core.
        assert_eq!(best(&w, &env), core(5));
    }

    #[test]
    fn test_semi_perf_busy_needs_more_spare_than_idle() {
        let w = world(100);
        load_core(&w, 5, 100);
        let env = env_of(&w, core(0), CoreMask::from_bits(0x22), SchedPolicy::SemiPerformance);
        // Busy fast core offers more headroom than the idle little core.
        assert_eq!(best(&w, &env), core(5));

        let mut env = env_of(&w, core(0), CoreMask::from_bits(0x22), SchedPolicy::SemiPerformance);
        env.latency_sensitive = true;
        // Latency-sensitive placement never trades idle for busy.
        assert_eq!(best(&w, &env), core(1));
    }

    #[test]
    fn test_fallback_to_current_core() {
        let w = world(100);
        let mut env = env_of(&w, core(0), CoreMask::from_bits(0x06), SchedPolicy::MinUtil);
        env.fit = CoreMask::new();
        // Nothing fits: the task stays where it is.
        assert_eq!(best(&w, &env), core(0));
    }
}
