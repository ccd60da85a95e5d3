//! Model registry and the two placement estimates.
//!
//! Tables register per capacity group as the host's frequency driver comes
//! up. Every registration rescales all capacities against the strongest
//! group, so the model stays internally consistent no matter the order.
//! Estimates read the placement snapshot only, never the live mirror.

extern crate alloc;

use alloc::vec::Vec;

use log::debug;
use spin::RwLock;
use strata_types::{CAPACITY_SCALE, CAPACITY_SHIFT, CoreId};

use crate::error::{EngineError, EngineResult};
use crate::snapshot::PlacementEnv;
use crate::topology::Topology;

use super::table::{normalized_util, EnergyTable, FreqStep, TableSpec};

/// Estimate for a core the model cannot price.
pub const ENERGY_UNKNOWN: u64 = u64::MAX;

// ============================================================================
// WEIGHTS
// ============================================================================

/// Efficiency weighting of one group. Raising `e_weight` makes energy count
/// for more, raising `c_weight` makes capacity count for more.
#[derive(Debug, Clone, Copy)]
pub struct GroupWeights {
    pub c_weight: u64,
    pub e_weight: u64,
}

impl Default for GroupWeights {
    fn default() -> Self {
        Self {
            c_weight: 100,
            e_weight: 100,
        }
    }
}

impl core::fmt::Display for GroupWeights {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "c_weight={} e_weight={}", self.c_weight, self.e_weight)
    }
}

// ============================================================================
// MODEL
// ============================================================================

/// Energy model of the whole processor: one table per capacity group plus
/// the per-group efficiency weights.
pub struct EnergyModel {
    tables: RwLock<Vec<Option<EnergyTable>>>,
    weights: RwLock<Vec<GroupWeights>>,
    nr_groups: usize,
}

impl EnergyModel {
    /// Empty model with a slot per topology group. Not ready until every
    /// slot is filled.
    pub fn new(topo: &Topology) -> Self {
        let nr_groups = topo.groups().len();
        let mut tables = Vec::with_capacity(nr_groups);
        let mut weights = Vec::with_capacity(nr_groups);
        for _ in 0..nr_groups {
            tables.push(None);
            weights.push(GroupWeights::default());
        }
        Self {
            tables: RwLock::new(tables),
            weights: RwLock::new(weights),
            nr_groups,
        }
    }

    /// True once every group has a registered table.
    pub fn ready(&self) -> bool {
        self.tables.read().iter().all(Option::is_some)
    }

    /// Register the table for the group containing `core`, then rescale all
    /// capacities so the strongest table tops out at the capacity scale.
    pub fn register(
        &self,
        topo: &Topology,
        core: CoreId,
        spec: TableSpec,
        steps: &[FreqStep],
    ) -> EngineResult<()> {
        if !topo.holds(core) {
            return Err(EngineError::InvalidCore(core));
        }
        let group = topo.group_of(core).index;
        let table = EnergyTable::build(spec, steps)?;

        let mut tables = self.tables.write();
        tables[group] = Some(table);
        rescale_all(&mut tables);

        for (idx, slot) in tables.iter().enumerate() {
            if let Some(t) = slot {
                debug!(
                    "energy: group {} spans cap {}..={} over {} states",
                    idx,
                    t.states()[0].cap,
                    t.cap_max(),
                    t.nr_states()
                );
            }
        }
        Ok(())
    }

    /// Replace the efficiency weights of the group containing `core`.
    pub fn set_weights(&self, topo: &Topology, core: CoreId, weights: GroupWeights) -> EngineResult<()> {
        if !topo.holds(core) {
            return Err(EngineError::InvalidCore(core));
        }
        if weights.c_weight == 0 || weights.e_weight == 0 {
            return Err(EngineError::invalid_config(
                "weights",
                "both weights must be positive",
            ));
        }
        let group = topo.group_of(core).index;
        self.weights.write()[group] = weights;
        Ok(())
    }

    /// Weights of the group containing `core`.
    pub fn weights_of(&self, topo: &Topology, core: CoreId) -> GroupWeights {
        self.weights.read()[topo.group_of(core).index]
    }

    /// Capacity the group of `core` delivers at `freq`, or zero when the
    /// table is absent or tops out below the request.
    pub fn cap_at_freq(&self, topo: &Topology, core: CoreId, freq: u64) -> u64 {
        if !topo.holds(core) {
            return 0;
        }
        let tables = self.tables.read();
        match &tables[topo.group_of(core).index] {
            Some(table) => table.cap_at_freq(freq),
            None => 0,
        }
    }

    /// Capacity of the group's top operating point, or zero when absent.
    pub fn cap_max(&self, topo: &Topology, core: CoreId) -> u64 {
        if !topo.holds(core) {
            return 0;
        }
        let tables = self.tables.read();
        match &tables[topo.group_of(core).index] {
            Some(table) => table.cap_max(),
            None => 0,
        }
    }

    /// Number of groups the model was built for.
    #[inline]
    pub fn nr_groups(&self) -> usize {
        self.nr_groups
    }

    // ------------------------------------------------------------------
    // Estimates
    // ------------------------------------------------------------------

    /// Total energy of the system with the waking task placed on `target`.
    ///
    /// Each group runs at the lowest operating point covering its loudest
    /// core, and every member contributes its utilization normalized to
    /// that point's capacity. Lower is better; `ENERGY_UNKNOWN` when a
    /// populated group has no table yet.
    pub fn estimate_energy(&self, topo: &Topology, env: &PlacementEnv, target: CoreId) -> u64 {
        let tables = self.tables.read();
        let mut total: u64 = 0;

        for group in topo.groups() {
            let members = group.cores & env.active;
            if members.is_empty() {
                continue;
            }
            let Some(table) = &tables[group.index] else {
                return ENERGY_UNKNOWN;
            };

            let mut max_util = 0;
            for core in members.iter() {
                max_util = max_util.max(demand(env, core, target));
            }
            let state = table.state_for_util(max_util);

            let mut util_sum = 0;
            for core in members.iter() {
                util_sum += normalized_util(demand(env, core, target), state.cap);
            }
            total = total.saturating_add(util_sum.saturating_mul(state.power));
        }
        total
    }

    /// Efficiency of placing the waking task on `target`, judged within the
    /// target's group only: energy spent there divided by capacity gained,
    /// shaped by the group's weights. Lower is better.
    pub fn estimate_efficiency(&self, topo: &Topology, env: &PlacementEnv, target: CoreId) -> u64 {
        let group = topo.group_of(target);
        let members = group.cores & env.active;
        let tables = self.tables.read();
        let Some(table) = &tables[group.index] else {
            return ENERGY_UNKNOWN;
        };

        let mut max_util = 0;
        for core in members.iter() {
            max_util = max_util.max(demand(env, core, target));
        }
        let state = table.state_for_util(max_util);
        if state.cap == 0 {
            return ENERGY_UNKNOWN;
        }

        // A target already saturated at this operating point pays for the
        // full scale, otherwise for its projected share.
        let target_util = if demand(env, target, target) >= state.cap {
            CAPACITY_SCALE
        } else {
            env.stat(target).util_with
        };
        let ratio = normalized_util(target_util, state.cap);
        let energy = ratio * state.power;

        let w = self.weights.read()[group.index];
        let num = ((energy as u128) * (w.e_weight as u128)) << CAPACITY_SHIFT;
        let den = (state.cap as u128) * (w.c_weight as u128);
        (num / den).min(u64::MAX as u128) as u64
    }
}

/// Projected demand of one core with the waking task on `target`. The
/// snapshot's task-free view plus the task where it would land.
#[inline]
fn demand(env: &PlacementEnv, core: CoreId, target: CoreId) -> u64 {
    let mut util = env.stat(core).util_wo;
    if core == target {
        util += env.task_util;
    }
    util
}

/// Rescale every table against the strongest one.
fn rescale_all(tables: &mut [Option<EnergyTable>]) {
    let mut max_mips = 0;
    let mut max_mips_freq = 0;
    for table in tables.iter().flatten() {
        if table.mips() > max_mips {
            max_mips = table.mips();
            max_mips_freq = table.top_frequency();
        }
    }
    if max_mips == 0 {
        return;
    }
    for table in tables.iter_mut().flatten() {
        table.rescale_caps(max_mips, max_mips_freq);
    }
}

// ============================================================================
// TESTS
// ============================================================================
