//! # Topology
//!
//! Heterogeneous processors cluster cores by microarchitecture: every core in
//! a group shares one design capacity, and groups are ordered from the
//! smallest capacity to the largest. The placement paths lean on that order
//! constantly, so the group table is built once at attach time and never
//! mutated afterwards.

extern crate alloc;

use alloc::vec::Vec;

use strata_types::{CoreId, MAX_CORES};

use crate::error::{EngineError, EngineResult};
use crate::mask::CoreMask;

// ============================================================================
// CORE GROUP
// ============================================================================

/// One capacity class: a set of identical cores.
#[derive(Debug, Clone, Copy)]
pub struct CoreGroup {
    /// Position in the capacity order, 0 = slowest.
    pub index: usize,
    /// Cores belonging to this group.
    pub cores: CoreMask,
    /// Design capacity of each core at its top frequency.
    pub cap_orig: u64,
}

impl CoreGroup {
    /// Lowest-numbered core, used as the group representative.
    #[inline]
    pub fn representative(&self) -> Option<CoreId> {
        self.cores.first()
    }
}

// ============================================================================
// TOPOLOGY
// ============================================================================

/// Immutable description of the processor layout.
pub struct Topology {
    groups: Vec<CoreGroup>,
    all: CoreMask,
    /// Group index per core, dense lookup.
    group_of: [u8; MAX_CORES],
    /// Design capacity per core, dense lookup.
    cap_of: [u64; MAX_CORES],
    /// Sum of design capacities over every core.
    max_capacity_sum: u64,
}

impl Topology {
    /// Start building a topology. Groups must be added slowest first.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder { groups: Vec::new() }
    }

    /// Every core in the topology.
    #[inline]
    pub fn all_cores(&self) -> CoreMask {
        self.all
    }

    /// Number of cores.
    #[inline]
    pub fn nr_cores(&self) -> usize {
        self.all.weight()
    }

    /// Capacity groups, slowest first.
    #[inline]
    pub fn groups(&self) -> &[CoreGroup] {
        &self.groups
    }

    /// True if the core index belongs to the topology.
    #[inline]
    pub fn holds(&self, core: CoreId) -> bool {
        core.index() < MAX_CORES && self.all.contains(core)
    }

    /// Group a core belongs to.
    #[inline]
    pub fn group_of(&self, core: CoreId) -> &CoreGroup {
        &self.groups[self.group_of[core.index()] as usize]
    }

    /// All cores sharing a capacity class with `core`, including itself.
    #[inline]
    pub fn siblings(&self, core: CoreId) -> CoreMask {
        self.group_of(core).cores
    }

    /// Design capacity of a core at its top frequency.
    #[inline]
    pub fn cap_orig(&self, core: CoreId) -> u64 {
        self.cap_of[core.index()]
    }

    /// Cores of the lowest-capacity group.
    #[inline]
    pub fn slowest_mask(&self) -> CoreMask {
        self.groups[0].cores
    }

    /// Cores of the highest-capacity group.
    #[inline]
    pub fn fastest_mask(&self) -> CoreMask {
        self.groups[self.groups.len() - 1].cores
    }

    /// True if the core sits in the lowest-capacity group.
    #[inline]
    pub fn is_slowest(&self, core: CoreId) -> bool {
        self.group_of[core.index()] == 0
    }

    /// True if the core sits in the highest-capacity group.
    #[inline]
    pub fn is_fastest(&self, core: CoreId) -> bool {
        self.group_of[core.index()] as usize == self.groups.len() - 1
    }

    /// True if both cores share one capacity class.
    #[inline]
    pub fn same_group(&self, a: CoreId, b: CoreId) -> bool {
        self.group_of[a.index()] == self.group_of[b.index()]
    }

    /// Union of every group strictly faster than group `index`.
    pub fn faster_mask(&self, index: usize) -> CoreMask {
        let mut mask = CoreMask::new();
        for group in self.groups.iter().skip(index + 1) {
            mask |= group.cores;
        }
        mask
    }

    /// Sum of design capacities over the whole topology.
    #[inline]
    pub fn max_capacity_sum(&self) -> u64 {
        self.max_capacity_sum
    }
}

impl core::fmt::Debug for Topology {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Topology")
            .field("groups", &self.groups.len())
            .field("cores", &self.nr_cores())
            .finish()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder collecting capacity groups before validation.
pub struct TopologyBuilder {
    groups: Vec<(CoreMask, u64)>,
}

impl TopologyBuilder {
    /// Add one capacity group. Call in ascending capacity order.
    pub fn with_group(mut self, cores: CoreMask, cap_orig: u64) -> Self {
        self.groups.push((cores, cap_orig));
        self
    }

    /// Validate and freeze the topology.
    pub fn build(self) -> EngineResult<Topology> {
        if self.groups.is_empty() {
            return Err(EngineError::invalid_config(
                "topology",
                "at least one core group is required",
            ));
        }

        let mut all = CoreMask::new();
        let mut group_of = [0u8; MAX_CORES];
        let mut cap_of = [0u64; MAX_CORES];
        let mut max_capacity_sum = 0u64;
        let mut prev_cap = 0u64;
        let mut groups = Vec::with_capacity(self.groups.len());

        for (index, (cores, cap_orig)) in self.groups.into_iter().enumerate() {
            if cores.is_empty() {
                return Err(EngineError::invalid_config(
                    "topology",
                    "a core group may not be empty",
                ));
            }
            if cap_orig == 0 || cap_orig > strata_types::CAPACITY_SCALE {
                return Err(EngineError::invalid_config(
                    "topology",
                    "group capacity must be in 1..=1024",
                ));
            }
            if cap_orig <= prev_cap {
                return Err(EngineError::invalid_config(
                    "topology",
                    "groups must be added in ascending capacity order",
                ));
            }
            if cores.intersects(&all) {
                return Err(EngineError::invalid_config(
                    "topology",
                    "core groups may not overlap",
                ));
            }

            for core in cores.iter() {
                group_of[core.index()] = index as u8;
                cap_of[core.index()] = cap_orig;
                max_capacity_sum += cap_orig;
            }
            all |= cores;
            prev_cap = cap_orig;
            groups.push(CoreGroup {
                index,
                cores,
                cap_orig,
            });
        }

        Ok(Topology {
            groups,
            all,
            group_of,
            cap_of,
            max_capacity_sum,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
