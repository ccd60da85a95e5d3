//! Per-group frequency, capacity, and power tables.
//!
//! Each capacity group carries one table with a row per operating point:
//! the frequency, the compute capacity delivered at that frequency, and the
//! dynamic power drawn there. Power is derived from the classic `C * f * V^2`
//! model; capacity is rescaled across all registered tables so the fastest
//! group's top operating point lands exactly at the capacity scale.

extern crate alloc;

use alloc::vec::Vec;

use strata_types::{CAPACITY_SCALE, CAPACITY_SHIFT};

use crate::error::{EngineError, EngineResult};

/// Utilization expressed as a fraction of `capacity`, on the 1024 scale.
/// Demand at or beyond capacity saturates at the full scale.
#[inline]
pub fn normalized_util(util: u64, capacity: u64) -> u64 {
    if capacity == 0 || util >= capacity {
        return CAPACITY_SCALE;
    }
    (util << CAPACITY_SHIFT) / capacity
}

// ============================================================================
// OPERATING POINTS
// ============================================================================

/// One frequency/voltage row as the host platform reports it.
#[derive(Debug, Clone, Copy)]
pub struct FreqStep {
    /// Operating frequency in kHz.
    pub freq_khz: u64,
    /// Supply voltage at that frequency, in uV.
    pub volt_uv: u64,
}

/// One operating point after power and capacity derivation.
#[derive(Debug, Clone, Copy)]
pub struct EnergyState {
    /// Operating frequency in kHz.
    pub frequency: u64,
    /// Compute capacity delivered at this frequency, 0..=1024.
    pub cap: u64,
    /// Dynamic power at this frequency, model units.
    pub power: u64,
}

/// Static parameters of one group's table.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Relative instruction throughput of the group's cores. The group with
    /// the highest value anchors the capacity scale.
    pub mips: u64,
    /// Dynamic power coefficient for `C * f * V^2`.
    pub coefficient: u64,
    /// Lowest usable frequency, kHz. Rows below are dropped.
    pub min_freq: u64,
    /// Highest usable frequency, kHz. Rows above are dropped.
    pub max_freq: u64,
}

// ============================================================================
// TABLE
// ============================================================================

/// Energy table of one capacity group. States are sorted ascending by
/// frequency; capacities are filled in by a model-wide rescale.
#[derive(Debug, Clone)]
pub struct EnergyTable {
    mips: u64,
    states: Vec<EnergyState>,
}

impl EnergyTable {
    /// Derive per-state power from the platform's frequency/voltage rows.
    /// Capacities stay zero until the owning model rescales them.
    pub fn build(spec: TableSpec, steps: &[FreqStep]) -> EngineResult<Self> {
        if spec.mips == 0 {
            return Err(EngineError::invalid_config("mips", "must be positive"));
        }
        if spec.min_freq > spec.max_freq {
            return Err(EngineError::invalid_config(
                "freq window",
                "min_freq must not exceed max_freq",
            ));
        }

        let mut states = Vec::with_capacity(steps.len());
        for step in steps {
            if step.freq_khz == 0 || step.volt_uv == 0 {
                return Err(EngineError::invalid_config(
                    "steps",
                    "frequency and voltage must be positive",
                ));
            }
            if step.freq_khz < spec.min_freq || step.freq_khz > spec.max_freq {
                continue;
            }
            let f = step.freq_khz / 1000;
            let v = step.volt_uv / 1000;
            states.push(EnergyState {
                frequency: step.freq_khz,
                cap: 0,
                power: spec.coefficient * f * v * v / 1_000_000_000,
            });
        }
        if states.is_empty() {
            return Err(EngineError::invalid_config(
                "steps",
                "no operating point inside the frequency window",
            ));
        }
        states.sort_unstable_by_key(|s| s.frequency);

        Ok(Self {
            mips: spec.mips,
            states,
        })
    }

    #[inline]
    pub fn mips(&self) -> u64 {
        self.mips
    }

    #[inline]
    pub fn nr_states(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn states(&self) -> &[EnergyState] {
        &self.states
    }

    /// Highest operating frequency.
    #[inline]
    pub fn top_frequency(&self) -> u64 {
        self.states[self.states.len() - 1].frequency
    }

    /// Capacity at the highest operating point.
    #[inline]
    pub fn cap_max(&self) -> u64 {
        self.states[self.states.len() - 1].cap
    }

    /// The lowest operating point whose capacity covers `util`. Demand
    /// beyond the table runs at the top operating point.
    pub fn state_for_util(&self, util: u64) -> &EnergyState {
        for state in &self.states {
            if state.cap >= util {
                return state;
            }
        }
        &self.states[self.states.len() - 1]
    }

    /// Capacity at the lowest operating point running at least `freq`, or
    /// zero when the table tops out below it.
    pub fn cap_at_freq(&self, freq: u64) -> u64 {
        for state in &self.states {
            if state.frequency >= freq {
                return state.cap;
            }
        }
        0
    }

    /// Refill capacities against the model-wide anchor: the table with the
    /// highest throughput at its top frequency defines the 1024 point, and
    /// every state scales linearly with frequency and throughput from there.
    pub(crate) fn rescale_caps(&mut self, max_mips: u64, max_mips_freq: u64) {
        for state in &mut self.states {
            state.cap =
                state.frequency * self.mips * CAPACITY_SCALE / max_mips_freq / max_mips;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> [FreqStep; 4] {
        [
            FreqStep { freq_khz: 2_400_000, volt_uv: 1_000_000 },
            FreqStep { freq_khz: 600_000, volt_uv: 600_000 },
            FreqStep { freq_khz: 1_200_000, volt_uv: 700_000 },
            FreqStep { freq_khz: 1_800_000, volt_uv: 850_000 },
        ]
    }

    fn spec() -> TableSpec {
        TableSpec {
            mips: 20,
            coefficient: 500,
            min_freq: 0,
            max_freq: u64::MAX,
        }
    }

    #[test]
    fn test_build_sorts_and_derives_power() {
        let table = EnergyTable::build(spec(), &steps()).unwrap();
        assert_eq!(table.nr_states(), 4);
        assert_eq!(table.states()[0].frequency, 600_000);
        assert_eq!(table.top_frequency(), 2_400_000);
        // 500 * 600 * 600^2 / 1e9
        assert_eq!(table.states()[0].power, 108);
        // 500 * 2400 * 1000^2 / 1e9
        assert_eq!(table.states()[3].power, 1200);
    }

    #[test]
    fn test_frequency_window_drops_rows() {
        let table = EnergyTable::build(
            TableSpec {
                min_freq: 700_000,
                max_freq: 2_000_000,
                ..spec()
            },
            &steps(),
        )
        .unwrap();
        assert_eq!(table.nr_states(), 2);
        assert_eq!(table.states()[0].frequency, 1_200_000);
        assert_eq!(table.top_frequency(), 1_800_000);
    }

    #[test]
    fn test_build_validation() {
        assert!(EnergyTable::build(TableSpec { mips: 0, ..spec() }, &steps()).is_err());
        assert!(EnergyTable::build(spec(), &[]).is_err());
        assert!(EnergyTable::build(
            spec(),
            &[FreqStep { freq_khz: 0, volt_uv: 900_000 }],
        )
        .is_err());
        // Window that excludes every row
        assert!(EnergyTable::build(
            TableSpec {
                min_freq: 3_000_000,
                max_freq: 4_000_000,
                ..spec()
            },
            &steps(),
        )
        .is_err());
    }

    #[test]
    fn test_rescale_anchors_top_state() {
        let mut table = EnergyTable::build(spec(), &steps()).unwrap();
        table.rescale_caps(20, 2_400_000);
        assert_eq!(table.cap_max(), 1024);
        // 600 MHz at the anchor throughput: a quarter of the scale
        assert_eq!(table.states()[0].cap, 256);
    }

    #[test]
    fn test_state_for_util_picks_covering_state() {
        let mut table = EnergyTable::build(spec(), &steps()).unwrap();
        table.rescale_caps(20, 2_400_000);
        assert_eq!(table.state_for_util(0).frequency, 600_000);
        assert_eq!(table.state_for_util(256).frequency, 600_000);
        assert_eq!(table.state_for_util(257).frequency, 1_200_000);
        // Beyond the table: top state
        assert_eq!(table.state_for_util(2000).frequency, 2_400_000);
    }

    #[test]
    fn test_cap_at_freq() {
        let mut table = EnergyTable::build(spec(), &steps()).unwrap();
        table.rescale_caps(20, 2_400_000);
        assert_eq!(table.cap_at_freq(600_000), 256);
        // Between states: the next state up serves the request
        assert_eq!(table.cap_at_freq(700_000), 512);
        assert_eq!(table.cap_at_freq(2_400_000), 1024);
        // Above the table
        assert_eq!(table.cap_at_freq(2_500_000), 0);
    }

    #[test]
    fn test_normalized_util() {
        assert_eq!(normalized_util(512, 1024), 512);
        assert_eq!(normalized_util(256, 512), 512);
        assert_eq!(normalized_util(0, 1024), 0);
        // Saturation at and beyond capacity
        assert_eq!(normalized_util(512, 512), 1024);
        assert_eq!(normalized_util(9000, 512), 1024);
        assert_eq!(normalized_util(100, 0), 1024);
    }
}
