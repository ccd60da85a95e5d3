//! Global tunables with validated runtime updates.
//!
//! Every knob ships with the default the engine was tuned against. A
//! rejected write leaves the prior value in effect.

use strata_types::CAPACITY_SCALE;

use crate::error::{EngineError, EngineResult};

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    /// A task at or above this percentage of full scale is heavy.
    heavy_task_pct: u32,
    /// A task at or above this percentage of full scale misfits every core
    /// but the fastest.
    misfit_task_pct: u32,
    /// Energy advantage granted to the task's current core, as a right
    /// shift of task utilization. 3 = 12.5%.
    prev_advantage_shift: u32,
    /// Efficiency discount granted to the task's current core, as a right
    /// shift of the efficiency figure. 4 = 6.25%.
    eff_discount_shift: u32,
    /// A task below `slowest capacity >> shift` is tiny enough to re-search
    /// idle slow cores after an energy decision.
    tiny_task_shift: u32,
    /// Below `scale >> shift`, Efficiency placement downgrades to Energy.
    small_task_shift: u32,
    /// Honor synchronous-wakeup hints in the filter pipeline.
    sync_hint_enabled: bool,
    /// A forked task is seeded at this percentage of its starting core's
    /// original capacity.
    new_task_pct: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            heavy_task_pct: 40,
            misfit_task_pct: 80,
            prev_advantage_shift: 3,
            eff_discount_shift: 4,
            tiny_task_shift: 3,
            small_task_shift: 6,
            sync_hint_enabled: true,
            new_task_pct: 25,
        }
    }
}

impl Tunables {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Derived thresholds
    // ------------------------------------------------------------------

    /// Utilization at which a task counts as heavy.
    #[inline]
    pub fn heavy_task_util(&self) -> u64 {
        CAPACITY_SCALE * self.heavy_task_pct as u64 / 100
    }

    /// Utilization at which a task counts as a misfit.
    #[inline]
    pub fn misfit_task_util(&self) -> u64 {
        CAPACITY_SCALE * self.misfit_task_pct as u64 / 100
    }

    #[inline]
    pub fn is_heavy_task(&self, util: u64) -> bool {
        util >= self.heavy_task_util()
    }

    #[inline]
    pub fn is_misfit_task(&self, util: u64) -> bool {
        util >= self.misfit_task_util()
    }

    /// Energy advantage of staying on the current core.
    #[inline]
    pub fn prev_core_advantage(&self, task_util: u64) -> u64 {
        task_util >> self.prev_advantage_shift
    }

    /// Efficiency discount of staying on the current core.
    #[inline]
    pub fn eff_discount(&self, eff: u64) -> u64 {
        eff >> self.eff_discount_shift
    }

    /// Tiny-task bound relative to the slowest group's capacity.
    #[inline]
    pub fn tiny_task_util(&self, slowest_cap: u64) -> u64 {
        slowest_cap >> self.tiny_task_shift
    }

    /// Bound under which Efficiency placement downgrades to Energy.
    #[inline]
    pub fn small_task_util(&self) -> u64 {
        CAPACITY_SCALE >> self.small_task_shift
    }

    #[inline]
    pub fn sync_hint_enabled(&self) -> bool {
        self.sync_hint_enabled
    }

    /// Starting utilization for a task forked onto a core of capacity `cap`.
    #[inline]
    pub fn new_task_util(&self, cap: u64) -> u64 {
        cap * self.new_task_pct as u64 / 100
    }

    // ------------------------------------------------------------------
    // Validated setters
    // ------------------------------------------------------------------

    pub fn set_heavy_task_pct(&mut self, pct: u32) -> EngineResult<()> {
        if pct > 100 {
            return Err(EngineError::invalid_config(
                "heavy_task_pct",
                "must be 0..=100",
            ));
        }
        self.heavy_task_pct = pct;
        Ok(())
    }

    pub fn set_misfit_task_pct(&mut self, pct: u32) -> EngineResult<()> {
        if pct > 100 {
            return Err(EngineError::invalid_config(
                "misfit_task_pct",
                "must be 0..=100",
            ));
        }
        self.misfit_task_pct = pct;
        Ok(())
    }

    pub fn set_prev_advantage_shift(&mut self, shift: u32) -> EngineResult<()> {
        if shift > strata_types::CAPACITY_SHIFT {
            return Err(EngineError::invalid_config(
                "prev_advantage_shift",
                "must be 0..=10",
            ));
        }
        self.prev_advantage_shift = shift;
        Ok(())
    }

    pub fn set_eff_discount_shift(&mut self, shift: u32) -> EngineResult<()> {
        if shift > strata_types::CAPACITY_SHIFT {
            return Err(EngineError::invalid_config(
                "eff_discount_shift",
                "must be 0..=10",
            ));
        }
        self.eff_discount_shift = shift;
        Ok(())
    }

    pub fn set_tiny_task_shift(&mut self, shift: u32) -> EngineResult<()> {
        if shift > strata_types::CAPACITY_SHIFT {
            return Err(EngineError::invalid_config(
                "tiny_task_shift",
                "must be 0..=10",
            ));
        }
        self.tiny_task_shift = shift;
        Ok(())
    }

    pub fn set_small_task_shift(&mut self, shift: u32) -> EngineResult<()> {
        if shift > strata_types::CAPACITY_SHIFT {
            return Err(EngineError::invalid_config(
                "small_task_shift",
                "must be 0..=10",
            ));
        }
        self.small_task_shift = shift;
        Ok(())
    }

    pub fn set_sync_hint_enabled(&mut self, enabled: bool) {
        self.sync_hint_enabled = enabled;
    }

    pub fn set_new_task_pct(&mut self, pct: u32) -> EngineResult<()> {
        if pct > 100 {
            return Err(EngineError::invalid_config(
                "new_task_pct",
                "must be 0..=100",
            ));
        }
        self.new_task_pct = pct;
        Ok(())
    }
}
