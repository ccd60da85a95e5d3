//! Bounded task-class registry.
//!
//! Task classes map user-meaningful groups (foreground, background,
//! workers) onto placement behavior: a base selection policy, boost level,
//! pinning role, and optional core-preference sets. Slots are allocated at
//! registration time through a builder and the registry never grows past
//! its fixed capacity.

extern crate alloc;

use alloc::vec::Vec;

use spin::RwLock;
use strata_types::{ClassId, CAPACITY_SCALE};

use crate::error::{EngineError, EngineResult};
use crate::mask::CoreMask;
use crate::select::SchedPolicy;

/// Fixed number of class slots.
pub const MAX_CLASSES: usize = 16;

// ============================================================================
// CLASS CONFIGURATION
// ============================================================================

/// Role a class plays in priority pinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassPinning {
    /// No pinning behavior.
    #[default]
    None,
    /// Runs on the reserved fast-core subset, keeping it to itself.
    Express,
    /// Kept away from the fastest cores and from express-occupied cores.
    Suppressed,
}

/// How a class responds to the global boost switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoostResponse {
    /// Global boost does not change this class's policy.
    #[default]
    Ignore,
    /// Global boost promotes the class to Performance placement.
    Performance,
    /// Global boost promotes the class to SemiPerformance placement.
    SemiPerformance,
}

/// Utilization-banded core preferences for one class.
#[derive(Debug, Clone, Copy)]
pub struct PreferSet {
    /// Tasks at or below this utilization use `light_prefer`.
    pub light_threshold: u64,
    /// Tasks at or above this utilization use `heavy_prefer`.
    pub heavy_threshold: u64,
    /// Preferred cores for boosted or on-top tasks.
    pub prefer: CoreMask,
    /// Preferred cores for light tasks.
    pub light_prefer: CoreMask,
    /// Preferred cores for heavy tasks.
    pub heavy_prefer: CoreMask,
}

/// Placement behavior of one task class.
#[derive(Debug, Clone, Copy)]
pub struct ClassConfig {
    pub name: &'static str,
    /// Base selection policy before the promotion ladder runs.
    pub policy: SchedPolicy,
    /// Boost level, 0..=100. Anything above zero marks tasks boosted.
    pub boost_pct: u32,
    /// Idle cores are worth a deeper search for this class.
    pub latency_sensitive: bool,
    pub pinning: ClassPinning,
    /// Whether tasks of this class participate in upward migration.
    pub ontime_enabled: bool,
    /// Background worker units, placed for energy over latency.
    pub worker: bool,
    pub boost_response: BoostResponse,
    pub prefer: Option<PreferSet>,
}

impl ClassConfig {
    /// Start describing a class.
    pub fn builder(name: &'static str) -> ClassConfigBuilder {
        ClassConfigBuilder {
            config: ClassConfig {
                name,
                policy: SchedPolicy::Efficiency,
                boost_pct: 0,
                latency_sensitive: false,
                pinning: ClassPinning::None,
                ontime_enabled: true,
                worker: false,
                boost_response: BoostResponse::Ignore,
                prefer: None,
            },
        }
    }

    #[inline]
    pub fn boosted(&self) -> bool {
        self.boost_pct > 0
    }
}

/// Builder collecting one class's knobs before validation.
pub struct ClassConfigBuilder {
    config: ClassConfig,
}

impl ClassConfigBuilder {
    #[inline(always)]
    pub fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    #[inline(always)]
    pub fn with_boost(mut self, pct: u32) -> Self {
        self.config.boost_pct = pct;
        self
    }

    #[inline(always)]
    pub fn with_latency_sensitive(mut self, on: bool) -> Self {
        self.config.latency_sensitive = on;
        self
    }

    #[inline(always)]
    pub fn with_pinning(mut self, pinning: ClassPinning) -> Self {
        self.config.pinning = pinning;
        self
    }

    #[inline(always)]
    pub fn with_ontime(mut self, on: bool) -> Self {
        self.config.ontime_enabled = on;
        self
    }

    #[inline(always)]
    pub fn with_worker(mut self, on: bool) -> Self {
        self.config.worker = on;
        self
    }

    #[inline(always)]
    pub fn with_boost_response(mut self, response: BoostResponse) -> Self {
        self.config.boost_response = response;
        self
    }

    #[inline(always)]
    pub fn with_prefer(mut self, prefer: PreferSet) -> Self {
        self.config.prefer = Some(prefer);
        self
    }

    fn validate(&self) -> EngineResult<()> {
        if self.config.boost_pct > 100 {
            return Err(EngineError::invalid_config("boost_pct", "must be 0..=100"));
        }
        if let Some(prefer) = &self.config.prefer {
            if prefer.light_threshold > prefer.heavy_threshold {
                return Err(EngineError::invalid_config(
                    "prefer",
                    "light threshold must not exceed heavy threshold",
                ));
            }
            if prefer.heavy_threshold > CAPACITY_SCALE {
                return Err(EngineError::invalid_config(
                    "prefer",
                    "thresholds must be within capacity scale",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Bounded registry of task classes.
pub struct ClassRegistry {
    slots: RwLock<Vec<ClassConfig>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::with_capacity(MAX_CLASSES)),
        }
    }

    /// Validate and commit a class. Returns the slot id.
    pub fn register(&self, builder: ClassConfigBuilder) -> EngineResult<ClassId> {
        builder.validate()?;
        let mut slots = self.slots.write();
        if slots.len() >= MAX_CLASSES {
            return Err(EngineError::registry_full("classes", MAX_CLASSES));
        }
        let id = ClassId::from_index(slots.len());
        slots.push(builder.config);
        Ok(id)
    }

    /// Copy of one class's configuration.
    pub fn get(&self, class: ClassId) -> EngineResult<ClassConfig> {
        self.slots
            .read()
            .get(class.index())
            .copied()
            .ok_or(EngineError::UnknownClass(class))
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    // ------------------------------------------------------------------
    // Runtime updates, validated like the initial registration
    // ------------------------------------------------------------------

    pub fn set_boost(&self, class: ClassId, pct: u32) -> EngineResult<()> {
        if pct > 100 {
            return Err(EngineError::invalid_config("boost_pct", "must be 0..=100"));
        }
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(class.index())
            .ok_or(EngineError::UnknownClass(class))?;
        slot.boost_pct = pct;
        Ok(())
    }

    pub fn set_policy(&self, class: ClassId, policy: SchedPolicy) -> EngineResult<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(class.index())
            .ok_or(EngineError::UnknownClass(class))?;
        slot.policy = policy;
        Ok(())
    }

    pub fn set_ontime(&self, class: ClassId, on: bool) -> EngineResult<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(class.index())
            .ok_or(EngineError::UnknownClass(class))?;
        slot.ontime_enabled = on;
        Ok(())
    }

    pub fn set_prefer(&self, class: ClassId, prefer: PreferSet) -> EngineResult<()> {
        if prefer.light_threshold > prefer.heavy_threshold {
            return Err(EngineError::invalid_config(
                "prefer",
                "light threshold must not exceed heavy threshold",
            ));
        }
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(class.index())
            .ok_or(EngineError::UnknownClass(class))?;
        slot.prefer = Some(prefer);
        Ok(())
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
