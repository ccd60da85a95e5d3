//! # Configuration Surface
//!
//! Read-only inputs at decision time, written asynchronously by the host's
//! policy layer:
//!
//! - **tunables**: global numeric knobs with validated updates
//! - **classes**: the bounded task-class registry
//! - **boost**: global, boot-phase, and per-task boost switches

use core::sync::atomic::{AtomicBool, Ordering};

use spin::RwLock;

// ============================================================================
// SUBMODULES
// ============================================================================

mod boost;
mod classes;
mod tunables;

pub use boost::{BoostState, BootBoost};
pub use classes::{
    BoostResponse, ClassConfig, ClassConfigBuilder, ClassPinning, ClassRegistry, PreferSet,
    MAX_CLASSES,
};
pub use tunables::Tunables;

// ============================================================================
// AGGREGATE
// ============================================================================

/// Everything the host's policy layer can write and the decision paths read.
pub struct EngineConfig {
    pub tunables: RwLock<Tunables>,
    pub classes: ClassRegistry,
    pub boost: BoostState,
    /// System is suspending; capacity-class filters relax so work can land
    /// anywhere still running.
    suspending: AtomicBool,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            tunables: RwLock::new(Tunables::default()),
            classes: ClassRegistry::new(),
            boost: BoostState::new(),
            suspending: AtomicBool::new(false),
        }
    }

    /// Copy of the current tunables.
    #[inline]
    pub fn tunables(&self) -> Tunables {
        *self.tunables.read()
    }

    pub fn set_suspending(&self, on: bool) {
        self.suspending.store(on, Ordering::Release);
    }

    #[inline]
    pub fn is_suspending(&self) -> bool {
        self.suspending.load(Ordering::Acquire)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_defaults() {
        let config = EngineConfig::new();
        assert!(!config.is_suspending());
        assert_eq!(config.tunables().heavy_task_util(), 409);
        assert!(config.classes.is_empty());
        assert!(!config.boost.global_active());
    }

    #[test]
    fn test_suspend_flag() {
        let config = EngineConfig::new();
        config.set_suspending(true);
        assert!(config.is_suspending());
        config.set_suspending(false);
        assert!(!config.is_suspending());
    }
}
