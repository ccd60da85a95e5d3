//! Global and per-task boost switches.
//!
//! Three orthogonal boosts feed the policy promotion ladder: a global
//! level raised by the host during interaction bursts, a boot phase that
//! biases everything toward performance while the system comes up, and a
//! single task id singled out for semi-performance placement.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use strata_types::TaskId;

/// Boot progress, strongest bias first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootBoost {
    /// Boot finished, no bias.
    None = 0,
    /// Early init: every placement goes performance-first.
    Init = 1,
    /// Late boot: placements lean semi-performance.
    Boot = 2,
}

impl BootBoost {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Init,
            2 => Self::Boot,
            _ => Self::None,
        }
    }
}

/// Engine-wide boost switches. All reads are decision-time hot paths, so
/// everything is a plain atomic.
pub struct BoostState {
    global: AtomicU32,
    boot: AtomicU8,
    /// Raw task id, zero when unset.
    task: AtomicU64,
}

impl BoostState {
    pub const fn new() -> Self {
        Self {
            global: AtomicU32::new(0),
            boot: AtomicU8::new(BootBoost::None as u8),
            task: AtomicU64::new(0),
        }
    }

    /// Raise or clear the global boost level.
    pub fn set_global(&self, level: u32) {
        self.global.store(level, Ordering::Release);
    }

    #[inline]
    pub fn global(&self) -> u32 {
        self.global.load(Ordering::Acquire)
    }

    #[inline]
    pub fn global_active(&self) -> bool {
        self.global() > 0
    }

    pub fn set_boot(&self, phase: BootBoost) {
        self.boot.store(phase as u8, Ordering::Release);
    }

    #[inline]
    pub fn boot(&self) -> BootBoost {
        BootBoost::from_raw(self.boot.load(Ordering::Acquire))
    }

    /// Single out one task for semi-performance placement, or clear.
    pub fn set_task(&self, task: Option<TaskId>) {
        let raw = task.map_or(0, |t| t.raw());
        self.task.store(raw, Ordering::Release);
    }

    #[inline]
    pub fn task(&self) -> Option<TaskId> {
        match self.task.load(Ordering::Acquire) {
            0 => None,
            raw => Some(TaskId::new(raw)),
        }
    }

    #[inline]
    pub fn is_task_boosted(&self, task: TaskId) -> bool {
        self.task.load(Ordering::Acquire) == task.raw()
    }
}

impl Default for BoostState {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for BoostState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoostState")
            .field("global", &self.global())
            .field("boot", &self.boot())
            .field("task", &self.task())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_levels() {
        let boost = BoostState::new();
        assert!(!boost.global_active());
        boost.set_global(2);
        assert!(boost.global_active());
        assert_eq!(boost.global(), 2);
        boost.set_global(0);
        assert!(!boost.global_active());
    }

    #[test]
    fn test_boot_phases() {
        let boost = BoostState::new();
        assert_eq!(boost.boot(), BootBoost::None);
        boost.set_boot(BootBoost::Init);
        assert_eq!(boost.boot(), BootBoost::Init);
        boost.set_boot(BootBoost::Boot);
        assert_eq!(boost.boot(), BootBoost::Boot);
        boost.set_boot(BootBoost::None);
        assert_eq!(boost.boot(), BootBoost::None);
    }

    #[test]
    fn test_task_boost() {
        let boost = BoostState::new();
        let t = TaskId::new(7);
        assert!(boost.task().is_none());
        boost.set_task(Some(t));
        assert!(boost.is_task_boosted(t));
        assert!(!boost.is_task_boosted(TaskId::new(8)));
        boost.set_task(None);
        assert!(boost.task().is_none());
    }
}
