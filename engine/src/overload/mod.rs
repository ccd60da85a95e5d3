//! System-overload detection and the emergency responses hanging off it.
//!
//! A monitor grades the whole system from periodic profiling figures and
//! walks a four-state ladder. Raising is immediate, within the allowed
//! transitions; falling back is held off until the calmer picture has
//! persisted for a while. Committed transitions feed the observer channel
//! so dependent machinery can re-tune itself, and the Critical state arms
//! the rotation sweep that forcibly spreads load.

mod monitor;
mod somac;

pub use monitor::{OverloadMonitor, OverloadSignals, OverloadStatus, OverloadTransition};
pub use somac::{SomacMove, SomacRotor};

/// How hard the system is working, from calm to drowning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum OverloadState {
    Normal = 0,
    /// At least one busy core, heavy work dominating or misfits present.
    Elevated = 1,
    /// Heavy-task utilization near the whole system's capacity.
    Saturated = 2,
    /// Saturated with misfit tasks on more than half the cores.
    Critical = 3,
}

impl OverloadState {
    pub const COUNT: usize = 4;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// States this one may move to directly. The only barred pair is the
    /// jump straight from Normal to Critical, which must pass through
    /// Saturated.
    pub fn allows(self, next: OverloadState) -> bool {
        if self == next {
            return false;
        }
        !(self == OverloadState::Normal && next == OverloadState::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OverloadState::Normal => "normal",
            OverloadState::Elevated => "elevated",
            OverloadState::Saturated => "saturated",
            OverloadState::Critical => "critical",
        }
    }
}

impl core::fmt::Display for OverloadState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
