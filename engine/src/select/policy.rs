//! Selection policies.
//!
//! A closed set: every dispatch over it is exhaustive, and the promotion
//! ladder relies on the declared order to only ever move a task upward.

/// How the selector weighs candidates for one placement decision.
///
/// The variants are ordered by how aggressively they trade energy for
/// performance. Promotion never lowers a policy below its class baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum SchedPolicy {
    /// Lowest weighted per-core efficiency figure wins.
    #[default]
    Efficiency = 0,
    /// Lowest whole-system energy estimate wins.
    Energy = 1,
    /// Shallow-idle cores with capacity headroom win.
    SemiPerformance = 2,
    /// Greatest spare capacity wins.
    Performance = 3,
    /// Least-loaded member of the slowest viable group wins. The refuge
    /// when the model is unavailable or everything is overutilized.
    MinUtil = 4,
}

impl SchedPolicy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Efficiency => "eff",
            Self::Energy => "energy",
            Self::SemiPerformance => "semi-perf",
            Self::Performance => "perf",
            Self::MinUtil => "min-util",
        }
    }
}

impl core::fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
