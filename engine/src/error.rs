//! # Engine Error Types
//!
//! Error handling for every fallible engine operation.

extern crate alloc;

use alloc::string::String;
use core::fmt;

use strata_types::{ClassId, CoreId, IntentId, TaskId};

// ============================================================================
// RESULT TYPE
// ============================================================================

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================================
// MAIN ERROR ENUM
// ============================================================================

/// Main error type for the placement engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Core index outside the registered topology
    InvalidCore(CoreId),

    /// Task was never attached or has already exited
    UnknownTask(TaskId),

    /// Class slot was never registered
    UnknownClass(ClassId),

    /// A bounded registry has no free slots left
    RegistryFull {
        registry: &'static str,
        capacity: usize,
    },

    /// Configuration value rejected by validation
    InvalidConfig { field: &'static str, reason: String },

    /// Pressure state transition not permitted from the current state
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// No energy table registered for the queried core
    ModelUnavailable,

    /// Per-core migration queue is at capacity
    QueueFull { core: CoreId },

    /// Migration intent no longer passes revalidation
    StaleIntent(IntentId),

    /// Candidate set drained to empty with no fallback
    NoCandidate,
}

impl EngineError {
    /// Shorthand for a validation failure on a named tunable.
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Shorthand for a full bounded registry.
    pub fn registry_full(registry: &'static str, capacity: usize) -> Self {
        Self::RegistryFull { registry, capacity }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCore(core) => write!(f, "Core {} is not in the topology", core),
            Self::UnknownTask(task) => write!(f, "Task {} is not tracked", task),
            Self::UnknownClass(class) => write!(f, "Class {} is not registered", class),
            Self::RegistryFull { registry, capacity } => {
                write!(f, "Registry '{}' is full ({} slots)", registry, capacity)
            },
            Self::InvalidConfig { field, reason } => {
                write!(f, "Invalid config for '{}': {}", field, reason)
            },
            Self::InvalidTransition { from, to } => {
                write!(f, "Pressure transition {} -> {} not permitted", from, to)
            },
            Self::ModelUnavailable => write!(f, "No energy table for the queried core"),
            Self::QueueFull { core } => {
                write!(f, "Migration queue for {} is at capacity", core)
            },
            Self::StaleIntent(intent) => {
                write!(f, "Migration intent {} failed revalidation", intent)
            },
            Self::NoCandidate => write!(f, "No placement candidate remained"),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
