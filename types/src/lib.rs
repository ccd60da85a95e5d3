//! Strata core types
//!
//! Shared, dependency-free definitions for the Strata placement engine:
//! typed identifiers and the fixed capacity scale every utilization and
//! capacity figure in the system is expressed against.

#![no_std]

#[cfg(test)]
extern crate alloc;

pub mod identifiers;

pub use identifiers::{ClassId, CoreId, IntentId, TaskId};

use core::sync::atomic::{AtomicU64, Ordering};

/// Capacity scale shift: capacities and utilizations are `0..=1 << 10`.
pub const CAPACITY_SHIFT: u32 = 10;

/// Full scale of a core's capacity. The fastest core in the system has
/// max capacity equal to this value; every other figure is relative.
pub const CAPACITY_SCALE: u64 = 1 << CAPACITY_SHIFT;

/// Upper bound on addressable cores. Core sets are carried in a single
/// machine word, so the engine never tracks more cores than this.
pub const MAX_CORES: usize = 64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a process-wide unique id. Never returns 0 (the null id).
#[inline]
pub fn generate_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Scale `value` by `scale / CAPACITY_SCALE`.
#[inline(always)]
pub const fn cap_scale(value: u64, scale: u64) -> u64 {
    (value * scale) >> CAPACITY_SHIFT
}

// ============================================================================
// TESTS
// ============================================================================
