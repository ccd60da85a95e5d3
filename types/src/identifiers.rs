//! Typed Identifiers for Strata
//!
//! Type-safe identifiers for every entity the placement engine reasons
//! about. Each domain has its own ID type to prevent accidental mixing:
//! a task id can never be used where a core index is expected.

#![allow(dead_code)]

/// Macro to create type-safe IDs
#[macro_export]
macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Create a new ID with specific value
            #[inline]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Generate a new unique ID
            #[inline]
            pub fn generate() -> Self {
                Self($crate::generate_id())
            }

            /// Get the raw value
            #[inline]
            pub const fn raw(&self) -> u64 {
                self.0
            }

            /// Null/invalid ID
            pub const NULL: Self = Self(0);

            /// Check if null
            #[inline]
            pub const fn is_null(&self) -> bool {
                self.0 == 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::generate()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

/// Macro to create small arena-index IDs
///
/// Unlike [`define_id!`] these are dense indices into fixed arrays, not
/// generated handles, so they carry `index()` instead of `generate()`.
#[macro_export]
macro_rules! define_index {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(pub u16);

        impl $name {
            /// Create an index id with a specific slot value
            #[inline]
            pub const fn new(idx: u16) -> Self {
                Self(idx)
            }

            /// Create from a usize slot (truncating)
            #[inline]
            pub const fn from_index(idx: usize) -> Self {
                Self(idx as u16)
            }

            /// Arena slot this id addresses
            #[inline]
            pub const fn index(&self) -> usize {
                self.0 as usize
            }

            /// Get the raw value
            #[inline]
            pub const fn raw(&self) -> u16 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

// ============================================================================
// ENTITY IDS
// ============================================================================

define_id!(TaskId, "Runnable unit of work tracked by the engine");
define_id!(IntentId, "One cross-core migration attempt");

// ============================================================================
// ARENA INDICES
// ============================================================================

define_index!(CoreId, "Physical core, dense index into per-core arenas");
define_index!(ClassId, "Task class slot in the bounded class registry");

// ============================================================================
// TESTS
// ============================================================================
