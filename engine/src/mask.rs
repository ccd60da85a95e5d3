//! # CoreMask
//!
//! Every placement decision is mask algebra: candidate sets are narrowed by
//! intersecting away overloaded, busy, and reserved cores. A single u64 word
//! holds the whole set, so unions, intersections, and population counts are
//! one instruction each.

use strata_types::{CoreId, MAX_CORES};

use static_assertions::const_assert;

// A single word must cover every representable core.
const_assert!(MAX_CORES <= 64);

/// Fixed-size set of core indices stored in one u64 word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CoreMask {
    bits: u64,
}

impl CoreMask {
    /// The empty set.
    pub const EMPTY: CoreMask = CoreMask { bits: 0 };

    /// Create an empty mask.
    #[inline(always)]
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Create a mask from a raw bit pattern.
    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// Create a mask holding a single core.
    #[inline(always)]
    pub const fn single(core: CoreId) -> Self {
        Self {
            bits: 1u64 << core.index(),
        }
    }

    /// Create a mask covering cores `0..count`.
    #[inline(always)]
    pub const fn first_n(count: usize) -> Self {
        if count >= 64 {
            Self { bits: u64::MAX }
        } else {
            Self {
                bits: (1u64 << count) - 1,
            }
        }
    }

    /// Raw bit pattern.
    #[inline(always)]
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// Add a core to the set.
    #[inline(always)]
    pub fn set(&mut self, core: CoreId) {
        self.bits |= 1u64 << core.index();
    }

    /// Remove a core from the set.
    #[inline(always)]
    pub fn clear(&mut self, core: CoreId) {
        self.bits &= !(1u64 << core.index());
    }

    /// Test whether a core is in the set.
    #[inline(always)]
    pub const fn contains(&self, core: CoreId) -> bool {
        (self.bits & (1u64 << core.index())) != 0
    }

    /// Number of cores in the set.
    #[inline(always)]
    pub const fn weight(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// True if the set is empty.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// True if at least one core is in the set.
    #[inline(always)]
    pub const fn any(&self) -> bool {
        self.bits != 0
    }

    /// Lowest-numbered core in the set, or `None`.
    #[inline]
    pub fn first(&self) -> Option<CoreId> {
        if self.bits == 0 {
            return None;
        }
        Some(CoreId::from_index(self.bits.trailing_zeros() as usize))
    }

    /// True if both sets share at least one core.
    #[inline(always)]
    pub const fn intersects(&self, other: &CoreMask) -> bool {
        (self.bits & other.bits) != 0
    }

    /// True if every core of `self` is also in `other`.
    #[inline(always)]
    pub const fn subset_of(&self, other: &CoreMask) -> bool {
        (self.bits & !other.bits) == 0
    }

    /// Set difference: cores in `self` but not in `other`.
    #[inline(always)]
    pub const fn and_not(&self, other: &CoreMask) -> CoreMask {
        CoreMask {
            bits: self.bits & !other.bits,
        }
    }

    /// Iterate over cores in the set, lowest index first.
    #[inline]
    pub fn iter(&self) -> CoreMaskIter {
        CoreMaskIter {
            remaining: self.bits,
        }
    }
}

impl Default for CoreMask {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::BitAnd for CoreMask {
    type Output = CoreMask;

    #[inline(always)]
    fn bitand(self, rhs: CoreMask) -> CoreMask {
        CoreMask {
            bits: self.bits & rhs.bits,
        }
    }
}

impl core::ops::BitOr for CoreMask {
    type Output = CoreMask;

    #[inline(always)]
    fn bitor(self, rhs: CoreMask) -> CoreMask {
        CoreMask {
            bits: self.bits | rhs.bits,
        }
    }
}

impl core::ops::BitXor for CoreMask {
    type Output = CoreMask;

    #[inline(always)]
    fn bitxor(self, rhs: CoreMask) -> CoreMask {
        CoreMask {
            bits: self.bits ^ rhs.bits,
        }
    }
}

impl core::ops::Not for CoreMask {
    type Output = CoreMask;

    #[inline(always)]
    fn not(self) -> CoreMask {
        CoreMask { bits: !self.bits }
    }
}

impl core::ops::BitAndAssign for CoreMask {
    #[inline(always)]
    fn bitand_assign(&mut self, rhs: CoreMask) {
        self.bits &= rhs.bits;
    }
}

impl core::ops::BitOrAssign for CoreMask {
    #[inline(always)]
    fn bitor_assign(&mut self, rhs: CoreMask) {
        self.bits |= rhs.bits;
    }
}

impl FromIterator<CoreId> for CoreMask {
    fn from_iter<I: IntoIterator<Item = CoreId>>(iter: I) -> Self {
        let mut mask = CoreMask::new();
        for core in iter {
            mask.set(core);
        }
        mask
    }
}

impl core::fmt::Debug for CoreMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CoreMask({:#x})", self.bits)
    }
}

impl IntoIterator for CoreMask {
    type Item = CoreId;
    type IntoIter = CoreMaskIter;

    #[inline]
    fn into_iter(self) -> CoreMaskIter {
        self.iter()
    }
}

/// Iterator over core indices in a mask.
pub struct CoreMaskIter {
    remaining: u64,
}

impl Iterator for CoreMaskIter {
    type Item = CoreId;

    #[inline]
    fn next(&mut self) -> Option<CoreId> {
        if self.remaining == 0 {
            return None;
        }
        let bit = self.remaining.trailing_zeros() as usize;
        self.remaining &= self.remaining - 1;
        Some(CoreId::from_index(bit))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        let mut mask = CoreMask::new();
        assert!(mask.is_empty());
        mask.set(CoreId::from_index(0));
        mask.set(CoreId::from_index(7));
        assert!(mask.contains(CoreId::from_index(0)));
        assert!(mask.contains(CoreId::from_index(7)));
        assert!(!mask.contains(CoreId::from_index(1)));
        assert_eq!(mask.weight(), 2);
    }

    #[test]
    fn test_algebra() {
        let a = CoreMask::from_bits(0b0011);
        let b = CoreMask::from_bits(0b0110);
        assert_eq!((a & b).bits(), 0b0010);
        assert_eq!((a | b).bits(), 0b0111);
        assert_eq!(a.and_not(&b).bits(), 0b0001);
        assert!(a.intersects(&b));
        assert!(CoreMask::from_bits(0b0010).subset_of(&b));
        assert!(!a.subset_of(&b));
    }

    #[test]
    fn test_first_and_iter() {
        let mask = CoreMask::from_bits(0b1010_0100);
        assert_eq!(mask.first(), Some(CoreId::from_index(2)));
        let cores: alloc::vec::Vec<usize> = mask.iter().map(|c| c.index()).collect();
        assert_eq!(cores, alloc::vec![2, 5, 7]);
    }

    #[test]
    fn test_first_n() {
        assert_eq!(CoreMask::first_n(0).bits(), 0);
        assert_eq!(CoreMask::first_n(4).bits(), 0b1111);
        assert_eq!(CoreMask::first_n(64).bits(), u64::MAX);
    }

    #[test]
    fn test_from_iter() {
        let mask: CoreMask = [1usize, 3, 5].into_iter().map(CoreId::from_index).collect();
        assert_eq!(mask.bits(), 0b10_1010);
    }
}
