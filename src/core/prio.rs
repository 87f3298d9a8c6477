//! Priority bitmap management for O(1) highest-ready lookup
//!
//! The ready set is keyed by an internal index where 0 is the most
//! urgent slot. Application priorities (`-30..=+30`, higher = more
//! urgent) are folded into the middle of the index space, leaving the
//! top slot for the timer-service thread and the bottom slot for idle.

use crate::config::CFG_PRIO_LEVELS;
use crate::error::{OsError, OsResult};
use crate::types::{OsPrio, OsThreadPrio, THREAD_PRIO_MAX, THREAD_PRIO_MIN};

/// Number of words needed for the priority bitmap
const PRIO_TBL_SIZE: usize = (CFG_PRIO_LEVELS + 31) / 32;

/// Map an application priority onto the internal index space.
///
/// `+30` maps to index 1 (just below the timer-service thread) and
/// `-30` to index 61 (just above idle).
#[inline]
pub fn prio_to_idx(prio: OsThreadPrio) -> OsResult<OsPrio> {
    if !(THREAD_PRIO_MIN..=THREAD_PRIO_MAX).contains(&prio) {
        return Err(OsError::InvalidArgument);
    }
    Ok((THREAD_PRIO_MAX - prio) as OsPrio + 1)
}

/// Inverse of [`prio_to_idx`] for application-range indices.
#[inline]
pub fn idx_to_prio(idx: OsPrio) -> OsThreadPrio {
    THREAD_PRIO_MAX - (idx as OsThreadPrio - 1)
}

/// Priority bitmap table
///
/// Each bit represents an internal priority slot. A set bit means there
/// is at least one ready thread at that slot. Bit 0 of word 0 is the
/// most urgent slot, with urgency decreasing toward lower significance
/// and higher word indices.
pub struct PrioTable {
    bitmap: [u32; PRIO_TBL_SIZE],
}

impl PrioTable {
    pub const fn new() -> Self {
        PrioTable {
            bitmap: [0; PRIO_TBL_SIZE],
        }
    }

    pub fn init(&mut self) {
        for word in self.bitmap.iter_mut() {
            *word = 0;
        }
    }

    /// Insert a priority slot into the bitmap
    #[inline]
    pub fn insert(&mut self, prio: OsPrio) {
        debug_assert!((prio as usize) < CFG_PRIO_LEVELS);

        let word_idx = (prio / 32) as usize;
        let bit_pos = 31 - (prio % 32);

        self.bitmap[word_idx] |= 1 << bit_pos;
    }

    /// Remove a priority slot from the bitmap
    #[inline]
    pub fn remove(&mut self, prio: OsPrio) {
        debug_assert!((prio as usize) < CFG_PRIO_LEVELS);

        let word_idx = (prio / 32) as usize;
        let bit_pos = 31 - (prio % 32);

        self.bitmap[word_idx] &= !(1 << bit_pos);
    }

    /// Get the most urgent occupied slot
    #[inline]
    pub fn get_highest(&self) -> OsPrio {
        let mut prio: OsPrio = 0;
        for &word in self.bitmap.iter() {
            if word != 0 {
                prio += Self::clz(word);
                return prio;
            }
            prio += 32;
        }

        // empty table: report the idle slot
        (CFG_PRIO_LEVELS - 1) as OsPrio
    }

    /// Check if a specific slot has any ready threads
    #[inline]
    pub fn is_set(&self, prio: OsPrio) -> bool {
        let word_idx = (prio / 32) as usize;
        let bit_pos = 31 - (prio % 32);

        (self.bitmap[word_idx] & (1 << bit_pos)) != 0
    }

    /// Check if the priority table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|&w| w == 0)
    }

    /// Count leading zeros
    #[inline]
    fn clz(value: u32) -> OsPrio {
        if value == 0 {
            32
        } else {
            value.leading_zeros() as OsPrio
        }
    }
}

impl Default for PrioTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table() {
        let table = PrioTable::new();
        assert!(table.is_empty());
        assert_eq!(table.get_highest(), (CFG_PRIO_LEVELS - 1) as OsPrio);
    }

    #[test]
    fn test_insert_remove() {
        let mut table = PrioTable::new();

        table.insert(5);
        assert!(table.is_set(5));
        assert!(!table.is_set(4));
        assert_eq!(table.get_highest(), 5);

        table.insert(3);
        assert_eq!(table.get_highest(), 3);

        table.remove(3);
        assert_eq!(table.get_highest(), 5);

        table.remove(5);
        assert!(table.is_empty());
    }

    #[test]
    fn test_word_boundaries() {
        let mut table = PrioTable::new();

        table.insert(31);
        assert_eq!(table.get_highest(), 31);

        table.insert(32);
        assert_eq!(table.get_highest(), 31);

        table.remove(31);
        assert_eq!(table.get_highest(), 32);
    }

    #[test]
    fn test_prio_idx_mapping() {
        assert_eq!(prio_to_idx(THREAD_PRIO_MAX).unwrap(), 1);
        assert_eq!(prio_to_idx(0).unwrap(), 31);
        assert_eq!(prio_to_idx(THREAD_PRIO_MIN).unwrap(), 61);

        assert!(prio_to_idx(31).is_err());
        assert!(prio_to_idx(-31).is_err());

        for p in THREAD_PRIO_MIN..=THREAD_PRIO_MAX {
            assert_eq!(idx_to_prio(prio_to_idx(p).unwrap()), p);
        }

        // more urgent priorities land on lower indices
        assert!(prio_to_idx(10).unwrap() < prio_to_idx(-10).unwrap());
    }
}
