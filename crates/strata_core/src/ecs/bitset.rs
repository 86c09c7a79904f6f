// bitset.rs - Fixed-width id set
//
// Component and message ids share one compact id space per registry,
// capped so that set operations stay O(1) word arithmetic. The fixed
// width also gives the snapshot format a stable byte encoding.

use serde::{Deserialize, Serialize};

/// Number of ids a single registry can hand out.
pub const MAX_IDS: usize = 256;

const WORDS: usize = MAX_IDS / 64;

/// Fixed-width bitset over a registry's id space.
///
/// Containment, equality and superset tests are all constant time,
/// which is what archetype lookup and scheduler dependency checks
/// lean on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdSet {
    words: [u64; WORDS],
}

impl IdSet {
    /// Create an empty set.
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Build a set from a list of ids.
    pub fn from_ids(ids: &[u32]) -> Self {
        let mut set = Self::new();
        for &id in ids {
            set.insert(id);
        }
        set
    }

    #[inline]
    pub fn insert(&mut self, id: u32) {
        debug_assert!((id as usize) < MAX_IDS);
        self.words[(id / 64) as usize] |= 1 << (id % 64);
    }

    #[inline]
    pub fn remove(&mut self, id: u32) {
        debug_assert!((id as usize) < MAX_IDS);
        self.words[(id / 64) as usize] &= !(1 << (id % 64));
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        (id as usize) < MAX_IDS && self.words[(id / 64) as usize] & (1 << (id % 64)) != 0
    }

    /// True when every bit of `other` is also set in `self`.
    #[inline]
    pub fn is_superset(&self, other: &IdSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == *b)
    }

    /// True when the two sets share at least one id.
    #[inline]
    pub fn intersects(&self, other: &IdSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of set ids.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate set ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros();
                w &= w - 1;
                Some(wi as u32 * 64 + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_contains_remove() {
        let mut set = IdSet::new();
        assert!(!set.contains(3));
        set.insert(3);
        set.insert(200);
        assert!(set.contains(3));
        assert!(set.contains(200));
        assert_eq!(set.len(), 2);
        set.remove(3);
        assert!(!set.contains(3));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn superset_and_intersection() {
        let big = IdSet::from_ids(&[1, 2, 3, 70]);
        let small = IdSet::from_ids(&[2, 70]);
        let other = IdSet::from_ids(&[4]);
        assert!(big.is_superset(&small));
        assert!(!small.is_superset(&big));
        assert!(big.intersects(&small));
        assert!(!big.intersects(&other));
        // Every set is a superset of the empty set.
        assert!(other.is_superset(&IdSet::new()));
    }

    #[test]
    fn iter_is_ascending() {
        let set = IdSet::from_ids(&[130, 0, 63, 64, 5]);
        let ids: Vec<u32> = set.iter().collect();
        assert_eq!(ids, vec![0, 5, 63, 64, 130]);
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a = IdSet::from_ids(&[9, 1, 77]);
        let b = IdSet::from_ids(&[77, 9, 1]);
        assert_eq!(a, b);
    }
}
