// The layout of this map (range start as the key, range end stored next to the value) follows
// the rangemap crate, licensed under either of
// - Apache License, Version 2.0 (https://github.com/jeffparsons/rangemap/blob/master/LICENSE-APACHE
//   or http://www.apache.org/licenses/LICENSE-2.0)
// - MIT (https://github.com/jeffparsons/rangemap/blob/master/LICENSE-MIT or http://opensource.org/licenses/MIT)
// at your option.
//
// Unlike rangemap, values are never coalesced on insertion: the access states stored here are
// split and mutated in place, and merging is explicit through `RangeMap::coalesce`.

use std::{
    collections::BTreeMap,
    fmt::{Debug, Error as FmtError, Formatter},
    mem,
    ops::Range,
};

/// A map whose keys are stored as disjoint (half-open) ranges `start..end`.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct RangeMap<K, V> {
    // Stores the range start in the key and the range end in the corresponding value.
    btm: BTreeMap<K, Entry<K, V>>,
}

#[derive(Clone, PartialEq, Eq)]
struct Entry<K, V> {
    end: K,
    value: V,
}

impl<K, V> Default for RangeMap<K, V> {
    #[inline]
    fn default() -> Self {
        RangeMap {
            btm: BTreeMap::new(),
        }
    }
}

impl<K, V> RangeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Makes a map holding `value` over the single range `range`.
    pub fn with_range(range: Range<K>, value: V) -> Self {
        let mut map = RangeMap::default();

        if range.start < range.end {
            map.btm.insert(
                range.start,
                Entry {
                    end: range.end,
                    value,
                },
            );
        }

        map
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.btm.is_empty()
    }

    /// Returns the number of disjoint ranges in the map.
    #[inline]
    pub fn len(&self) -> usize {
        self.btm.len()
    }

    /// Returns the value of the range containing `key`, if any.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.btm
            .range(..=key.clone())
            .next_back()
            .filter(|(_, entry)| entry.end > *key)
            .map(|(_, entry)| &entry.value)
    }

    /// Inserts `value` over `range`, which must not overlap any range already in the map.
    pub fn insert_vacant(&mut self, range: Range<K>, value: V) {
        debug_assert!(self.range(&range).next().is_none());

        if range.start < range.end {
            self.btm.insert(
                range.start,
                Entry {
                    end: range.end,
                    value,
                },
            );
        }
    }

    /// Makes sure that no range in the map straddles `key`, by splitting the range that
    /// contains it in two with the same value.
    pub fn split_at(&mut self, key: &K) {
        let tail = match self.btm.range_mut(..key.clone()).next_back() {
            Some((_, entry)) if entry.end > *key => {
                let end = mem::replace(&mut entry.end, key.clone());

                Entry {
                    end,
                    value: entry.value.clone(),
                }
            }
            _ => return,
        };

        self.btm.insert(key.clone(), tail);
    }

    /// Returns an iterator over the ranges that intersect `range`, in ascending order. The
    /// yielded ranges are not clipped to `range`.
    pub fn range<'a>(&'a self, range: &Range<K>) -> impl Iterator<Item = (Range<K>, &'a V)> + 'a {
        let start = self.lower_bound(range);
        let end = range.end.clone();

        self.btm
            .range(start..end)
            .map(|(start, entry)| (start.clone()..entry.end.clone(), &entry.value))
    }

    /// Mutable version of [`range`](Self::range).
    ///
    /// Callers split the map at `range.start` and `range.end` first when they must not touch
    /// anything outside of `range`.
    pub fn range_mut<'a>(
        &'a mut self,
        range: &Range<K>,
    ) -> impl Iterator<Item = (Range<K>, &'a mut V)> + 'a {
        let start = self.lower_bound(range);
        let end = range.end.clone();

        self.btm
            .range_mut(start..end)
            .map(|(start, entry)| (start.clone()..entry.end.clone(), &mut entry.value))
    }

    /// Returns an iterator over all ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (Range<K>, &V)> + '_ {
        self.btm
            .iter()
            .map(|(start, entry)| (start.clone()..entry.end.clone(), &entry.value))
    }

    /// Returns a mutable iterator over all values.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.btm.values_mut().map(|entry| &mut entry.value)
    }

    /// Returns the smallest range that covers every range in the map.
    pub fn span(&self) -> Option<Range<K>> {
        let (start, _) = self.btm.first_key_value()?;
        let (_, last) = self.btm.last_key_value()?;

        Some(start.clone()..last.end.clone())
    }

    // The start key of the first entry that can intersect `range`.
    fn lower_bound(&self, range: &Range<K>) -> K {
        if range.start >= range.end {
            return range.end.clone();
        }

        self.btm
            .range(..=range.start.clone())
            .next_back()
            .filter(|(_, entry)| entry.end > range.start)
            .map_or_else(|| range.start.clone(), |(start, _)| start.clone())
    }
}

impl<K, V> RangeMap<K, V>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    /// Merges adjacent ranges that hold equal values.
    pub fn coalesce(&mut self) {
        let mut merged: BTreeMap<K, Entry<K, V>> = BTreeMap::new();
        let mut last: Option<(K, Entry<K, V>)> = None;

        for (start, entry) in mem::take(&mut self.btm) {
            if let Some((_, prev)) = &mut last {
                if prev.end == start && prev.value == entry.value {
                    prev.end = entry.end;
                    continue;
                }
            }

            if let Some((prev_start, prev)) = last.replace((start, entry)) {
                merged.insert(prev_start, prev);
            }
        }

        if let Some((start, entry)) = last {
            merged.insert(start, entry);
        }

        self.btm = merged;
    }
}

impl<K, V> Debug for RangeMap<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_map()
            .entries(
                self.btm
                    .iter()
                    .map(|(start, entry)| (start..&entry.end, &entry.value)),
            )
            .finish()
    }
}
