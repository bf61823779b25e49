//! Sorted word → count accumulation.
//!
//! [`FrequencyTable`] is written by exactly one consumer task and consumed
//! into an immutable [`Histogram`] once that task is done. Taking `self` by
//! value in [`FrequencyTable::snapshot_sorted`] is what rules out reading the
//! table while it is still being written.

use crate::Word;
use std::collections::{BTreeMap, btree_map};

/// Ordered map from word to the number of times it was recorded.
#[derive(Debug, Default, Clone)]
pub struct FrequencyTable {
    counts: BTreeMap<Word, u32>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count for `word`, inserting it with a count of 1 if it
    /// has not been seen before.
    ///
    /// Counts saturate at `u32::MAX`, the largest value the wire can carry.
    /// Empty words are ignored.
    pub fn record_occurrence(&mut self, word: Word) {
        if word.is_empty() {
            return;
        }
        match self.counts.entry(word) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(1);
            }
            btree_map::Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                *count = count.saturating_add(1);
            }
        }
    }

    /// Returns the count recorded for `word`, if any.
    pub fn get(&self, word: &[u8]) -> Option<u32> {
        self.counts.get(word).copied()
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| u64::from(c)).sum()
    }

    /// Freezes the table into its ascending `(word, count)` sequence.
    pub fn snapshot_sorted(self) -> Histogram {
        Histogram {
            entries: self.counts.into_iter().collect(),
        }
    }
}

/// Immutable, strictly ascending `(word, count)` snapshot of a finished job.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Histogram {
    entries: Vec<(Word, u32)>,
}

impl Histogram {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, c)| u64::from(*c)).sum()
    }

    /// Looks up `word` by binary search.
    pub fn get(&self, word: &[u8]) -> Option<u32> {
        self.entries
            .binary_search_by(|(w, _)| w[..].cmp(word))
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&Word, u32)> {
        self.entries.iter().map(|(w, c)| (w, *c))
    }

    pub fn into_entries(self) -> Vec<(Word, u32)> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a Histogram {
    type Item = &'a (Word, u32);
    type IntoIter = core::slice::Iter<'a, (Word, u32)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
