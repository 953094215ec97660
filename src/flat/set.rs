//! # FlatSet - Sorted Unique Record Array
//!
//! A [`FlatList`] kept in comparator order with duplicates rejected.
//! Insertion is a binary search plus one slot shift; range queries take
//! a three-way predicate (`Less` when the probed record sorts before the
//! target) and return inclusive index spans.

use eyre::Result;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::flat::list::FlatList;
use crate::records::{Record, RecordView, Schema};

#[derive(Debug)]
pub struct FlatSet {
    list: FlatList,
}

fn byte_order(a: &RecordView<'_>, b: &RecordView<'_>) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

impl FlatSet {
    pub fn new(schema: &Arc<Schema>) -> Result<FlatSet> {
        Ok(FlatSet {
            list: FlatList::new(schema)?,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.list.schema()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<RecordView<'_>> {
        self.list.get(idx)
    }

    pub fn at(&self, idx: isize) -> Option<RecordView<'_>> {
        self.list.at(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordView<'_>> {
        self.list.iter()
    }

    pub fn as_list(&self) -> &FlatList {
        &self.list
    }

    /// Inserts in byte-lexicographic order; returns false when an equal
    /// record is already present.
    pub fn add(&mut self, record: &Record) -> Result<bool> {
        self.add_by(record, byte_order)
    }

    /// Inserts in comparator order; compare == 0 rejects the insert.
    pub fn add_by<F>(&mut self, record: &Record, mut cmp: F) -> Result<bool>
    where
        F: FnMut(&RecordView<'_>, &RecordView<'_>) -> Ordering,
    {
        let candidate = record.view();
        let mut lo = 0usize;
        let mut hi = self.list.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let probe = self.list.get(mid).expect("mid < len");
            match cmp(&probe, &candidate) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(false),
            }
        }
        self.list.insert(lo, record)?;
        Ok(true)
    }

    pub fn remove(&mut self, idx: usize) -> Result<Record> {
        self.list.remove(idx)
    }

    /// First index whose record matches a three-way predicate, or None.
    pub fn find_index<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&RecordView<'_>) -> Ordering,
    {
        self.lower(&pred, None)
    }

    pub fn find<F>(&self, pred: F) -> Option<RecordView<'_>>
    where
        F: Fn(&RecordView<'_>) -> Ordering,
    {
        self.find_index(&pred).and_then(|i| self.list.get(i))
    }

    /// Lowest index matching `pred`. A `hint` known to match narrows the
    /// search to `[0, hint]`.
    pub fn lower<F>(&self, pred: F, hint: Option<usize>) -> Option<usize>
    where
        F: Fn(&RecordView<'_>) -> Ordering,
    {
        let mut lo = 0usize;
        let mut hi = self.list.len();
        if let Some(h) = hint {
            if let Some(view) = self.list.get(h) {
                if pred(&view) == Ordering::Equal {
                    hi = h + 1;
                }
            }
        }
        // Partition point: first index where pred is not Less.
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(&self.list.get(mid)?) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        match self.list.get(lo) {
            Some(view) if pred(&view) == Ordering::Equal => Some(lo),
            _ => None,
        }
    }

    /// Highest index matching `pred`. A `hint` known to match narrows
    /// the search to `[hint, len)`.
    pub fn upper<F>(&self, pred: F, hint: Option<usize>) -> Option<usize>
    where
        F: Fn(&RecordView<'_>) -> Ordering,
    {
        let mut lo = 0usize;
        let mut hi = self.list.len();
        if let Some(h) = hint {
            if let Some(view) = self.list.get(h) {
                if pred(&view) == Ordering::Equal {
                    lo = h;
                }
            }
        }
        // Partition point: first index where pred is Greater.
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(&self.list.get(mid)?) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        match lo.checked_sub(1).and_then(|i| self.list.get(i)) {
            Some(view) if pred(&view) == Ordering::Equal => Some(lo - 1),
            _ => None,
        }
    }

    /// Inclusive `[lower, upper]` span of indices matching `pred`.
    pub fn range<F>(&self, pred: F) -> Option<(usize, usize)>
    where
        F: Fn(&RecordView<'_>) -> Ordering,
    {
        let lower = self.lower(&pred, None)?;
        let upper = self.upper(&pred, Some(lower))?;
        Some((lower, upper))
    }
}
