//! # FlatList - Packed Record Array
//!
//! A resizable array of same-schema records stored as one contiguous
//! byte buffer of `len * stride` bytes. Elements are accessed through
//! borrowed record views, so reading a slot allocates nothing and the
//! borrow checker enforces the handle rule: a slot view cannot survive
//! any structural mutation (insert, remove, sort, resize), because those
//! take `&mut self`.
//!
//! ## Sorting
//!
//! `sort`/`sort_by` is an in-place heap-sort: O(n log n) comparisons,
//! O(1) auxiliary space, element swaps done with `swap_with_slice` on
//! disjoint stride-sized slices. Heap-sort is chosen over the std sort
//! because slots are raw bytes, not a `&mut [T]`.

use eyre::{ensure, Result};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::records::{Record, RecordMut, RecordView, Schema};

#[derive(Debug)]
pub struct FlatList {
    schema: Arc<Schema>,
    stride: usize,
    buf: Vec<u8>,
    len: usize,
}

impl FlatList {
    pub fn new(schema: &Arc<Schema>) -> Result<FlatList> {
        let stride = match schema.stride() {
            Some(s) if s > 0 => s,
            _ => eyre::bail!(
                "flat list requires a fixed-width record type ('{}' is not)",
                schema.name()
            ),
        };
        Ok(FlatList {
            schema: schema.clone(),
            stride,
            buf: Vec::new(),
            len: 0,
        })
    }

    pub fn with_capacity(schema: &Arc<Schema>, capacity: usize) -> Result<FlatList> {
        let mut list = FlatList::new(schema)?;
        list.buf.reserve(capacity * list.stride);
        Ok(list)
    }

    /// Adopts a packed buffer. The length must divide evenly into
    /// stride-sized slots.
    pub fn from_bytes(schema: &Arc<Schema>, buf: Vec<u8>) -> Result<FlatList> {
        let mut list = FlatList::new(schema)?;
        ensure!(
            buf.len() % list.stride == 0,
            "buffer length {} is not a multiple of element size {}",
            buf.len(),
            list.stride
        );
        list.len = buf.len() / list.stride;
        list.buf = buf;
        Ok(list)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity() / self.stride
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len * self.stride]
    }

    fn range(&self, idx: usize) -> std::ops::Range<usize> {
        idx * self.stride..(idx + 1) * self.stride
    }

    fn check_schema(&self, record: &Record) -> Result<()> {
        ensure!(
            Arc::ptr_eq(record.schema(), &self.schema),
            "record schema '{}' does not match list schema '{}'",
            record.schema().name(),
            self.schema.name()
        );
        Ok(())
    }

    /// Copies `record`'s bytes into slot `idx` (which must exist in the
    /// buffer). Adopted minimum-size buffers are zero-padded to stride.
    fn store(&mut self, idx: usize, record: &Record) {
        let range = self.range(idx);
        let src = record.as_bytes();
        let copy = src.len().min(self.stride);
        self.buf[range.start..range.start + copy].copy_from_slice(&src[..copy]);
        if copy < self.stride {
            self.buf[range.start + copy..range.end].fill(0);
        }
    }

    pub fn push(&mut self, record: &Record) -> Result<()> {
        self.check_schema(record)?;
        self.buf.resize((self.len + 1) * self.stride, 0);
        self.store(self.len, record);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Record> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        let bytes = self.buf.split_off(self.len * self.stride);
        Record::from_bytes(&self.schema, bytes).ok()
    }

    pub fn push_front(&mut self, record: &Record) -> Result<()> {
        self.insert(0, record)
    }

    pub fn pop_front(&mut self) -> Option<Record> {
        if self.len == 0 {
            return None;
        }
        self.remove(0).ok()
    }

    pub fn insert(&mut self, idx: usize, record: &Record) -> Result<()> {
        self.check_schema(record)?;
        ensure!(
            idx <= self.len,
            "insert index {} out of bounds for length {}",
            idx,
            self.len
        );
        self.buf.resize((self.len + 1) * self.stride, 0);
        let start = idx * self.stride;
        let old_end = self.len * self.stride;
        self.buf.copy_within(start..old_end, start + self.stride);
        self.store(idx, record);
        self.len += 1;
        Ok(())
    }

    pub fn remove(&mut self, idx: usize) -> Result<Record> {
        ensure!(
            idx < self.len,
            "remove index {} out of bounds for length {}",
            idx,
            self.len
        );
        let removed = RecordView::over(&self.schema, &self.buf[self.range(idx)]).to_record();
        let start = idx * self.stride;
        let end = self.len * self.stride;
        self.buf.copy_within(start + self.stride..end, start);
        self.len -= 1;
        self.buf.truncate(self.len * self.stride);
        Ok(removed)
    }

    pub fn swap(&mut self, i: usize, j: usize) -> Result<()> {
        ensure!(
            i < self.len && j < self.len,
            "swap indices {}, {} out of bounds for length {}",
            i,
            j,
            self.len
        );
        self.swap_slots(i, j);
        Ok(())
    }

    fn swap_slots(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let (left, right) = self.buf.split_at_mut(hi * self.stride);
        left[lo * self.stride..(lo + 1) * self.stride].swap_with_slice(&mut right[..self.stride]);
    }

    pub fn get(&self, idx: usize) -> Option<RecordView<'_>> {
        if idx >= self.len {
            return None;
        }
        Some(RecordView::over(&self.schema, &self.buf[self.range(idx)]))
    }

    /// Signed indexing: negative values count back from the end.
    pub fn at(&self, idx: isize) -> Option<RecordView<'_>> {
        let resolved = if idx < 0 {
            self.len.checked_sub(idx.unsigned_abs())?
        } else {
            idx as usize
        };
        self.get(resolved)
    }

    /// Borrowed write handle into slot `idx`. Valid until the next
    /// structural mutation; the borrow checker enforces that.
    pub fn slot_mut(&mut self, idx: usize) -> Result<RecordMut<'_>> {
        ensure!(
            idx < self.len,
            "slot index {} out of bounds for length {}",
            idx,
            self.len
        );
        let range = self.range(idx);
        Ok(RecordMut::over(&self.schema, &mut self.buf[range]))
    }

    /// Grows with zeroed slots or truncates.
    pub fn resize(&mut self, new_len: usize) {
        self.buf.resize(new_len * self.stride, 0);
        self.len = new_len;
    }

    /// Ensures capacity for `total` elements. With `force`, shrinks or
    /// grows the allocation to exactly that capacity.
    pub fn reserve(&mut self, total: usize, force: bool) {
        let bytes = total * self.stride;
        if force {
            let used = self.len * self.stride;
            self.buf.shrink_to(bytes.max(used));
            if bytes > self.buf.capacity() {
                self.buf.reserve_exact(bytes - self.buf.len());
            }
        } else if bytes > self.buf.capacity() {
            self.buf.reserve(bytes - self.buf.len());
        }
    }

    pub fn shrink_to_fit(&mut self) {
        self.buf.shrink_to_fit();
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordView<'_>> {
        (0..self.len).map(move |i| RecordView::over(&self.schema, &self.buf[self.range(i)]))
    }

    fn compare_slots<F>(&self, i: usize, j: usize, cmp: &mut F) -> Ordering
    where
        F: FnMut(&RecordView<'_>, &RecordView<'_>) -> Ordering,
    {
        let a = RecordView::over(&self.schema, &self.buf[self.range(i)]);
        let b = RecordView::over(&self.schema, &self.buf[self.range(j)]);
        cmp(&a, &b)
    }

    /// In-place heap-sort with the byte-lexicographic order.
    pub fn sort(&mut self) {
        self.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    }

    /// In-place heap-sort with a caller comparator.
    pub fn sort_by<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&RecordView<'_>, &RecordView<'_>) -> Ordering,
    {
        let n = self.len;
        if n < 2 {
            return;
        }
        for root in (0..n / 2).rev() {
            self.sift_down(root, n, &mut cmp);
        }
        for end in (1..n).rev() {
            self.swap_slots(0, end);
            self.sift_down(0, end, &mut cmp);
        }
    }

    fn sift_down<F>(&mut self, mut root: usize, end: usize, cmp: &mut F)
    where
        F: FnMut(&RecordView<'_>, &RecordView<'_>) -> Ordering,
    {
        loop {
            let mut child = 2 * root + 1;
            if child >= end {
                return;
            }
            if child + 1 < end && self.compare_slots(child, child + 1, cmp) == Ordering::Less {
                child += 1;
            }
            if self.compare_slots(root, child, cmp) == Ordering::Less {
                self.swap_slots(root, child);
                root = child;
            } else {
                return;
            }
        }
    }

    pub fn reverse(&mut self) {
        let mut i = 0;
        let mut j = self.len;
        while i + 1 < j {
            j -= 1;
            self.swap_slots(i, j);
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{FieldDef, Schema};
    use crate::types::{FieldType, Value};

    fn pair_schema() -> Arc<Schema> {
        Schema::intern(
            Some("flat_pair"),
            vec![
                FieldDef::new("key", FieldType::Uint32),
                FieldDef::new("val", FieldType::Int32),
            ],
        )
        .unwrap()
    }

    fn pair(schema: &Arc<Schema>, key: u32, val: i32) -> Record {
        Record::with_values(schema, &[("key", Value::U32(key)), ("val", Value::I32(val))]).unwrap()
    }

    #[test]
    fn rejects_variable_width_schemas() {
        let schema = Schema::intern(
            Some("flat_var"),
            vec![FieldDef::new("s", FieldType::Utf8)],
        )
        .unwrap();
        let err = FlatList::new(&schema).unwrap_err().to_string();
        assert!(err.contains("fixed-width"));
    }

    #[test]
    fn push_pop_round_trip() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        list.push(&pair(&schema, 1, -1)).unwrap();
        list.push(&pair(&schema, 2, -2)).unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).unwrap().get_u64("key").unwrap(), 1);
        let popped = list.pop().unwrap();
        assert_eq!(popped.get_i64("val").unwrap(), -2);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn insert_and_remove_shift_neighbors() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        for k in [1u32, 3, 4] {
            list.push(&pair(&schema, k, 0)).unwrap();
        }
        list.insert(1, &pair(&schema, 2, 0)).unwrap();
        let keys: Vec<u64> = list.iter().map(|v| v.get_u64("key").unwrap()).collect();
        assert_eq!(keys, vec![1, 2, 3, 4]);

        let removed = list.remove(2).unwrap();
        assert_eq!(removed.get_u64("key").unwrap(), 3);
        let keys: Vec<u64> = list.iter().map(|v| v.get_u64("key").unwrap()).collect();
        assert_eq!(keys, vec![1, 2, 4]);
    }

    #[test]
    fn front_operations() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        list.push(&pair(&schema, 2, 0)).unwrap();
        list.push_front(&pair(&schema, 1, 0)).unwrap();

        assert_eq!(list.get(0).unwrap().get_u64("key").unwrap(), 1);
        assert_eq!(list.pop_front().unwrap().get_u64("key").unwrap(), 1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        for k in 1u32..=3 {
            list.push(&pair(&schema, k, 0)).unwrap();
        }
        assert_eq!(list.at(-1).unwrap().get_u64("key").unwrap(), 3);
        assert_eq!(list.at(-3).unwrap().get_u64("key").unwrap(), 1);
        assert!(list.at(-4).is_none());
        assert!(list.at(3).is_none());
    }

    #[test]
    fn slot_mut_writes_in_place() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        list.push(&pair(&schema, 7, 0)).unwrap();

        list.slot_mut(0)
            .unwrap()
            .set("val", &Value::I32(99))
            .unwrap();
        assert_eq!(list.get(0).unwrap().get_i64("val").unwrap(), 99);
    }

    #[test]
    fn adopting_unaligned_buffer_fails() {
        let schema = pair_schema();
        let err = FlatList::from_bytes(&schema, vec![0u8; 9])
            .unwrap_err()
            .to_string();
        assert!(err.contains("multiple of element size"));
    }

    #[test]
    fn sort_orders_by_comparator() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        for k in [5u32, 1, 4, 2, 3, 9, 0, 8, 7, 6] {
            list.push(&pair(&schema, k, -(k as i32))).unwrap();
        }
        list.sort_by(|a, b| {
            a.get_u64("key")
                .unwrap()
                .cmp(&b.get_u64("key").unwrap())
        });
        let keys: Vec<u64> = list.iter().map(|v| v.get_u64("key").unwrap()).collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        // Values traveled with their keys.
        assert_eq!(list.get(9).unwrap().get_i64("val").unwrap(), -9);
    }

    #[test]
    fn default_sort_is_byte_lexicographic() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        list.push(&pair(&schema, 0x0200, 0)).unwrap();
        list.push(&pair(&schema, 0x0101, 0)).unwrap();
        list.sort();
        // Little-endian keys compare by low byte first: 0x0200 -> 00 02,
        // 0x0101 -> 01 01, so 0x0200 sorts first.
        assert_eq!(list.get(0).unwrap().get_u64("key").unwrap(), 0x0200);
    }

    #[test]
    fn reverse_flips_order() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        for k in 1u32..=4 {
            list.push(&pair(&schema, k, 0)).unwrap();
        }
        list.reverse();
        let keys: Vec<u64> = list.iter().map(|v| v.get_u64("key").unwrap()).collect();
        assert_eq!(keys, vec![4, 3, 2, 1]);
    }

    #[test]
    fn resize_zero_fills_new_slots() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        list.push(&pair(&schema, 1, 1)).unwrap();
        list.resize(3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(2).unwrap().get_u64("key").unwrap(), 0);
        list.resize(1);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).unwrap().get_u64("key").unwrap(), 1);
    }

    #[test]
    fn reserve_and_shrink_manage_capacity() {
        let schema = pair_schema();
        let mut list = FlatList::new(&schema).unwrap();
        list.reserve(16, false);
        assert!(list.capacity() >= 16);
        list.push(&pair(&schema, 1, 1)).unwrap();
        list.shrink_to_fit();
        assert!(list.capacity() >= 1);
        assert_eq!(list.get(0).unwrap().get_u64("key").unwrap(), 1);
    }

    #[test]
    fn rejects_records_of_other_schemas() {
        let schema = pair_schema();
        let other = Schema::intern(
            Some("flat_other"),
            vec![FieldDef::new("key", FieldType::Uint32)],
        )
        .unwrap();
        let mut list = FlatList::new(&schema).unwrap();
        let err = list.push(&Record::new(&other)).unwrap_err().to_string();
        assert!(err.contains("does not match"));
    }
}
