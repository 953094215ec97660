//! # Flat Collections
//!
//! Packed collections of fixed-width records: every element lives inline
//! in one contiguous byte buffer, so iteration is a pointer walk and the
//! whole collection can be snapshotted or adopted as raw bytes.
//!
//! - [`FlatList`]: resizable array with deque-style ends, slot handles,
//!   and in-place heap-sort.
//! - [`FlatSet`]: sorted unique list with binary-search insertion and
//!   three-way-predicate range queries.

pub mod list;
pub mod set;

pub use list::FlatList;
pub use set::FlatSet;
