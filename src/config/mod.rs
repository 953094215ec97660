//! # Configuration Module
//!
//! Centralizes the crate's numeric constants. Interdependent values are
//! co-located and their relationships documented so a change in one place
//! cannot silently invalidate another.

pub mod constants;
pub use constants::*;
