//! Utilities Module - shared infrastructure
//!
//! - `value`: JSON value helpers (path writes, truthiness, type names)

pub mod value;
