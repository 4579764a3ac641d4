//! Privacy building blocks
//!
//! - [`hash`]: salted / keyed content hashing for pseudonyms and token records
//! - [`patterns`]: sensitive-substring detection by pattern class

pub mod hash;
pub mod patterns;

pub use hash::{ContentHasher, HashAlgorithm, HashError};
pub use patterns::{luhn_check, PatternClass, PatternError, PatternMatch, PatternScanner};
