//! Common utility functions and helper macros
//!
//! - **[`macros`]**: status-enum string conversions
//! - **[`serde`]**: duration serialization helpers used by configuration types

#[macro_use]
pub mod macros;
pub mod serde;

pub use self::serde::{duration_millis, duration_secs, option_duration_secs};
