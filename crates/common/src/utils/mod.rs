//! Common utility functions
//!
//! - **[`serde`]**: Serialization helpers for option structs

pub mod serde;

pub use self::serde::duration_millis;
