//! Foundation utilities shared across perfguard crates.
//!
//! # Safety and Quality
//!
//! This crate enforces strict safety and quality standards: no `unsafe`, no
//! panicking accessors, and explicit `Result` returns for anything that can
//! be misconfigured.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, collections, clocks, serde helpers
//! - `runtime`: tokio-backed timers and the self-cleaning shared ring store

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod collections;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod time;
#[cfg(feature = "foundation")]
pub mod utils;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use collections::SharedRingStore;
#[cfg(feature = "foundation")]
pub use collections::{RingStore, RingStoreConfig};
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use time::timer::{recurring, TimerHandle};
#[cfg(feature = "foundation")]
pub use time::{Clock, MockClock, SystemClock};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
