//! Bounded collections
//!
//! - [`RingStore`]: fixed-capacity circular buffer with per-slot timestamps
//!   and TTL eviction.
//! - [`SharedRingStore`] (`runtime` feature): a mutex-guarded `RingStore`
//!   that sweeps expired items on a background timer.

pub mod ring_store;
#[cfg(feature = "runtime")]
pub mod shared;

pub use ring_store::{RingStore, RingStoreConfig};
#[cfg(feature = "runtime")]
pub use shared::SharedRingStore;
