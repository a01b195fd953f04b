//! A fixed-capacity, timestamped circular store with TTL eviction.
//!
//! A [`RingStore`] keeps items in insertion order while bounding memory by a
//! capacity fixed at construction. Every slot carries the instant it was
//! written, taken from the store's [`Clock`], in a parallel `timestamps`
//! array aligned by slot index.
//!
//! # Layout
//!
//! - `head` is the physical slot of the oldest item (logical index `0`).
//! - `tail` is the physical slot the next push writes to.
//! - `size` is the number of live items; `tail == (head + size) % capacity`.
//!
//! When the store is full a push overwrites the slot at `head` and advances
//! `head` and `tail` together, so the tail always trails the head by `size`
//! positions rather than moving as an independent cursor.
//!
//! # TTL
//!
//! [`cleanup`](RingStore::cleanup) scans forward from `head` for the first
//! slot still younger than `max_age`. Insertion order is chronological, so
//! everything before that slot is expired and is cleared in one step.
//!
//! # Resizing
//!
//! [`resize`](RingStore::resize) to a smaller capacity keeps only the most
//! recent items; the oldest are dropped on purpose. Retained items are
//! re-stamped with the current time, which means a TTL sweep right after a
//! resize will not evict them even if they were already old.
//!
//! # Complexity
//! - `push`, `pop`, `shift`, `get`, `len` are **O(1)**.
//! - `cleanup` is **O(expired)**; `resize` is **O(size)**.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{CommonError, CommonResult};
use crate::time::{Clock, SystemClock};

/// Construction options for a [`RingStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStoreConfig {
    /// Maximum number of items retained
    pub capacity: usize,
    /// Items older than this are removed by `cleanup`; `None` disables TTL
    pub max_age: Option<Duration>,
}

impl RingStoreConfig {
    /// A store of `capacity` items without TTL eviction
    pub fn new(capacity: usize) -> Self {
        Self { capacity, max_age: None }
    }

    /// Enable TTL eviction
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// A fixed-capacity circular buffer of timestamped items.
///
/// # Examples
///
/// ```rust
/// use perfguard_common::collections::{RingStore, RingStoreConfig};
///
/// let mut store = RingStore::new(RingStoreConfig::new(3)).unwrap();
/// for value in 1..=4 {
///     store.push(value);
/// }
///
/// assert_eq!(store.to_vec(), vec![2, 3, 4]);
/// assert_eq!(store.pop(), Some(4));
/// assert_eq!(store.shift(), Some(2));
/// assert_eq!(store.get(0), Some(&3));
/// ```
pub struct RingStore<T, C: Clock = SystemClock> {
    slots: Vec<Option<T>>,
    timestamps: Vec<Option<Instant>>,
    head: usize,
    tail: usize,
    size: usize,
    capacity: usize,
    max_age: Option<Duration>,
    clock: C,
}

impl<T: fmt::Debug, C: Clock> fmt::Debug for RingStore<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingStore")
            .field("capacity", &self.capacity)
            .field("size", &self.size)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("max_age", &self.max_age)
            .field("items", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl<T> RingStore<T, SystemClock> {
    /// Create a store backed by the system clock.
    ///
    /// # Errors
    /// Returns [`CommonError::InvalidCapacity`] when `config.capacity` is zero.
    pub fn new(config: RingStoreConfig) -> CommonResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<T, C: Clock> RingStore<T, C> {
    /// Create a store with a custom clock (useful for testing)
    ///
    /// # Errors
    /// Returns [`CommonError::InvalidCapacity`] when `config.capacity` is zero.
    pub fn with_clock(config: RingStoreConfig, clock: C) -> CommonResult<Self> {
        if config.capacity == 0 {
            return Err(CommonError::invalid_capacity(config.capacity, "ring store"));
        }

        Ok(Self {
            slots: empty_slots(config.capacity),
            timestamps: vec![None; config.capacity],
            head: 0,
            tail: 0,
            size: 0,
            capacity: config.capacity,
            max_age: config.max_age,
            clock,
        })
    }

    /// Store `item`, overwriting the oldest item when full.
    ///
    /// Always returns `true`: capacity is validated at construction, so a
    /// push cannot fail afterwards.
    pub fn push(&mut self, item: T) -> bool {
        let now = self.clock.now();

        if self.size == self.capacity {
            self.slots[self.head] = Some(item);
            self.timestamps[self.head] = Some(now);
            self.head = (self.head + 1) % self.capacity;
            self.tail = self.head;
        } else {
            self.slots[self.tail] = Some(item);
            self.timestamps[self.tail] = Some(now);
            self.tail = (self.tail + 1) % self.capacity;
            self.size += 1;
        }

        true
    }

    /// Removes and returns the most recent item.
    pub fn pop(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }

        self.tail = (self.tail + self.capacity - 1) % self.capacity;
        self.size -= 1;
        self.timestamps[self.tail] = None;
        self.slots[self.tail].take()
    }

    /// Removes and returns the oldest item.
    pub fn shift(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }

        let slot = self.head;
        self.head = (self.head + 1) % self.capacity;
        self.size -= 1;
        self.timestamps[slot] = None;
        self.slots[slot].take()
    }

    /// Returns the item at logical index `idx` (0 is the oldest), or `None`
    /// when `idx` is outside `[0, len)`.
    pub fn get(&self, idx: usize) -> Option<&T> {
        if idx >= self.size {
            return None;
        }
        self.slots[self.physical(idx)].as_ref()
    }

    /// Returns the instant the item at logical index `idx` was stored
    pub fn timestamp_of(&self, idx: usize) -> Option<Instant> {
        if idx >= self.size {
            return None;
        }
        self.timestamps[self.physical(idx)]
    }

    /// Most recently stored item
    pub fn last(&self) -> Option<&T> {
        self.size.checked_sub(1).and_then(|idx| self.get(idx))
    }

    /// Removes every item older than `max_age` and returns how many were
    /// removed. A no-op when TTL is disabled or nothing has expired.
    pub fn cleanup(&mut self) -> usize {
        let Some(max_age) = self.max_age else {
            return 0;
        };
        let now = self.clock.now();

        let mut expired = 0;
        while expired < self.size {
            let slot = self.physical(expired);
            match self.timestamps[slot] {
                Some(stamped) if now.saturating_duration_since(stamped) < max_age => break,
                _ => expired += 1,
            }
        }

        for offset in 0..expired {
            let slot = self.physical(offset);
            self.slots[slot] = None;
            self.timestamps[slot] = None;
        }
        self.head = (self.head + expired) % self.capacity;
        self.size -= expired;

        expired
    }

    /// Change the capacity.
    ///
    /// Growing keeps every item. Shrinking keeps the most recent
    /// `min(new_capacity, len)` items and silently drops the rest. Retained
    /// items are re-stamped with the current time.
    ///
    /// # Errors
    /// Returns [`CommonError::InvalidCapacity`] when `new_capacity` is zero;
    /// the store is left untouched.
    pub fn resize(&mut self, new_capacity: usize) -> CommonResult<()> {
        if new_capacity == 0 {
            return Err(CommonError::invalid_capacity(new_capacity, "ring store resize"));
        }

        let keep = self.size.min(new_capacity);
        let skip = self.size - keep;
        let now = self.clock.now();

        let mut slots = empty_slots(new_capacity);
        let mut timestamps = vec![None; new_capacity];
        for (target, offset) in (skip..self.size).enumerate() {
            let slot = self.physical(offset);
            slots[target] = self.slots[slot].take();
            timestamps[target] = Some(now);
        }

        self.slots = slots;
        self.timestamps = timestamps;
        self.capacity = new_capacity;
        self.head = 0;
        self.size = keep;
        self.tail = keep % new_capacity;

        Ok(())
    }

    /// Removes all items, leaving the capacity unchanged.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.timestamps.iter_mut().for_each(|stamp| *stamp = None);
        self.head = 0;
        self.tail = 0;
        self.size = 0;
    }

    /// Returns an iterator visiting items from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.size).filter_map(move |idx| self.get(idx))
    }

    /// Number of items currently stored
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` when the store has no items
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns `true` when the next push will overwrite the oldest item
    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    /// Maximum number of items the store can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// TTL applied by `cleanup`
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    fn physical(&self, idx: usize) -> usize {
        (self.head + idx) % self.capacity
    }
}

impl<T: Clone, C: Clock> RingStore<T, C> {
    /// Items in chronological insertion order
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

fn empty_slots<T>(capacity: usize) -> Vec<Option<T>> {
    std::iter::repeat_with(|| None).take(capacity).collect()
}
