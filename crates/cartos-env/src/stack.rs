//! Windowed cloud stack – a fixed-depth ring of per-sweep clouds.
//!
//! Each [`CloudStack::push`] overwrites the oldest slot, advances the write
//! cursor and rebuilds the merged aggregate from the resident slots only, so
//! the aggregate never carries leftovers of overwritten sweeps.
//!
//! # Example
//!
//! ```rust
//! use cartos_env::stack::CloudStack;
//!
//! let mut stack = CloudStack::new(2).unwrap();
//! stack.push(vec![1]);
//! stack.push(vec![2, 3]);
//! assert_eq!(stack.push(vec![4]), &[4, 2, 3]);
//! ```

use cartos_types::CartosError;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CloudStack<T> {
    slots: Vec<Vec<T>>,
    cursor: usize,
    merged: Vec<T>,
}

impl<T: Clone> CloudStack<T> {
    /// Create a stack with `depth` empty slots.
    pub fn new(depth: usize) -> Result<Self, CartosError> {
        if depth == 0 {
            return Err(CartosError::InvalidConfig("cloud stack depth must be at least 1".into()));
        }
        Ok(Self {
            slots: vec![Vec::new(); depth],
            cursor: 0,
            merged: Vec::new(),
        })
    }

    /// Store `cloud` in the current slot, advance the cursor and return the
    /// union of all slots (no deduplication, slot order).
    ///
    /// An empty cloud leaves the ring untouched.
    pub fn push(&mut self, cloud: Vec<T>) -> &[T] {
        if cloud.is_empty() {
            warn!(slot = self.cursor, "ignoring empty cloud pushed onto stack");
            return &self.merged;
        }
        self.overwrite(cloud)
    }

    /// Like [`push`][Self::push], but an empty cloud still claims its slot
    /// and evicts the sweep that held it.
    pub fn overwrite(&mut self, cloud: Vec<T>) -> &[T] {
        self.slots[self.cursor] = cloud;
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.merged = self.slots.iter().flatten().cloned().collect();
        &self.merged
    }

    /// Union of the resident slots.
    pub fn merged(&self) -> &[T] {
        &self.merged
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next push writes to.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of slots currently holding a sweep.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(Vec::clear);
        self.cursor = 0;
        self.merged.clear();
    }
}
