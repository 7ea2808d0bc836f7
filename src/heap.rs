//! Bounded array-based min-heap.

use std::error::Error;
use std::fmt;

/// Error raised when an insert would grow a heap past its fixed capacity.
/// This always indicates a logic error in run or merge-group scheduling,
/// not a recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {
    /// The capacity the heap was constructed with.
    pub capacity: usize,
}

impl Error for CapacityError {}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap capacity of {} records exceeded", self.capacity)
    }
}

/// Array-based binary min-heap with a fixed capacity.
///
/// Unlike `std::collections::BinaryHeap` the capacity is a hard bound:
/// [`MinHeap::insert`] fails rather than reallocating, which is how the
/// engine enforces its working-memory limits by construction.
pub struct MinHeap<T> {
    slots: Vec<T>,
    capacity: usize,
}

impl<T: Ord> MinHeap<T> {
    /// Creates an empty heap holding at most `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        MinHeap {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds an item to the heap.
    ///
    /// Fails only if the heap already holds `capacity` items.
    pub fn insert(&mut self, item: T) -> Result<(), CapacityError> {
        if self.slots.len() == self.capacity {
            return Err(CapacityError {
                capacity: self.capacity,
            });
        }

        self.slots.push(item);
        let last = self.slots.len() - 1;
        sift_up(&mut self.slots, last);
        return Ok(());
    }

    /// Removes and returns the minimum item, or [`None`] if the heap is
    /// empty.
    pub fn remove_min(&mut self) -> Option<T> {
        if self.slots.is_empty() {
            return None;
        }

        let last = self.slots.len() - 1;
        self.slots.swap(0, last);
        let min = self.slots.pop();
        if !self.slots.is_empty() {
            sift_down(&mut self.slots, 0);
        }
        return min;
    }

    /// Replaces the minimum item with `item` in place and returns the old
    /// minimum, sifting the replacement down in a single O(log n) step —
    /// equivalent to `remove_min` followed by `insert` without the second
    /// rebalancing pass.
    ///
    /// If the heap is empty, `item` simply becomes its only element and
    /// [`None`] is returned.
    pub fn replace_root(&mut self, item: T) -> Option<T> {
        if self.slots.is_empty() {
            self.slots.push(item);
            return None;
        }

        let old = std::mem::replace(&mut self.slots[0], item);
        sift_down(&mut self.slots, 0);
        return Some(old);
    }

    /// Returns a reference to the minimum item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.slots.first()
    }

    /// Returns the number of items currently in the heap.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Checks whether the heap is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Moves the item at `child` up until its parent is no larger.
pub(crate) fn sift_up<T: Ord>(slots: &mut [T], mut child: usize) {
    while child > 0 {
        let parent = (child - 1) / 2;
        if slots[child] < slots[parent] {
            slots.swap(child, parent);
            child = parent;
        } else {
            break;
        }
    }
}

/// Moves the item at `parent` down until both children are no smaller.
/// The heap is bounded by the slice length, so callers restrict the slice
/// to the active region.
pub(crate) fn sift_down<T: Ord>(slots: &mut [T], mut parent: usize) {
    loop {
        let left = 2 * parent + 1;
        if left >= slots.len() {
            break;
        }

        let mut smallest = left;
        let right = left + 1;
        if right < slots.len() && slots[right] < slots[left] {
            smallest = right;
        }

        if slots[smallest] < slots[parent] {
            slots.swap(parent, smallest);
            parent = smallest;
        } else {
            break;
        }
    }
}

/// Re-establishes the heap property over an arbitrarily ordered slice.
pub(crate) fn heapify<T: Ord>(slots: &mut [T]) {
    for parent in (0..slots.len() / 2).rev() {
        sift_down(slots, parent);
    }
}
