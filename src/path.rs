//! # Path Store
//!
//! Fixed-capacity ordered storage for the breadcrumb trail.
//!
//! The buffer is allocated exactly once, fallibly, when the recorder
//! initializes; it is never resized afterwards, which bounds worst-case
//! per-call latency on the flight controller. Points are addressed by index.
//! Index 0 is the anchor (the armed/takeoff location) and survives every
//! compaction.
//!
//! Removal happens in two phases so the cleanup algorithms can work from
//! stable indices: slots are first *zeroed* in place, then a single
//! [`PathStore::compact`] pass slides the survivors down to close the gaps,
//! preserving relative order.

use crate::Point3;
use std::collections::TryReserveError;

/// Fixed-capacity ordered sequence of 3D points with an anchor at index 0.
#[derive(Debug)]
pub struct PathStore {
    points: Vec<Point3>,
    /// Configured limit; the allocator may hand back more, so the `Vec`'s
    /// own capacity is not the bound.
    capacity: usize,
    /// Highest valid index; the path is `points[0..=last_index]`.
    last_index: usize,
}

impl PathStore {
    /// Allocate a store for exactly `capacity` points.
    ///
    /// The allocation is fallible: on a memory-starved controller the caller
    /// must be able to observe the failure and deactivate instead of
    /// aborting.
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut points = Vec::new();
        points.try_reserve_exact(capacity)?;
        Ok(Self {
            points,
            capacity,
            last_index: 0,
        })
    }

    /// Maximum number of points this store can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of points currently stored.
    #[inline]
    pub fn len(&self) -> usize {
        if self.points.is_empty() { 0 } else { self.last_index + 1 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index of the most recently stored point.
    #[inline]
    pub fn last_index(&self) -> usize {
        self.last_index
    }

    /// Borrow a stored point.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Point3> {
        self.points.get(index).filter(|_| index <= self.last_index)
    }

    /// Borrow the whole valid path `[0..=last_index]` as a slice.
    #[inline]
    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// Drop everything and seed the anchor point.
    pub fn reset(&mut self, anchor: Point3) {
        self.points.clear();
        self.points.push(anchor);
        self.last_index = 0;
    }

    /// Drop everything, leaving the store empty.
    pub fn clear(&mut self) {
        self.points.clear();
        self.last_index = 0;
    }

    /// Append a point. Fails (returns `false`) when the store is full or has
    /// no anchor yet; the orchestrator is responsible for compacting before
    /// capacity runs out.
    pub fn append(&mut self, point: Point3) -> bool {
        if self.points.is_empty() || self.points.len() >= self.capacity() {
            return false;
        }
        self.points.push(point);
        self.last_index += 1;
        true
    }

    /// Remove and return the most recently stored point, walking the path
    /// backward toward the anchor. The anchor itself is popped last, after
    /// which the store is empty.
    pub fn pop(&mut self) -> Option<Point3> {
        let point = self.points.pop()?;
        self.last_index = self.last_index.saturating_sub(1);
        Some(point)
    }

    /// Zero a slot in place, marking it for removal by [`PathStore::compact`].
    /// Index 0 is never zeroed.
    pub fn zero(&mut self, index: usize) {
        if index > 0 && index <= self.last_index {
            self.points[index] = Point3::zeros();
        }
    }

    /// Overwrite a slot with a replacement point (used when a pruned loop is
    /// collapsed to its midpoint).
    pub fn set(&mut self, index: usize, point: Point3) {
        if index <= self.last_index {
            self.points[index] = point;
        }
    }

    /// Whether a slot currently holds the zero marker.
    #[inline]
    pub fn is_zeroed(&self, index: usize) -> bool {
        self.points[index] == Point3::zeros()
    }

    /// Remove all zeroed slots, sliding survivors down to close the gaps.
    /// Relative order is preserved and index 0 is never examined, so the
    /// anchor always survives even if it happens to be at the origin.
    /// Returns the number of slots removed.
    pub fn compact(&mut self) -> usize {
        let mut dest = 0;
        for src in 1..=self.last_index {
            if !self.is_zeroed(src) {
                dest += 1;
                if dest != src {
                    self.points[dest] = self.points[src];
                }
            }
        }
        let removed = self.last_index - dest;
        self.points.truncate(dest + 1);
        self.last_index = dest;
        removed
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
