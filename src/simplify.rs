//! # Anytime Path Simplification
//!
//! Ramer-Douglas-Peucker over the recorded path, reworked as an *anytime*
//! computation: each call to [`SimplifyEngine::detect`] runs for at most a
//! fixed time budget (200 microseconds by default) and returns, preserving
//! partial progress. It can therefore run from a low-priority periodic task
//! without ever blocking the flight loop.
//!
//! ## Algorithm
//!
//! Classic RDP, but with an explicit worklist stack of `(start, finish)`
//! ranges instead of recursion, so stack depth is bounded and known at
//! allocation time. For each popped range, the interior point with the
//! largest perpendicular distance to the chord is found (first maximum wins);
//! if it exceeds epsilon the range is split around it, otherwise every
//! interior point is marked discardable. The engine never mutates the path:
//! it only maintains a keep/discard marking that the cleanup orchestrator
//! applies later.
//!
//! A `clean_until` index memoizes the finalized prefix: once a pass
//! completes, everything up to the then-last point is settled, and a
//! [`SimplifyEngine::restart`] after an append skips ranges that end inside
//! that prefix instead of re-scoring them. Physically altering the path
//! shifts indices and requires a full [`SimplifyEngine::reset`].
//!
//! ## Failure mode
//!
//! If a split would overflow the fixed-capacity worklist the engine abandons
//! the pass and reports completion. This is conservative: points stay marked
//! "keep", they are never incorrectly discarded.

use crate::geometry::point_line_distance;
use crate::path::PathStore;
use log::trace;
use std::collections::TryReserveError;
use std::time::{Duration, Instant};

/// Anytime Ramer-Douglas-Peucker engine producing a keep/discard marking.
#[derive(Debug)]
pub struct SimplifyEngine {
    /// True once the whole current path has been classified.
    complete: bool,
    /// Pending `(start, finish)` ranges still to refine.
    stack: Vec<(usize, usize)>,
    stack_capacity: usize,
    /// One flag per path slot, `true` = keep.
    keep: Vec<bool>,
    /// Points at or before this index are finalized and need no recheck.
    clean_until: usize,
    /// Last path index covered by the in-flight pass. The path may grow
    /// while a pass is suspended, so completion may only finalize up to
    /// here, not up to the path's current tail.
    target: usize,
}

impl SimplifyEngine {
    /// Allocate an engine for a path of `path_capacity` points.
    ///
    /// The worklist holds `path_capacity * 2 / 3 + 1` entries, an
    /// overestimate of the worst-case RDP recursion width for that many
    /// points.
    pub fn new(path_capacity: usize) -> Result<Self, TryReserveError> {
        let stack_capacity = path_capacity * 2 / 3 + 1;
        let mut stack = Vec::new();
        stack.try_reserve_exact(stack_capacity)?;
        let mut keep = Vec::new();
        keep.try_reserve_exact(path_capacity)?;
        keep.resize(path_capacity, true);
        Ok(Self {
            complete: false,
            stack,
            stack_capacity,
            keep,
            clean_until: 0,
            target: 0,
        })
    }

    /// Whether the marking covers the entire current path.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether slot `index` is marked keep.
    #[inline]
    pub fn keeps(&self, index: usize) -> bool {
        self.keep[index]
    }

    /// Number of slots in `0..=last_index` currently marked discardable.
    pub fn discard_count(&self, last_index: usize) -> usize {
        self.keep[..=last_index].iter().filter(|&&k| !k).count()
    }

    /// Forget in-progress work. Call whenever a point is appended: the new
    /// tail invalidates completion, but the marking of the finalized prefix
    /// (up to `clean_until`) stays memoized.
    pub fn restart(&mut self) {
        self.complete = false;
        self.stack.clear();
        for k in &mut self.keep[self.clean_until + 1..] {
            *k = true;
        }
    }

    /// Full reset, dropping the memoized prefix as well. Call whenever the
    /// path is physically altered (compaction shifts indices).
    pub fn reset(&mut self) {
        self.clean_until = 0;
        self.complete = false;
        self.stack.clear();
        self.keep.iter_mut().for_each(|k| *k = true);
    }

    /// Run the simplification for at most `budget`, then return with partial
    /// progress saved. At least one worklist range is processed per call, so
    /// progress is guaranteed even under a zero budget. Sets the completion
    /// flag once the whole path has been classified. A path too short to
    /// simplify is trivially complete.
    pub fn detect(&mut self, path: &PathStore, epsilon: f32, budget: Duration) {
        if self.complete {
            return;
        }
        if path.len() < 3 {
            self.complete = true;
            return;
        }

        // empty stack while incomplete means we are (re)starting
        if self.stack.is_empty() {
            self.target = path.last_index();
            self.stack.push((0, self.target));
        }

        let points = path.points();
        let start_time = Instant::now();
        let mut did_work = false;
        while let Some((start, finish)) = self.stack.pop() {
            if did_work && start_time.elapsed() > budget {
                // unprocessed range goes back for the next call
                self.stack.push((start, finish));
                return;
            }
            did_work = true;

            // finalized on an earlier pass, nothing left to refine here
            if finish <= self.clean_until {
                continue;
            }

            let mut max_dist = 0.0_f32;
            let mut max_index = start;
            for i in (start + 1)..finish {
                if self.keep[i] {
                    let dist = point_line_distance(&points[i], &points[start], &points[finish]);
                    if dist > max_dist {
                        max_index = i;
                        max_dist = dist;
                    }
                }
            }

            if max_dist > epsilon {
                // worklist full: give up on further refinement, conservatively
                // leaving the remaining points marked keep
                if self.stack.len() + 2 > self.stack_capacity {
                    self.complete = true;
                    return;
                }
                self.stack.push((start, max_index));
                self.stack.push((max_index, finish));
            } else {
                for k in &mut self.keep[start + 1..finish] {
                    *k = false;
                }
            }
        }

        self.clean_until = self.target;
        self.complete = true;
        trace!(
            "simplify complete: {} of {} points discardable",
            self.discard_count(path.last_index()),
            path.len()
        );
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
