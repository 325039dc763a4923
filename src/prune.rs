//! # Anytime Loop Detection
//!
//! Finds prunable loops in the recorded path: places where the vehicle flew
//! back close to a segment it had already flown, so everything in between can
//! be collapsed to a single point without losing obstacle-relevant detail.
//!
//! The detector compares the line segment between every pair of sequential
//! points against the segment between every other later pair, using
//! [`segment_segment_distance`]. Adjacent segments are never compared: they
//! touch by construction and there is nothing between them to trim. When two
//! segments pass within the pruning threshold, the index range between them
//! is recorded together with the closest-approach midpoint, which later
//! replaces the whole loop.
//!
//! Like the simplification engine this is an anytime computation, resumed
//! across calls from a background task. One deliberate difference: the
//! deadline is checked only at the outer-loop boundary, so a call may overrun
//! its budget by up to one full inner scan. That slack keeps the resume state
//! down to a single outer cursor.

use crate::geometry::segment_segment_distance;
use crate::path::PathStore;
use crate::Point3;
use log::trace;
use std::collections::TryReserveError;
use std::time::{Duration, Instant};

/// A sub-path that can be collapsed: everything strictly between `start` and
/// `end` is replaceable by `midpoint`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrunableLoop {
    pub start: usize,
    pub end: usize,
    /// Closest-approach midpoint of the two segments that closed the loop.
    pub midpoint: Point3,
}

impl PrunableLoop {
    /// Points removed by pruning this loop: the interior is dropped and one
    /// slot is re-used for the midpoint.
    #[inline]
    pub fn removable(&self) -> usize {
        (self.end - self.start).saturating_sub(1)
    }
}

/// Anytime pairwise segment-distance scanner producing a list of prunable
/// loops.
#[derive(Debug)]
pub struct LoopDetector {
    /// True once every segment pair of the current path has been examined.
    complete: bool,
    /// Outer cursor, resumable across calls.
    current_i: usize,
    /// Lower bound for the inner cursor; prevents re-detecting a loop nested
    /// inside one already recorded.
    min_j: usize,
    loops: Vec<PrunableLoop>,
    loops_capacity: usize,
    /// Resume base for [`LoopDetector::restart`]. Stays at zero: a segment
    /// appended later pairs with every earlier segment, so a finished prefix
    /// can never be skipped the way the simplify engine skips one.
    clean_until: usize,
}

impl LoopDetector {
    /// Allocate a detector for a path of `path_capacity` points. The loop
    /// list holds `path_capacity / 4` entries.
    pub fn new(path_capacity: usize) -> Result<Self, TryReserveError> {
        let loops_capacity = (path_capacity / 4).max(1);
        let mut loops = Vec::new();
        loops.try_reserve_exact(loops_capacity)?;
        Ok(Self {
            complete: false,
            current_i: 0,
            min_j: 2,
            loops,
            loops_capacity,
            clean_until: 0,
        })
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Loops recorded so far. Only meaningful for the path contents the scan
    /// ran against; a compaction invalidates the indices.
    #[inline]
    pub fn loops(&self) -> &[PrunableLoop] {
        &self.loops
    }

    /// Total number of points the recorded loops could remove.
    pub fn removable_count(&self) -> usize {
        self.loops.iter().map(|l| l.removable()).sum()
    }

    /// Forget in-progress work and recorded loops, resuming the scan from the
    /// already-scanned boundary. Call whenever a point is appended.
    pub fn restart(&mut self) {
        self.complete = false;
        self.current_i = self.clean_until;
        self.min_j = self.clean_until + 2;
        self.loops.clear();
    }

    /// Full reset, rescanning from the anchor. Call whenever the path is
    /// physically altered (compaction shifts indices).
    pub fn reset(&mut self) {
        self.clean_until = 0;
        self.restart();
    }

    /// Scan for loops for roughly `budget`, then return with the outer cursor
    /// saved. The deadline is only checked between inner scans, so the call
    /// may overrun slightly. At least one inner scan runs per call. Sets the
    /// completion flag once every pair has been examined or the loop list is
    /// full; a path shorter than four points is trivially complete.
    pub fn detect(&mut self, path: &PathStore, prune_delta: f32, budget: Duration) {
        if self.complete {
            return;
        }
        if path.len() < 4 {
            self.complete = true;
            return;
        }

        let points = path.points();
        let last_index = path.last_index();
        let start_time = Instant::now();
        let mut did_work = false;

        while self.current_i < last_index - 1 {
            if did_work && start_time.elapsed() > budget {
                return;
            }
            did_work = true;

            let i = self.current_i;
            let mut j = (i + 2).max(self.min_j);
            while j < last_index {
                let dp = segment_segment_distance(
                    &points[i],
                    &points[i + 1],
                    &points[j],
                    &points[j + 1],
                );
                if dp.distance <= prune_delta {
                    // suppress detection of loops nested inside this one
                    self.min_j = j;
                    // a range with no interior (j == i + 2) has nothing to
                    // prune; skip it but keep the min_j advance above
                    if j > i + 2 {
                        if self.loops.len() >= self.loops_capacity {
                            // list full: no reason to keep looking this pass
                            self.complete = true;
                            trace!("loop list full after {} loops", self.loops.len());
                            return;
                        }
                        self.loops.push(PrunableLoop {
                            start: i + 1,
                            end: j,
                            midpoint: dp.midpoint,
                        });
                    }
                }
                j += 1;
            }
            self.current_i += 1;
        }

        // note: unlike simplification, a finished scan does not advance
        // clean_until. A point appended later forms a segment that must be
        // compared against every earlier segment, so the outer cursor has to
        // start from the front again.
        self.complete = true;
        trace!(
            "loop scan complete: {} loops, {} points removable",
            self.loops.len(),
            self.removable_count()
        );
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point3;
    use crate::path::PathStore;

    const FOREVER: Duration = Duration::from_secs(60);

    fn store(points: &[(f32, f32, f32)]) -> PathStore {
        let mut path = PathStore::with_capacity(points.len().max(4)).unwrap();
        path.reset(Point3::new(points[0].0, points[0].1, points[0].2));
        for &(x, y, z) in &points[1..] {
            assert!(path.append(Point3::new(x, y, z)));
        }
        path
    }

    fn run_to_completion(detector: &mut LoopDetector, path: &PathStore, delta: f32) {
        while !detector.is_complete() {
            detector.detect(path, delta, FOREVER);
        }
    }

    /// Out 100m and back along (nearly) the same line, with a lateral
    /// excursion in the middle of the return so segments stay non-parallel.
    fn out_and_back() -> PathStore {
        store(&[
            (0.0, 0.0, 0.0),
            (50.0, 0.1, 0.0),
            (100.0, 0.0, 0.0),
            (100.0, 30.0, 0.0),
            (50.0, 30.0, 0.0),
            (50.0, 0.3, 0.0),
            (0.0, 0.5, 0.0),
        ])
    }

    #[test]
    fn test_out_and_back_found() {
        let path = out_and_back();
        let mut detector = LoopDetector::new(path.capacity()).unwrap();
        run_to_completion(&mut detector, &path, 2.0);

        assert!(!detector.loops().is_empty(), "expected a prunable loop");
        let l = &detector.loops()[0];
        // the outbound leg near x=50 comes within a fraction of a meter of
        // the return leg; the loop spans the excursion between them
        assert!(l.start >= 1 && l.end <= 5);
        assert!(l.removable() >= 1);
        let mid = l.midpoint;
        assert!((mid.x - 50.0).abs() < 2.0);
        assert!(mid.y.abs() < 2.0);
    }

    #[test]
    fn test_straight_path_has_no_loops() {
        let path = store(&[
            (0.0, 0.0, 0.0),
            (10.0, 1.0, 0.0),
            (20.0, 0.0, 0.0),
            (30.0, 1.0, 0.0),
            (40.0, 0.0, 0.0),
        ]);
        let mut detector = LoopDetector::new(path.capacity()).unwrap();
        run_to_completion(&mut detector, &path, 1.0);
        assert!(detector.loops().is_empty());
        assert_eq!(detector.removable_count(), 0);
    }

    #[test]
    fn test_no_adjacent_ranges_recorded() {
        // a tight double-back designed so segment (i,i+1) approaches segment
        // (i+2,i+3); the detector must advance min_j but record nothing for
        // the interior-less range
        let path = store(&[
            (0.0, 0.0, 0.0),
            (10.0, 0.0, 0.0),
            (10.0, 0.5, 0.0),
            (0.0, 0.6, 0.0),
            (0.0, 20.0, 0.0),
        ]);
        let mut detector = LoopDetector::new(path.capacity()).unwrap();
        run_to_completion(&mut detector, &path, 1.0);
        for l in detector.loops() {
            assert!(l.end > l.start + 1, "adjacent range recorded: {:?}", l);
        }
    }

    #[test]
    fn test_idempotent_without_restart() {
        let path = out_and_back();
        let mut detector = LoopDetector::new(path.capacity()).unwrap();
        run_to_completion(&mut detector, &path, 2.0);
        let first = detector.loops().to_vec();
        detector.detect(&path, 2.0, FOREVER);
        assert_eq!(first, detector.loops());
    }

    #[test]
    fn test_restart_rescans_and_refinds() {
        let path = out_and_back();
        let mut detector = LoopDetector::new(path.capacity()).unwrap();
        run_to_completion(&mut detector, &path, 2.0);
        let first = detector.loops().to_vec();
        assert!(!first.is_empty());

        // reset clears the list; a rescan must re-find the identical loops
        detector.reset();
        assert!(detector.loops().is_empty());
        run_to_completion(&mut detector, &path, 2.0);
        assert_eq!(first, detector.loops());
    }

    #[test]
    fn test_zero_budget_one_outer_scan_per_call() {
        let mut coords = Vec::new();
        for i in 0..32 {
            coords.push((i as f32 * 10.0, (i % 2) as f32, 0.0));
        }
        let path = store(&coords);
        let mut detector = LoopDetector::new(path.capacity()).unwrap();
        let mut calls = 0;
        while !detector.is_complete() {
            detector.detect(&path, 0.1, Duration::ZERO);
            calls += 1;
            assert!(calls < 1000);
        }
        assert!(calls > 1, "zero budget should take multiple calls");
        assert!(detector.loops().is_empty());
    }

    #[test]
    fn test_loop_list_full_declares_complete() {
        // repeated tight out-and-backs crossing the y=0 corridor give many
        // independent loops; a two-entry loop list fills up
        let mut coords = vec![(0.0, 0.0, 0.0), (200.0, 0.0, 0.0)];
        for k in 0..10 {
            let x = 10.0 + k as f32 * 18.0;
            coords.push((x, 50.0, 0.0));
            coords.push((x + 4.0, -50.0, 0.0));
            coords.push((x + 8.0, 50.0, 0.0));
        }
        let path = store(&coords);
        let mut detector = LoopDetector::new(8).unwrap(); // list capacity 2
        run_to_completion(&mut detector, &path, 1.0);
        assert!(detector.is_complete());
        assert!(detector.loops().len() <= 2);
    }

    #[test]
    fn test_short_path_trivially_complete() {
        let path = store(&[(0.0, 0.0, 0.0), (10.0, 0.0, 0.0), (20.0, 0.0, 0.0)]);
        let mut detector = LoopDetector::new(path.capacity()).unwrap();
        detector.detect(&path, 1.0, FOREVER);
        assert!(detector.is_complete());
        assert!(detector.loops().is_empty());
    }
}
