//! # Path Recorder
//!
//! Lifecycle controller and cleanup orchestrator. This is the only component
//! that mutates the path store: it consumes the keep/discard marking of the
//! [`SimplifyEngine`] and the loop list of the [`LoopDetector`], zeroes the
//! affected slots, compacts, and resets both engines so they re-validate
//! against the new path contents.
//!
//! ## Execution model
//!
//! Two contexts cooperate. The flight loop calls [`PathRecorder::update`] a
//! couple of times per second: it handles position-validity timeouts, runs
//! routine cleanup when memory is nearly full, and appends a breadcrumb once
//! the vehicle has moved far enough. A low-priority task calls
//! [`PathRecorder::detect_simplifications`] and
//! [`PathRecorder::detect_loops`], each bounded by a time budget. Nothing
//! here blocks and nothing is internally synchronized; exclusive access is
//! enforced by `&mut self`.
//!
//! ## Lifecycle
//!
//! *uninitialized → active → deactivated (terminal for the flight)*.
//! Construction allocates every buffer up front and is the only fallible
//! step. [`PathRecorder::reset_path`] at arming seeds the anchor if a
//! position fix exists, otherwise the recorder stays inactive for the whole
//! flight. In flight, a prolonged loss of position or a failed routine
//! cleanup deactivates permanently; only re-arming gives a fresh attempt.

use crate::path::PathStore;
use crate::prune::LoopDetector;
use crate::simplify::SimplifyEngine;
use crate::{ActionSink, PathAction, Point3, RecorderConfig, POINTS_CEILING};
use log::warn;
use std::collections::TryReserveError;
use thiserror::Error;

/// Why the recorder could not be constructed.
#[derive(Debug, Error)]
pub enum InitError {
    /// `max_points == 0` or a non-positive accuracy: the feature is switched
    /// off by configuration rather than broken.
    #[error("path recording disabled by configuration")]
    Disabled,
    /// One of the fixed buffers could not be allocated.
    #[error("path buffer allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
}

/// Outcome of a [`PathRecorder::thorough_cleanup`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupProgress {
    /// Both engines had finished and their results were applied.
    Done,
    /// Still waiting for the background engines; call again.
    Pending,
}

/// Breadcrumb trail recorder with budgeted background cleanup.
///
/// See the crate docs for the full data-flow picture. The `sink` receives a
/// [`PathAction`] for every mutating step, in the order it happened.
#[derive(Debug)]
pub struct PathRecorder<S: ActionSink> {
    config: RecorderConfig,
    sink: S,
    active: bool,
    last_good_position_ms: u64,
    path: PathStore,
    simplify: SimplifyEngine,
    prune: LoopDetector,
}

impl<S: ActionSink> PathRecorder<S> {
    /// Allocate all fixed buffers and return an inactive recorder.
    ///
    /// `config.max_points` is clamped to [`POINTS_CEILING`]. Allocation
    /// failure is reported through both the returned error and a
    /// [`PathAction::DeactivatedInitFailed`] event on the sink, mirroring
    /// how later deactivations are reported.
    pub fn new(mut config: RecorderConfig, mut sink: S) -> Result<Self, InitError> {
        config.max_points = config.max_points.min(POINTS_CEILING);
        if config.max_points == 0 || config.accuracy <= 0.0 {
            return Err(InitError::Disabled);
        }

        let allocate = || -> Result<(PathStore, SimplifyEngine, LoopDetector), TryReserveError> {
            Ok((
                PathStore::with_capacity(config.max_points)?,
                SimplifyEngine::new(config.max_points)?,
                LoopDetector::new(config.max_points)?,
            ))
        };
        let (path, simplify, prune) = match allocate() {
            Ok(buffers) => buffers,
            Err(e) => {
                sink.record(PathAction::DeactivatedInitFailed);
                warn!("path recorder init failed: {e}");
                return Err(e.into());
            }
        };

        Ok(Self {
            config,
            sink,
            active: false,
            last_good_position_ms: 0,
            path,
            simplify,
            prune,
        })
    }

    /// Whether the recorder is usable. Callers must check this before
    /// trusting any path output.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of points currently on the path.
    #[inline]
    pub fn num_points(&self) -> usize {
        self.path.len()
    }

    /// Borrow a point on the path.
    #[inline]
    pub fn get_point(&self, index: usize) -> Option<&Point3> {
        self.path.get(index)
    }

    /// Remove and return the next waypoint on the way home: the most
    /// recently added point, walking backward toward the anchor. Returns
    /// `None` when inactive or the path has been fully consumed.
    pub fn pop_point(&mut self) -> Option<Point3> {
        if !self.active {
            return None;
        }
        self.path.pop()
    }

    /// Clear the path and seed the anchor. Call as part of the arming
    /// procedure. With `position == None` the recorder deactivates: a
    /// vehicle that takes off from an unknown origin has no path home, and
    /// the recorder never re-activates itself mid-flight.
    pub fn reset_path(&mut self, now_ms: u64, position: Option<Point3>) {
        self.simplify.reset();
        self.prune.reset();
        self.path.clear();

        match position {
            Some(anchor) => {
                self.path.reset(anchor);
                self.last_good_position_ms = now_ms;
                self.active = true;
            }
            None => {
                self.active = false;
                self.sink.record(PathAction::DeactivatedBadPosition);
                warn!("path recorder deactivated: no position at arming");
            }
        }
    }

    /// Per-tick update: feed the current position sample, or `None` when the
    /// estimator has no valid fix. Call a couple of times per second
    /// regardless of vehicle mode. No-op once deactivated.
    pub fn update(&mut self, now_ms: u64, position: Option<Point3>) {
        if !self.active {
            return;
        }

        let current = match position {
            Some(p) => {
                self.last_good_position_ms = now_ms;
                p
            }
            None => {
                if now_ms.saturating_sub(self.last_good_position_ms)
                    > self.config.bad_position_timeout_ms
                {
                    self.deactivate(PathAction::DeactivatedBadPosition, "position lost");
                }
                return;
            }
        };

        // fully consumed by pop_point: nothing left to retrace from here
        if self.path.is_empty() {
            return;
        }

        // cleanup runs before the append: appending restarts the engines, so
        // cleanup must act on results computed for the path as it stands
        if !self.routine_cleanup() {
            self.deactivate(
                PathAction::DeactivatedCleanupFailed,
                "path cleanup cannot keep up",
            );
            return;
        }

        let last = self.path.points()[self.path.last_index()];
        if (current - last).norm() > self.config.accuracy {
            if !self.path.append(current) {
                // only reachable with a start margin of zero
                self.deactivate(PathAction::DeactivatedCleanupFailed, "path full");
                return;
            }
            self.sink.record(PathAction::PointAdded(current));

            // a completed engine is idle; wake it up for the new tail
            if self.simplify.is_complete() {
                self.simplify.restart();
            }
            if self.prune.is_complete() {
                self.prune.restart();
            }
        }
    }

    /// Run the background simplification for one time budget. Safe to call
    /// from a different task than [`PathRecorder::update`] as long as the
    /// two never run concurrently (`&mut self` enforces that in Rust).
    pub fn detect_simplifications(&mut self) {
        if !self.active {
            return;
        }
        self.simplify.detect(
            &self.path,
            self.config.simplify_epsilon(),
            self.config.simplify_budget,
        );
    }

    /// Run the background loop detection for one time budget.
    pub fn detect_loops(&mut self) {
        if !self.active {
            return;
        }
        self.prune
            .detect(&self.path, self.config.prune_delta(), self.config.prune_budget);
    }

    /// Apply every available cleanup result unconditionally: full
    /// simplification marking, every recorded loop, one compaction.
    ///
    /// Returns [`CleanupProgress::Pending`] without side effects until both
    /// background engines report completion, so call it repeatedly (while
    /// keeping the detect calls running) until it returns
    /// [`CleanupProgress::Done`], then start popping waypoints.
    pub fn thorough_cleanup(&mut self) -> CleanupProgress {
        if !self.active {
            return CleanupProgress::Pending;
        }
        if !self.simplify.is_complete() || !self.prune.is_complete() {
            return CleanupProgress::Pending;
        }

        self.apply_simplification();
        self.apply_loops(usize::MAX);
        self.finish_cleanup();
        CleanupProgress::Done
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn deactivate(&mut self, action: PathAction, reason: &str) {
        self.active = false;
        self.sink.record(action);
        warn!("path recorder deactivated: {reason}");
    }

    /// Routine cleanup, run once per update tick. A no-op until free
    /// capacity falls below the start margin. Once engaged, applies whichever
    /// available result first reaches the minimum removal count, preferring
    /// simplification (cheaper to apply), then loops, then both combined.
    /// Returns `false` when nothing can free enough capacity, which the
    /// caller treats as fatal.
    fn routine_cleanup(&mut self) -> bool {
        let threshold = self
            .path
            .capacity()
            .saturating_sub(self.config.cleanup_start_margin);
        if self.path.last_index() < threshold {
            return true;
        }

        let to_simplify = self.simplify.discard_count(self.path.last_index());
        let to_prune = self.prune.removable_count();
        let minimum = self.config.cleanup_point_min;

        if to_simplify >= minimum {
            self.apply_simplification();
        } else if to_prune >= minimum {
            self.apply_loops(minimum);
        } else if to_simplify + to_prune >= minimum {
            self.apply_simplification();
            self.apply_loops(minimum);
        } else {
            return false;
        }

        self.finish_cleanup();
        true
    }

    /// Zero every slot the simplification marking classified discardable.
    fn apply_simplification(&mut self) {
        for i in 1..=self.path.last_index() {
            if !self.simplify.keeps(i) && !self.path.is_zeroed(i) {
                self.sink
                    .record(PathAction::PointSimplified(self.path.points()[i]));
                self.path.zero(i);
            }
        }
    }

    /// Zero the interiors of recorded loops, writing each loop's midpoint
    /// into the slot closest to the middle of its range, until at least
    /// `points_to_delete` slots have been freed (not necessarily every
    /// loop).
    fn apply_loops(&mut self, points_to_delete: usize) {
        let mut removed = 0;
        for l in self.prune.loops() {
            for j in l.start..l.end {
                if !self.path.is_zeroed(j) {
                    self.sink.record(PathAction::PointPruned(self.path.points()[j]));
                    self.path.zero(j);
                }
            }
            self.path.set((l.start + l.end) / 2, l.midpoint);
            removed += l.removable();
            if removed >= points_to_delete {
                return;
            }
        }
    }

    /// Physically remove the zeroed slots and invalidate both engines:
    /// indices have shifted, every result must be recomputed.
    fn finish_cleanup(&mut self) {
        self.path.compact();
        self.simplify.reset();
        self.prune.reset();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Sink that records every action for inspection.
    #[derive(Debug, Default)]
    struct VecSink {
        actions: Vec<PathAction>,
    }

    impl ActionSink for VecSink {
        fn record(&mut self, action: PathAction) {
            self.actions.push(action);
        }
    }

    fn p(x: f32, y: f32) -> Point3 {
        Point3::new(x, y, 0.0)
    }

    fn test_config() -> RecorderConfig {
        RecorderConfig {
            // wide budgets so tests cannot be flaky on a slow machine
            simplify_budget: Duration::from_secs(10),
            prune_budget: Duration::from_secs(10),
            ..RecorderConfig::default()
        }
    }

    fn armed(config: RecorderConfig) -> PathRecorder<VecSink> {
        let mut recorder = PathRecorder::new(config, VecSink::default()).unwrap();
        recorder.reset_path(0, Some(p(0.0, 0.0)));
        assert!(recorder.is_active());
        recorder
    }

    fn run_engines(recorder: &mut PathRecorder<VecSink>) {
        while !(recorder.simplify.is_complete() && recorder.prune.is_complete()) {
            recorder.detect_simplifications();
            recorder.detect_loops();
        }
    }

    #[test]
    fn test_disabled_config_rejected() {
        let disabled = RecorderConfig {
            max_points: 0,
            ..RecorderConfig::default()
        };
        assert!(matches!(
            PathRecorder::new(disabled, VecSink::default()),
            Err(InitError::Disabled)
        ));

        let no_accuracy = RecorderConfig {
            accuracy: 0.0,
            ..RecorderConfig::default()
        };
        assert!(matches!(
            PathRecorder::new(no_accuracy, VecSink::default()),
            Err(InitError::Disabled)
        ));
    }

    #[test]
    fn test_max_points_clamped_to_ceiling() {
        let oversized = RecorderConfig {
            max_points: 100_000,
            ..RecorderConfig::default()
        };
        let recorder = PathRecorder::new(oversized, VecSink::default()).unwrap();
        assert_eq!(recorder.path.capacity(), POINTS_CEILING);
    }

    #[test]
    fn test_arming_without_position_stays_inactive() {
        let mut recorder = PathRecorder::new(test_config(), VecSink::default()).unwrap();
        recorder.reset_path(0, None);
        assert!(!recorder.is_active());
        assert_eq!(
            recorder.sink.actions,
            vec![PathAction::DeactivatedBadPosition]
        );

        // it never self-activates later, even with a good position
        recorder.update(100, Some(p(1.0, 0.0)));
        assert!(!recorder.is_active());
        assert_eq!(recorder.num_points(), 0);
    }

    #[test]
    fn test_append_respects_minimum_spacing() {
        let mut recorder = armed(test_config());
        recorder.update(100, Some(p(1.0, 0.0))); // only 1m from anchor
        assert_eq!(recorder.num_points(), 1);
        recorder.update(200, Some(p(3.0, 0.0))); // 3m, appended
        assert_eq!(recorder.num_points(), 2);
        assert_eq!(
            recorder.sink.actions,
            vec![PathAction::PointAdded(p(3.0, 0.0))]
        );
    }

    #[test]
    fn test_append_pop_round_trip() {
        let mut recorder = armed(test_config());
        let points: Vec<Point3> = (1..=10).map(|i| p(i as f32 * 3.0, 0.0)).collect();
        for (tick, point) in points.iter().enumerate() {
            recorder.update(tick as u64 * 400, Some(*point));
        }
        assert_eq!(recorder.num_points(), 11);

        for expected in points.iter().rev() {
            assert_eq!(recorder.pop_point(), Some(*expected));
        }
        assert_eq!(recorder.pop_point(), Some(p(0.0, 0.0)), "anchor pops last");
        assert_eq!(recorder.pop_point(), None);
    }

    #[test]
    fn test_bad_position_timeout_deactivates() {
        let mut recorder = armed(test_config());
        recorder.update(400, Some(p(5.0, 0.0)));

        // invalid feed, but still within the 15s timeout
        recorder.update(10_000, None);
        assert!(recorder.is_active());

        // past the timeout
        recorder.update(16_000, None);
        assert!(!recorder.is_active());
        assert!(recorder
            .sink
            .actions
            .contains(&PathAction::DeactivatedBadPosition));

        // subsequent updates are no-ops
        let before = recorder.num_points();
        recorder.update(17_000, Some(p(50.0, 0.0)));
        assert_eq!(recorder.num_points(), before);
        assert_eq!(recorder.pop_point(), None);
    }

    #[test]
    fn test_valid_position_refreshes_timeout() {
        let mut recorder = armed(test_config());
        recorder.update(14_000, Some(p(5.0, 0.0)));
        // the 15s of bad position is measured from the refresh, not arming
        recorder.update(16_000, None);
        assert!(recorder.is_active());
        recorder.update(29_000, None);
        assert!(recorder.is_active(), "exactly at the timeout, not past it");
        recorder.update(29_001, None);
        assert!(!recorder.is_active());
    }

    #[test]
    fn test_capacity_bounded_with_routine_cleanup() {
        // capacity 10, collinear flight: simplification keeps freeing slots
        let config = RecorderConfig {
            max_points: 10,
            cleanup_start_margin: 3,
            cleanup_point_min: 2,
            ..test_config()
        };
        let mut recorder = armed(config);
        for i in 1..=15 {
            recorder.update(i * 400, Some(p(i as f32 * 3.0, 0.0)));
            assert!(recorder.is_active(), "deactivated at point {i}");
            assert!(recorder.num_points() <= 10, "overflow at point {i}");
            assert_eq!(recorder.get_point(0), Some(&p(0.0, 0.0)), "anchor lost");
            run_engines(&mut recorder);
        }
        // compaction happened at least once
        assert!(recorder
            .sink
            .actions
            .iter()
            .any(|a| matches!(a, PathAction::PointSimplified(_))));
    }

    #[test]
    fn test_unshrinkable_path_fails_cleanup() {
        // margin >= capacity engages cleanup on every tick; nothing is
        // simplifiable or prunable yet, so the first engaged tick is fatal
        let config = RecorderConfig {
            max_points: 8,
            cleanup_start_margin: 8,
            cleanup_point_min: 10,
            ..test_config()
        };
        let mut recorder = armed(config);
        recorder.update(400, Some(p(3.0, 0.0)));
        assert!(!recorder.is_active());
        assert_eq!(
            recorder.sink.actions,
            vec![PathAction::DeactivatedCleanupFailed]
        );
    }

    #[test]
    fn test_cleanup_engages_only_below_start_margin() {
        // free slots equal to the margin are still fine; cleanup engages
        // once they drop below it
        let config = RecorderConfig {
            max_points: 10,
            cleanup_start_margin: 3,
            cleanup_point_min: 2,
            ..test_config()
        };
        let mut recorder = armed(config);
        // tall zigzag: nothing simplifiable and nothing prunable, so the
        // first engaged tick is fatal
        for i in 1..=7_u64 {
            let y = if i % 2 == 0 { 0.0 } else { 40.0 };
            recorder.update(i * 400, Some(p(i as f32 * 5.0, y)));
            run_engines(&mut recorder);
        }
        // eight points stored, three slots free: not engaged yet
        assert!(recorder.is_active());
        assert_eq!(recorder.num_points(), 8);

        recorder.update(8 * 400, Some(p(40.0, 0.0)));
        assert!(!recorder.is_active());
        assert_eq!(
            recorder.sink.actions.last(),
            Some(&PathAction::DeactivatedCleanupFailed)
        );
    }

    #[test]
    fn test_thorough_cleanup_waits_for_engines() {
        let mut recorder = armed(test_config());
        for i in 1..=6 {
            recorder.update(i * 400, Some(p(i as f32 * 3.0, 0.0)));
        }
        // engines restarted by the appends and never run since
        assert_eq!(recorder.thorough_cleanup(), CleanupProgress::Pending);
        assert_eq!(recorder.num_points(), 7, "pending must have no side effects");

        run_engines(&mut recorder);
        assert_eq!(recorder.thorough_cleanup(), CleanupProgress::Done);
        // collinear flight collapses to anchor + endpoint
        assert_eq!(recorder.num_points(), 2);
        assert_eq!(recorder.get_point(0), Some(&p(0.0, 0.0)));
        assert_eq!(recorder.get_point(1), Some(&p(18.0, 0.0)));
    }

    #[test]
    fn test_thorough_cleanup_prunes_out_and_back() {
        let mut recorder = armed(test_config());
        // out 100m, wide excursion, back along nearly the same corridor
        let track = [
            p(50.0, 0.1),
            p(100.0, 0.0),
            p(100.0, 30.0),
            p(50.0, 30.0),
            p(50.0, 0.3),
            p(0.0, 0.5),
        ];
        for (i, point) in track.iter().enumerate() {
            recorder.update((i as u64 + 1) * 400, Some(*point));
        }
        assert_eq!(recorder.num_points(), 7);

        run_engines(&mut recorder);
        assert_eq!(recorder.thorough_cleanup(), CleanupProgress::Done);

        // the excursion between the close passes is gone
        assert!(recorder.num_points() < 7);
        assert!(recorder
            .sink
            .actions
            .iter()
            .any(|a| matches!(a, PathAction::PointPruned(_))));
        // the replacement midpoint sits in the x=50 corridor
        let has_midpoint = (0..recorder.num_points()).any(|i| {
            let q = recorder.get_point(i).unwrap();
            (q.x - 50.0).abs() < 2.0 && q.y.abs() < 2.0
        });
        assert!(has_midpoint, "pruned loop midpoint missing");
        // anchor untouched
        assert_eq!(recorder.get_point(0), Some(&p(0.0, 0.0)));
    }

    #[test]
    fn test_thorough_cleanup_inactive_is_pending() {
        let mut recorder = PathRecorder::new(test_config(), VecSink::default()).unwrap();
        recorder.reset_path(0, None);
        assert_eq!(recorder.thorough_cleanup(), CleanupProgress::Pending);
    }

    #[test]
    fn test_rearm_after_deactivation() {
        let mut recorder = armed(test_config());
        recorder.update(16_000, None);
        assert!(!recorder.is_active());

        // an explicit re-arm with a fix gives a fresh attempt
        recorder.reset_path(20_000, Some(p(1.0, 1.0)));
        assert!(recorder.is_active());
        assert_eq!(recorder.num_points(), 1);
        assert_eq!(recorder.get_point(0), Some(&p(1.0, 1.0)));
    }

    #[test]
    fn test_update_after_full_consumption_is_noop() {
        let mut recorder = armed(test_config());
        recorder.update(400, Some(p(5.0, 0.0)));
        while recorder.pop_point().is_some() {}
        recorder.update(800, Some(p(10.0, 0.0)));
        assert_eq!(recorder.num_points(), 0);
        assert!(recorder.is_active());
    }

    #[test]
    fn test_convoluted_flight_stays_bounded() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        // a long random-walk flight against a small buffer: the recorder
        // must either keep the path inside capacity or deactivate cleanly,
        // never corrupt the anchor or exceed the buffer
        let config = RecorderConfig {
            max_points: 32,
            cleanup_start_margin: 6,
            cleanup_point_min: 3,
            ..test_config()
        };
        let mut recorder = armed(config);
        let mut rng = StdRng::seed_from_u64(42);
        let mut pos = p(0.0, 0.0);
        for tick in 1..400_u64 {
            pos += Point3::new(rng.gen_range(-4.0..6.0), rng.gen_range(-5.0..5.0), 0.0);
            recorder.update(tick * 400, Some(pos));
            if !recorder.is_active() {
                break;
            }
            assert!(recorder.num_points() <= 32);
            assert_eq!(recorder.get_point(0), Some(&p(0.0, 0.0)));
            recorder.detect_simplifications();
            recorder.detect_loops();
        }
    }
}
