//! # Trailback
//!
//! Bounded-memory flight path recording with anytime simplification and loop
//! pruning, for retracing a traveled path home when normal navigation is
//! unavailable.
//!
//! During flight the vehicle's position is sampled into a fixed-capacity
//! breadcrumb trail. Because the trail lives in a small, never-reallocated
//! buffer on the flight controller, two cooperative background algorithms
//! continuously shrink it without discarding its geometric essence:
//!
//! - **Simplification** ([`SimplifyEngine`]): Ramer-Douglas-Peucker marks
//!   points that lie within a tolerance of straight segments as discardable.
//! - **Loop pruning** ([`LoopDetector`]): closest-distance-between-segments
//!   geometry finds places where the path doubles back on itself, so the
//!   whole loop can collapse to a single point.
//!
//! Both are *anytime* algorithms: they run for a fixed time budget per call,
//! save their state, and resume later, so they fit a low-priority periodic
//! task. Neither mutates the path; only the [`PathRecorder`] orchestrator
//! applies their results, compacting the trail when memory runs low and,
//! thoroughly, just before a return is initiated.
//!
//! ## Quick Start
//!
//! ```rust
//! use trailback::{PathRecorder, RecorderConfig, LogSink, Point3, CleanupProgress};
//!
//! let mut recorder = PathRecorder::new(RecorderConfig::default(), LogSink).unwrap();
//!
//! // arm with a valid position fix: seeds the anchor point
//! recorder.reset_path(0, Some(Point3::new(0.0, 0.0, 0.0)));
//! assert!(recorder.is_active());
//!
//! // per-tick updates while flying
//! recorder.update(400, Some(Point3::new(5.0, 0.0, -2.0)));
//! recorder.update(800, Some(Point3::new(10.0, 0.0, -4.0)));
//!
//! // background task, a few times per second
//! recorder.detect_simplifications();
//! recorder.detect_loops();
//!
//! // before returning home: wait for a thorough cleanup, then pop waypoints
//! while recorder.thorough_cleanup() == CleanupProgress::Pending {
//!     recorder.detect_simplifications();
//!     recorder.detect_loops();
//! }
//! while let Some(waypoint) = recorder.pop_point() {
//!     println!("fly to {waypoint:?}");
//! }
//! ```
//!
//! ## Features
//!
//! - **`serde`** - serde derives on [`RecorderConfig`] and [`PathAction`]

use std::time::Duration;

pub mod geometry;
pub mod path;
pub mod prune;
pub mod recorder;
pub mod simplify;

pub use geometry::SegmentDistance;
pub use path::PathStore;
pub use prune::{LoopDetector, PrunableLoop};
pub use recorder::{CleanupProgress, InitError, PathRecorder};
pub use simplify::SimplifyEngine;

/// A 3D position in meters (NED offsets from the arming origin).
pub type Point3 = nalgebra::Vector3<f32>;

// ============================================================================
// Configuration
// ============================================================================

/// Absolute ceiling on the number of stored path points. [`RecorderConfig`]
/// values above this are clamped at init.
pub const POINTS_CEILING: usize = 500;

/// Configuration for the path recorder.
///
/// All values arrive here already resolved; parameter storage and loading
/// live outside this crate.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecorderConfig {
    /// Minimum spacing between recorded points, in meters. A new sample is
    /// appended only once the vehicle has moved at least this far from the
    /// last breadcrumb. Default: 2.0
    pub accuracy: f32,

    /// Maximum number of stored path points, clamped to [`POINTS_CEILING`].
    /// Higher numbers improve pruning but cost memory and cleanup CPU.
    /// Zero disables the recorder entirely. Default: 150
    pub max_points: usize,

    /// Simplification tolerance as a fraction of `accuracy`: points closer
    /// than `accuracy * simplify_epsilon_ratio` to a chord are discardable.
    /// Default: 0.5
    pub simplify_epsilon_ratio: f32,

    /// Pruning threshold as a fraction of `accuracy`. Two segments passing
    /// within `accuracy * prune_delta_ratio` of each other close a prunable
    /// loop. Must stay below 1.0 so pruning cannot remove genuine
    /// obstacle-relevant detail between points. Default: 0.99
    pub prune_delta_ratio: f32,

    /// Time budget for one [`PathRecorder::detect_simplifications`] call.
    /// Default: 200µs
    pub simplify_budget: Duration,

    /// Time budget for one [`PathRecorder::detect_loops`] call (checked only
    /// at the outer-loop boundary, so calls may overrun slightly).
    /// Default: 300µs
    pub prune_budget: Duration,

    /// Milliseconds without a valid position before the recorder deactivates
    /// for the remainder of the flight. Default: 15000
    pub bad_position_timeout_ms: u64,

    /// Routine cleanup engages once this few free path slots remain.
    /// Default: 10
    pub cleanup_start_margin: usize,

    /// Routine cleanup only applies a result expected to remove at least
    /// this many points. Default: 10
    pub cleanup_point_min: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            accuracy: 2.0,
            max_points: 150,
            simplify_epsilon_ratio: 0.5,
            prune_delta_ratio: 0.99,
            simplify_budget: Duration::from_micros(200),
            prune_budget: Duration::from_micros(300),
            bad_position_timeout_ms: 15_000,
            cleanup_start_margin: 10,
            cleanup_point_min: 10,
        }
    }
}

impl RecorderConfig {
    /// Simplification epsilon in meters.
    #[inline]
    pub fn simplify_epsilon(&self) -> f32 {
        self.accuracy * self.simplify_epsilon_ratio
    }

    /// Loop-pruning distance threshold in meters.
    #[inline]
    pub fn prune_delta(&self) -> f32 {
        self.accuracy * self.prune_delta_ratio
    }
}

// ============================================================================
// Telemetry Actions
// ============================================================================

/// A discrete mutating action taken by the recorder, reported to the
/// external logging collaborator through an [`ActionSink`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PathAction {
    /// A breadcrumb was appended.
    PointAdded(Point3),
    /// A point was removed by loop pruning.
    PointPruned(Point3),
    /// A point was removed by simplification.
    PointSimplified(Point3),
    /// Buffer allocation failed at init; the recorder never became active.
    DeactivatedInitFailed,
    /// No valid position at arming, or none for too long in flight.
    DeactivatedBadPosition,
    /// Routine cleanup could not free capacity fast enough.
    DeactivatedCleanupFailed,
}

/// Receiver for [`PathAction`] events.
///
/// Storage and transport are out of scope here: flight code hands in a sink
/// that writes to the onboard log, tests hand in a recording sink. The sink
/// is injected at construction, there is no global logging state.
pub trait ActionSink {
    fn record(&mut self, action: PathAction);
}

/// Default sink that forwards every action to the [`log`] facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ActionSink for LogSink {
    fn record(&mut self, action: PathAction) {
        match action {
            PathAction::PointAdded(p) => log::debug!("point added: {p:?}"),
            PathAction::PointPruned(p) => log::debug!("point pruned: {p:?}"),
            PathAction::PointSimplified(p) => log::debug!("point simplified: {p:?}"),
            other => log::warn!("recorder deactivated: {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = RecorderConfig::default();
        assert_eq!(config.simplify_epsilon(), 1.0);
        assert!(config.prune_delta() < config.accuracy);
        assert!((config.prune_delta() - 1.98).abs() < 1e-6);
    }

    #[test]
    fn test_thresholds_scale_with_accuracy() {
        let config = RecorderConfig {
            accuracy: 4.0,
            ..RecorderConfig::default()
        };
        assert_eq!(config.simplify_epsilon(), 2.0);
        assert_eq!(config.prune_delta(), 4.0 * 0.99);
    }
}
