//! Simulated flight through the recorder: zigzag outbound with a survey
//! loop, then a thorough cleanup and a pop of the full return path.
//!
//! Run with: cargo run --example flight_replay

use std::f32::consts::TAU;
use trailback::{CleanupProgress, LogSink, PathRecorder, Point3, RecorderConfig};

fn main() {
    env_logger::init();

    let config = RecorderConfig {
        max_points: 100,
        ..RecorderConfig::default()
    };
    let mut recorder = PathRecorder::new(config, LogSink).expect("allocation failed");

    // arm with a valid fix at the origin
    recorder.reset_path(0, Some(Point3::new(0.0, 0.0, 0.0)));

    // outbound: a slightly wavy 300m leg north
    let mut now_ms = 0;
    let mut fly = |recorder: &mut PathRecorder<LogSink>, pos: Point3| {
        now_ms += 400;
        recorder.update(now_ms, Some(pos));
        // the background task would normally run from a scheduler tick
        recorder.detect_simplifications();
        recorder.detect_loops();
    };

    for i in 1..=100 {
        let x = i as f32 * 3.0;
        let y = (i as f32 * 0.4).sin() * 1.5;
        fly(&mut recorder, Point3::new(x, y, -20.0));
    }

    // a survey loop at the far end, closing back on itself
    for i in 0..=40 {
        let angle = i as f32 / 40.0 * TAU;
        let x = 300.0 + 30.0 * angle.sin();
        let y = 30.0 - 30.0 * angle.cos();
        fly(&mut recorder, Point3::new(x, y, -20.0));
    }

    println!(
        "flight complete: {} points recorded (active: {})",
        recorder.num_points(),
        recorder.is_active()
    );

    // return initiated: wait for the thorough cleanup
    let mut waits = 0;
    while recorder.thorough_cleanup() == CleanupProgress::Pending {
        recorder.detect_simplifications();
        recorder.detect_loops();
        waits += 1;
    }
    println!(
        "thorough cleanup done after {} background ticks, {} points remain",
        waits,
        recorder.num_points()
    );

    // fly home by popping breadcrumbs back to the anchor
    let mut leg = 0;
    let mut previous: Option<Point3> = None;
    let mut total = 0.0;
    while let Some(waypoint) = recorder.pop_point() {
        leg += 1;
        if let Some(prev) = previous {
            total += (waypoint - prev).norm();
        }
        println!(
            "  waypoint {:>2}: ({:>7.1}, {:>6.1}, {:>6.1})",
            leg, waypoint.x, waypoint.y, waypoint.z
        );
        previous = Some(waypoint);
    }
    println!("return path: {leg} waypoints, {total:.0}m");
}
