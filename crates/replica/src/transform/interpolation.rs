use glam::{Quat, Vec3};

use crate::object::Pose;

use super::config::TransformConfig;
use super::snapshot::{SnapshotHistory, TransformSnapshot};

const MIN_DELTA_TIME: f64 = 0.001;

/// Pose the history says the object should have at `now`, before smoothing.
/// `None` means hold the current pose this frame.
pub fn sample(history: &SnapshotHistory, config: &TransformConfig, now: f64) -> Option<Pose> {
    if config.interpolate {
        return sample_at(
            history,
            now - config.interpolation_interval,
            config.extrapolate.then_some(config.extrapolation_interval),
        );
    }

    if config.extrapolate {
        if let Some((left, right)) = history.newest_pair() {
            let horizon = now + config.extrapolation_interval - right.timestamp;
            return Some(extrapolate(left, right, horizon));
        }
    }

    history.newest().map(TransformSnapshot::pose)
}

/// Playback at `target_time`. With `extrapolation` set, the bracketing pair
/// is projected that many seconds past the target instead of blended.
pub fn sample_at(
    history: &SnapshotHistory,
    target_time: f64,
    extrapolation: Option<f64>,
) -> Option<Pose> {
    match history.bracket(target_time) {
        (None, _) => None,
        (Some(left), None) => Some(left.pose()),
        (Some(left), Some(right)) => Some(match extrapolation {
            Some(interval) => {
                extrapolate(left, right, target_time + interval - right.timestamp)
            }
            None => interpolate(left, right, target_time),
        }),
    }
}

pub fn interpolate(left: &TransformSnapshot, right: &TransformSnapshot, time: f64) -> Pose {
    let span = right.timestamp - left.timestamp;
    let t = if span > 0.0 {
        ((time - left.timestamp) / span).clamp(0.0, 1.0) as f32
    } else {
        1.0
    };
    Pose {
        position: left.position.lerp(right.position, t),
        rotation: left.rotation.slerp(right.rotation, t),
        scale: left.scale.lerp(right.scale, t),
        linear_velocity: left.linear_velocity.lerp(right.linear_velocity, t),
        angular_velocity: left.angular_velocity.lerp(right.angular_velocity, t),
    }
}

/// Linear projection `seconds` past `right`, using the left/right pair as the
/// rate estimate.
pub fn extrapolate(left: &TransformSnapshot, right: &TransformSnapshot, seconds: f64) -> Pose {
    let delta_time = (right.timestamp - left.timestamp).max(MIN_DELTA_TIME);
    let factor = (seconds / delta_time) as f32;
    let project = |a: Vec3, b: Vec3| b + (b - a) * factor;
    Pose {
        position: project(left.position, right.position),
        rotation: left.rotation.slerp(right.rotation, 1.0 + factor).normalize(),
        scale: project(left.scale, right.scale),
        linear_velocity: project(left.linear_velocity, right.linear_velocity),
        angular_velocity: project(left.angular_velocity, right.angular_velocity),
    }
}

/// Moves `current` toward `target` at the configured maximum speeds, snapping
/// any channel whose error exceeds its snap threshold.
pub fn smooth_toward(current: &Pose, target: &Pose, config: &TransformConfig, dt: f32) -> Pose {
    let position = if current.position.distance(target.position) > config.snap_distance {
        target.position
    } else {
        move_toward(current.position, target.position, step(config.max_move_speed, dt))
    };

    let angle = current.rotation.angle_between(target.rotation).to_degrees();
    let rotation = if angle > config.snap_angle {
        target.rotation
    } else {
        rotate_toward(
            current.rotation,
            target.rotation,
            step(config.max_rotate_speed, dt).to_radians(),
        )
    };

    let scale = if current.scale.distance(target.scale) > config.snap_scale {
        target.scale
    } else {
        move_toward(current.scale, target.scale, step(config.max_scale_speed, dt))
    };

    Pose {
        position,
        rotation,
        scale,
        linear_velocity: target.linear_velocity,
        angular_velocity: target.angular_velocity,
    }
}

/// Largest change allowed this frame. An infinite speed is unlimited even for
/// an empty frame.
fn step(speed: f32, dt: f32) -> f32 {
    if speed.is_infinite() {
        f32::INFINITY
    } else {
        speed * dt.max(0.0)
    }
}

pub fn move_toward(current: Vec3, target: Vec3, max_delta: f32) -> Vec3 {
    let offset = target - current;
    let distance = offset.length();
    if distance <= max_delta || distance == 0.0 || !distance.is_finite() {
        target
    } else {
        current + offset / distance * max_delta
    }
}

/// `max_angle` in radians.
pub fn rotate_toward(current: Quat, target: Quat, max_angle: f32) -> Quat {
    let angle = current.angle_between(target);
    if angle <= max_angle || angle == 0.0 || !angle.is_finite() {
        target
    } else {
        current.slerp(target, max_angle / angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(timestamp: f64, x: f32) -> TransformSnapshot {
        TransformSnapshot::new(0, timestamp, &Pose::at(Vec3::new(x, 0.0, 0.0)))
    }

    fn history(points: &[(f64, f32)]) -> SnapshotHistory {
        let mut history = SnapshotHistory::new();
        for &(timestamp, x) in points {
            history.push(snapshot(timestamp, x));
        }
        history
    }

    #[test]
    fn midpoint_interpolation_is_exact() {
        let history = history(&[(0.0, 0.0), (0.1, 10.0)]);
        let pose = sample_at(&history, 0.05, None).unwrap();
        assert_eq!(pose.position, Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn interpolation_through_config_delay() {
        let history = history(&[(0.0, 0.0), (0.1, 10.0)]);
        let config = TransformConfig::default();
        let pose = sample(&history, &config, 0.15).unwrap();
        assert!((pose.position.x - 5.0).abs() < 1e-4);
    }

    #[test]
    fn holds_when_all_snapshots_are_newer() {
        let history = history(&[(1.0, 0.0), (1.1, 10.0)]);
        let config = TransformConfig::default();
        assert!(sample(&history, &config, 1.05).is_none());
    }

    #[test]
    fn left_only_is_used_verbatim() {
        let history = history(&[(0.0, 0.0), (0.1, 10.0)]);
        let pose = sample_at(&history, 0.5, None).unwrap();
        assert_eq!(pose.position.x, 10.0);
    }

    #[test]
    fn t_is_clamped() {
        let left = snapshot(0.0, 0.0);
        let right = snapshot(0.1, 10.0);
        assert_eq!(interpolate(&left, &right, -1.0).position.x, 0.0);
        assert_eq!(interpolate(&left, &right, 1.0).position.x, 10.0);
    }

    #[test]
    fn extrapolation_projects_linearly() {
        let left = snapshot(0.0, 0.0);
        let right = snapshot(0.1, 10.0);
        let pose = extrapolate(&left, &right, 0.05);
        assert!((pose.position.x - 15.0).abs() < 1e-4);
    }

    #[test]
    fn extrapolation_floors_delta_time() {
        let left = snapshot(0.5, 0.0);
        let right = snapshot(0.5, 1.0);
        let pose = extrapolate(&left, &right, 0.001);
        assert!(pose.position.is_finite());
        assert!((pose.position.x - 2.0).abs() < 1e-4);
    }

    #[test]
    fn rotation_extrapolates_past_right() {
        let mut left = snapshot(0.0, 0.0);
        let mut right = snapshot(0.1, 0.0);
        left.rotation = Quat::IDENTITY;
        right.rotation = Quat::from_rotation_y(0.2);
        let pose = extrapolate(&left, &right, 0.1);
        let expected = Quat::from_rotation_y(0.4);
        assert!(pose.rotation.angle_between(expected) < 1e-2);
    }

    #[test]
    fn extrapolates_from_target_time_when_enabled() {
        let history = history(&[(0.0, 0.0), (0.1, 10.0), (0.2, 20.0)]);
        // target 0.15, bracket (0.1, 0.2), project to 0.2
        let pose = sample_at(&history, 0.15, Some(0.05)).unwrap();
        assert!((pose.position.x - 20.0).abs() < 1e-3);
    }

    #[test]
    fn extrapolation_without_interpolation() {
        let history = history(&[(0.0, 0.0), (0.1, 10.0)]);
        let config = TransformConfig {
            interpolate: false,
            extrapolate: true,
            ..Default::default()
        };
        // now 0.1 + 0.05 ahead of the newest snapshot
        let pose = sample(&history, &config, 0.1).unwrap();
        assert!((pose.position.x - 15.0).abs() < 1e-3);
    }

    #[test]
    fn newest_verbatim_when_both_disabled() {
        let history = history(&[(0.2, 2.0), (0.1, 1.0)]);
        let config = TransformConfig {
            interpolate: false,
            ..Default::default()
        };
        assert_eq!(sample(&history, &config, 5.0).unwrap().position.x, 2.0);
    }

    #[test]
    fn smoothing_limits_speed() {
        let config = TransformConfig {
            max_move_speed: 2.0,
            ..Default::default()
        };
        let current = Pose::default();
        let target = Pose::at(Vec3::new(10.0, 0.0, 0.0));
        let pose = smooth_toward(&current, &target, &config, 0.5);
        assert!((pose.position.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn smoothing_snaps_past_threshold() {
        let config = TransformConfig {
            max_move_speed: 2.0,
            snap_distance: 5.0,
            ..Default::default()
        };
        let current = Pose::default();
        let target = Pose::at(Vec3::new(10.0, 0.0, 0.0));
        let pose = smooth_toward(&current, &target, &config, 0.5);
        assert_eq!(pose.position.x, 10.0);
    }

    #[test]
    fn unlimited_defaults_reach_target() {
        let config = TransformConfig::default();
        let current = Pose::default();
        let mut target = Pose::at(Vec3::new(3.0, 1.0, 0.0));
        target.rotation = Quat::from_rotation_z(1.0);
        let pose = smooth_toward(&current, &target, &config, 0.016);
        assert_eq!(pose.position, target.position);
        assert_eq!(pose.rotation, target.rotation);
    }

    #[test]
    fn empty_frame_with_unlimited_speed_reaches_target() {
        let config = TransformConfig::default();
        let current = Pose::at(Vec3::splat(0.5));
        let mut target = Pose::at(Vec3::new(1.0, 2.0, 3.0));
        target.rotation = Quat::from_rotation_y(1.0);
        let pose = smooth_toward(&current, &target, &config, 0.0);
        assert_eq!(pose.position, target.position);
        assert_eq!(pose.rotation, target.rotation);
        assert!(pose.scale.is_finite());
    }

    #[test]
    fn empty_frame_with_limited_speed_holds() {
        let config = TransformConfig {
            max_move_speed: 2.0,
            max_rotate_speed: 90.0,
            ..Default::default()
        };
        let current = Pose::default();
        let mut target = Pose::at(Vec3::new(1.0, 0.0, 0.0));
        target.rotation = Quat::from_rotation_y(0.5);
        let pose = smooth_toward(&current, &target, &config, 0.0);
        assert_eq!(pose.position, current.position);
        assert!(pose.rotation.angle_between(current.rotation) < 1e-5);
    }

    #[test]
    fn non_finite_current_recovers() {
        let config = TransformConfig {
            max_move_speed: 2.0,
            ..Default::default()
        };
        let current = Pose::at(Vec3::splat(f32::NAN));
        let target = Pose::at(Vec3::ONE);
        let pose = smooth_toward(&current, &target, &config, 0.016);
        assert_eq!(pose.position, target.position);
    }
}
