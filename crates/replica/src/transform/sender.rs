use glam::Vec3;

use crate::net::{ObjectId, TransformPacket};
use crate::object::Pose;

use super::config::{SyncAxes, TransformConfig};
use super::euler_degrees;

const AXES: usize = 9;

/// Field-level delta encoder: remembers the last value sent per axis and
/// emits only the axes that moved by more than the configured epsilon.
#[derive(Debug, Default)]
pub struct DeltaEncoder {
    last_sent: [Option<f32>; AXES],
}

impl DeltaEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget what was sent; the next packet carries every synced axis.
    pub fn reset(&mut self) {
        self.last_sent = [None; AXES];
    }

    pub fn encode(
        &mut self,
        object_id: ObjectId,
        tick: u32,
        pose: &Pose,
        config: &TransformConfig,
    ) -> Option<TransformPacket> {
        let mut packet = TransformPacket::new(object_id, tick);
        let euler = euler_degrees(pose.rotation);
        let channels = [
            (SyncAxes::POSITION_X, pose.position, &mut packet.position, false),
            (SyncAxes::ROTATION_X, euler, &mut packet.rotation, true),
            (SyncAxes::SCALE_X, pose.scale, &mut packet.scale, false),
        ];

        for (index, (first, value, out, angular)) in channels.into_iter().enumerate() {
            for axis in 0..3 {
                if !config.sync.contains(SyncAxes::axis(first, axis)) {
                    continue;
                }
                let slot = index * 3 + axis;
                let current = value[axis];
                let changed = match self.last_sent[slot] {
                    None => true,
                    Some(last) if angular => angle_delta(last, current) > config.epsilon,
                    Some(last) => (current - last).abs() > config.epsilon,
                };
                if changed {
                    out[axis] = Some(current);
                    self.last_sent[slot] = Some(current);
                }
            }
        }

        if pose.linear_velocity != Vec3::ZERO {
            packet.linear_velocity = Some(pose.linear_velocity);
        }
        if pose.angular_velocity != Vec3::ZERO {
            packet.angular_velocity = Some(pose.angular_velocity);
        }

        (!packet.is_empty()).then_some(packet)
    }
}

/// Shortest distance between two angles in degrees.
pub fn angle_delta(a: f32, b: f32) -> f32 {
    let d = (b - a).rem_euclid(360.0);
    d.min(360.0 - d)
}

#[cfg(test)]
mod tests {
    use glam::Quat;

    use super::*;

    #[test]
    fn first_packet_carries_every_synced_axis() {
        let mut encoder = DeltaEncoder::new();
        let config = TransformConfig::default();
        let packet = encoder.encode(1, 0, &Pose::default(), &config).unwrap();
        assert!(packet.position.iter().all(Option::is_some));
        assert!(packet.rotation.iter().all(Option::is_some));
        assert!(packet.scale.iter().all(Option::is_some));
        assert!(packet.linear_velocity.is_none());
    }

    #[test]
    fn unchanged_pose_emits_nothing() {
        let mut encoder = DeltaEncoder::new();
        let config = TransformConfig::default();
        let pose = Pose::at(Vec3::new(1.0, 2.0, 3.0));
        encoder.encode(1, 0, &pose, &config);

        let mut nudged = pose;
        nudged.position.x += 0.0005;
        assert!(encoder.encode(1, 1, &nudged, &config).is_none());
    }

    #[test]
    fn only_moved_axes_are_sent() {
        let mut encoder = DeltaEncoder::new();
        let config = TransformConfig::default();
        let mut pose = Pose::default();
        encoder.encode(1, 0, &pose, &config);

        pose.position.y = 4.0;
        let packet = encoder.encode(1, 1, &pose, &config).unwrap();
        assert_eq!(packet.position, [None, Some(4.0), None]);
        assert_eq!(packet.rotation, [None; 3]);
        assert_eq!(packet.scale, [None; 3]);
    }

    #[test]
    fn small_moves_accumulate_against_last_sent() {
        let mut encoder = DeltaEncoder::new();
        let config = TransformConfig::default();
        let mut pose = Pose::default();
        encoder.encode(1, 0, &pose, &config);

        pose.position.x = 0.0008;
        assert!(encoder.encode(1, 1, &pose, &config).is_none());
        pose.position.x = 0.0016;
        let packet = encoder.encode(1, 2, &pose, &config).unwrap();
        assert_eq!(packet.position[0], Some(0.0016));
    }

    #[test]
    fn disabled_axes_are_never_sent() {
        let mut encoder = DeltaEncoder::new();
        let config = TransformConfig {
            sync: SyncAxes::POSITION,
            ..Default::default()
        };
        let mut pose = Pose::default();
        pose.rotation = Quat::from_rotation_y(1.0);
        let packet = encoder.encode(1, 0, &pose, &config).unwrap();
        assert_eq!(packet.rotation, [None; 3]);
        assert_eq!(packet.scale, [None; 3]);
    }

    #[test]
    fn velocities_only_when_moving() {
        let mut encoder = DeltaEncoder::new();
        let config = TransformConfig::default();
        let mut pose = Pose::default();
        encoder.encode(1, 0, &pose, &config);

        pose.linear_velocity = Vec3::X;
        let packet = encoder.encode(1, 1, &pose, &config).unwrap();
        assert_eq!(packet.linear_velocity, Some(Vec3::X));
        assert!(packet.angular_velocity.is_none());
    }

    #[test]
    fn reset_resends_everything() {
        let mut encoder = DeltaEncoder::new();
        let config = TransformConfig::default();
        let pose = Pose::default();
        encoder.encode(1, 0, &pose, &config);
        encoder.reset();
        let packet = encoder.encode(1, 1, &pose, &config).unwrap();
        assert_eq!(packet.flags().bits(), 0x1FF);
    }

    #[test]
    fn angle_delta_wraps() {
        assert!((angle_delta(359.5, 0.5) - 1.0).abs() < 1e-4);
        assert!((angle_delta(10.0, 350.0) - 20.0).abs() < 1e-4);
    }
}
