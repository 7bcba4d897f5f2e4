mod config;
mod interpolation;
mod network_transform;
mod sender;
mod snapshot;

pub use config::{SyncAxes, TransformConfig};
pub use interpolation::{
    extrapolate, interpolate, move_toward, rotate_toward, sample, sample_at, smooth_toward,
};
pub use network_transform::NetworkTransform;
pub use sender::{DeltaEncoder, angle_delta};
pub use snapshot::{SnapshotHistory, TransformSnapshot};

use glam::{EulerRot, Quat, Vec3};

/// Euler angles in degrees (pitch, yaw, roll), yaw applied first.
pub fn euler_degrees(rotation: Quat) -> Vec3 {
    let (yaw, pitch, roll) = rotation.to_euler(EulerRot::YXZ);
    Vec3::new(pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees())
}

pub fn from_euler_degrees(euler: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        euler.y.to_radians(),
        euler.x.to_radians(),
        euler.z.to_radians(),
    )
}
