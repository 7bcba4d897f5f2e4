use glam::Vec3;

use crate::net::{ObjectId, TransformPacket};
use crate::object::Pose;

use super::config::TransformConfig;
use super::interpolation::{sample, smooth_toward};
use super::sender::DeltaEncoder;
use super::snapshot::{SnapshotHistory, TransformSnapshot};
use super::{euler_degrees, from_euler_degrees};

/// Per-object transform replication. The authoritative peer encodes deltas;
/// every other peer buffers snapshots and plays them back.
#[derive(Debug)]
pub struct NetworkTransform {
    config: TransformConfig,
    encoder: DeltaEncoder,
    history: SnapshotHistory,
    authoritative: bool,
}

impl NetworkTransform {
    pub fn new(config: TransformConfig) -> Self {
        Self {
            config,
            encoder: DeltaEncoder::new(),
            history: SnapshotHistory::new(),
            authoritative: false,
        }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut TransformConfig {
        &mut self.config
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Gaining authority restarts the delta stream from a full pose and drops
    /// buffered remote snapshots.
    pub fn set_authoritative(&mut self, authoritative: bool) {
        if authoritative && !self.authoritative {
            self.encoder.reset();
            self.history.clear();
        }
        self.authoritative = authoritative;
    }

    pub fn encode(&mut self, object_id: ObjectId, tick: u32, pose: &Pose) -> Option<TransformPacket> {
        self.encoder.encode(object_id, tick, pose, &self.config)
    }

    /// Completes the packet's omitted fields from the latest snapshot, or
    /// from `current` before any snapshot arrived, and records it.
    pub fn receive(&mut self, packet: &TransformPacket, now: f64, current: Option<Pose>) {
        let base = self
            .history
            .latest()
            .map(TransformSnapshot::pose)
            .or(current)
            .unwrap_or_default();

        let rotation = if packet.rotation.iter().any(Option::is_some) {
            from_euler_degrees(merge_axes(euler_degrees(base.rotation), &packet.rotation))
        } else {
            base.rotation
        };
        let pose = Pose {
            position: merge_axes(base.position, &packet.position),
            rotation,
            scale: merge_axes(base.scale, &packet.scale),
            linear_velocity: packet.linear_velocity.unwrap_or(Vec3::ZERO),
            angular_velocity: packet.angular_velocity.unwrap_or(Vec3::ZERO),
        };

        self.history
            .push(TransformSnapshot::new(packet.tick, now, &pose));
    }

    pub fn target(&self, now: f64) -> Option<Pose> {
        sample(&self.history, &self.config, now)
    }

    /// One playback frame: evicts stale snapshots, samples and smooths.
    pub fn update(&mut self, now: f64, dt: f32, current: &Pose) -> Option<Pose> {
        if self.authoritative {
            return None;
        }
        self.history.evict(now, self.config.history_horizon());
        let target = self.target(now)?;
        Some(smooth_toward(current, &target, &self.config, dt))
    }
}

fn merge_axes(mut base: Vec3, values: &[Option<f32>; 3]) -> Vec3 {
    for (axis, value) in values.iter().enumerate() {
        if let Some(value) = value {
            base[axis] = *value;
        }
    }
    base
}
