use glam::{Quat, Vec3};

use crate::object::Pose;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSnapshot {
    pub tick: u32,
    /// Local receipt time in seconds.
    pub timestamp: f64,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl TransformSnapshot {
    pub fn new(tick: u32, timestamp: f64, pose: &Pose) -> Self {
        Self {
            tick,
            timestamp,
            position: pose.position,
            rotation: pose.rotation,
            scale: pose.scale,
            linear_velocity: pose.linear_velocity,
            angular_velocity: pose.angular_velocity,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            rotation: self.rotation,
            scale: self.scale,
            linear_velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
        }
    }
}

/// Received snapshots in arrival order. Playback reads timestamps, never
/// list position.
#[derive(Debug, Default)]
pub struct SnapshotHistory {
    snapshots: Vec<TransformSnapshot>,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: TransformSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// Most recently received.
    pub fn latest(&self) -> Option<&TransformSnapshot> {
        self.snapshots.last()
    }

    /// Newest snapshot at or before `time`, and the earliest one after it.
    pub fn bracket(
        &self,
        time: f64,
    ) -> (Option<&TransformSnapshot>, Option<&TransformSnapshot>) {
        let left = self
            .snapshots
            .iter()
            .rev()
            .filter(|s| s.timestamp <= time)
            .fold(None::<&TransformSnapshot>, |best, s| match best {
                Some(b) if b.timestamp >= s.timestamp => Some(b),
                _ => Some(s),
            });
        let Some(left) = left else {
            return (None, None);
        };
        let right = self
            .snapshots
            .iter()
            .filter(|s| s.timestamp > left.timestamp)
            .fold(None::<&TransformSnapshot>, |best, s| match best {
                Some(b) if b.timestamp <= s.timestamp => Some(b),
                _ => Some(s),
            });
        (Some(left), right)
    }

    /// The two newest snapshots by timestamp, older first.
    pub fn newest_pair(&self) -> Option<(&TransformSnapshot, &TransformSnapshot)> {
        let mut sorted: Vec<&TransformSnapshot> = self.snapshots.iter().collect();
        sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        match sorted.as_slice() {
            [.., older, newer] => Some((*older, *newer)),
            _ => None,
        }
    }

    pub fn newest(&self) -> Option<&TransformSnapshot> {
        self.snapshots
            .iter()
            .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
    }

    /// Drops snapshots older than `now - horizon`, always keeping the two
    /// newest.
    pub fn evict(&mut self, now: f64, horizon: f64) {
        if self.snapshots.len() <= 2 {
            return;
        }
        let mut timestamps: Vec<f64> = self.snapshots.iter().map(|s| s.timestamp).collect();
        timestamps.sort_by(|a, b| b.total_cmp(a));
        let keep_from = timestamps[1].min(now - horizon);
        self.snapshots.retain(|s| s.timestamp >= keep_from);
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransformSnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
