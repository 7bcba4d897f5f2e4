use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::net::Channel;

bitflags! {
    /// Which axes the sender replicates. Bit layout matches the transform
    /// packet's presence flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SyncAxes: u16 {
        const POSITION_X = 1 << 0;
        const POSITION_Y = 1 << 1;
        const POSITION_Z = 1 << 2;
        const ROTATION_X = 1 << 3;
        const ROTATION_Y = 1 << 4;
        const ROTATION_Z = 1 << 5;
        const SCALE_X = 1 << 6;
        const SCALE_Y = 1 << 7;
        const SCALE_Z = 1 << 8;

        const POSITION = Self::POSITION_X.bits() | Self::POSITION_Y.bits() | Self::POSITION_Z.bits();
        const ROTATION = Self::ROTATION_X.bits() | Self::ROTATION_Y.bits() | Self::ROTATION_Z.bits();
        const SCALE = Self::SCALE_X.bits() | Self::SCALE_Y.bits() | Self::SCALE_Z.bits();
    }
}

impl Default for SyncAxes {
    fn default() -> Self {
        SyncAxes::all()
    }
}

impl SyncAxes {
    /// Flag for component `axis` (0..3) of the channel starting at `first`.
    pub fn axis(first: SyncAxes, axis: usize) -> SyncAxes {
        SyncAxes::from_bits_retain(first.bits() << axis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub sync: SyncAxes,
    pub channel: Channel,
    pub interpolate: bool,
    pub extrapolate: bool,
    /// Seconds of delay between receipt and playback.
    pub interpolation_interval: f64,
    /// Seconds projected past the playback time when extrapolating.
    pub extrapolation_interval: f64,
    /// Extra seconds of history kept beyond the playback window.
    pub snapshot_margin: f64,
    /// Units per second.
    pub max_move_speed: f32,
    /// Degrees per second.
    pub max_rotate_speed: f32,
    pub max_scale_speed: f32,
    pub snap_distance: f32,
    /// Degrees.
    pub snap_angle: f32,
    pub snap_scale: f32,
    pub epsilon: f32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            sync: SyncAxes::all(),
            channel: Channel::UnreliableUnordered,
            interpolate: true,
            extrapolate: false,
            interpolation_interval: 0.1,
            extrapolation_interval: 0.05,
            snapshot_margin: 0.5,
            max_move_speed: f32::INFINITY,
            max_rotate_speed: f32::INFINITY,
            max_scale_speed: f32::INFINITY,
            snap_distance: f32::INFINITY,
            snap_angle: f32::INFINITY,
            snap_scale: f32::INFINITY,
            epsilon: 0.001,
        }
    }
}

impl TransformConfig {
    /// Age beyond which a snapshot can no longer be sampled.
    pub fn history_horizon(&self) -> f64 {
        self.interpolation_interval + self.extrapolation_interval + self.snapshot_margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_flags_follow_channel_layout() {
        assert_eq!(SyncAxes::axis(SyncAxes::POSITION_X, 1), SyncAxes::POSITION_Y);
        assert_eq!(SyncAxes::axis(SyncAxes::SCALE_X, 2), SyncAxes::SCALE_Z);
        assert_eq!(SyncAxes::all().bits(), 0x1FF);
    }

    #[test]
    fn defaults() {
        let config = TransformConfig::default();
        assert_eq!(config.channel, Channel::UnreliableUnordered);
        assert!(config.interpolate && !config.extrapolate);
        assert!((config.history_horizon() - 0.65).abs() < 1e-9);
    }
}
