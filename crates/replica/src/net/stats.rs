use serde::{Deserialize, Serialize};

use super::channel::Channel;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    /// Percentage in `0..=100` of unreliable packets to drop.
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        Self {
            enabled: loss_percent > 0.0,
            loss_percent: loss_percent.clamp(0.0, 100.0),
        }
    }

    pub fn should_drop(&self, channel: Channel) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 || channel.is_reliable() {
            return false;
        }
        rand::random::<f32>() * 100.0 < self.loss_percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_dropped(&mut self) {
        self.packets_dropped += 1;
    }

    pub fn loss_percent(&self) -> f32 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_dropped as f32 / self.packets_sent as f32 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliable_channels_never_drop() {
        let sim = PacketLossSimulation::new(100.0);
        assert!(!sim.should_drop(Channel::ReliableOrdered));
        assert!(!sim.should_drop(Channel::ReliableUnordered));
        assert!(sim.should_drop(Channel::UnreliableUnordered));
    }

    #[test]
    fn disabled_simulation_keeps_everything() {
        let sim = PacketLossSimulation::default();
        assert!(!sim.should_drop(Channel::UnreliableOrdered));
    }
}
