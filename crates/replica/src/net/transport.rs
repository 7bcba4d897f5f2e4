use super::channel::Channel;
use super::protocol::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected {
        connection_id: ConnectionId,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
    Data {
        connection_id: ConnectionId,
        channel: Channel,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not running")]
    NotRunning,
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("connection closed")]
    Closed,
}

/// Listening side of a transport. Connection ids are assigned by the
/// transport, start at 1 and are not reused within a session.
pub trait ServerTransport {
    fn start(&mut self) -> Result<(), TransportError>;
    fn stop(&mut self);
    fn send(
        &mut self,
        channel: Channel,
        connection_id: ConnectionId,
        bytes: &[u8],
    ) -> Result<(), TransportError>;
    fn disconnect(&mut self, connection_id: ConnectionId);
    /// Pumps outgoing and incoming I/O.
    fn tick(&mut self);
    fn poll_events(&mut self) -> Vec<TransportEvent>;
    fn rtt_ms(&self, connection_id: ConnectionId) -> Option<f32>;
}

pub trait ClientTransport {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    fn send(&mut self, channel: Channel, bytes: &[u8]) -> Result<(), TransportError>;
    fn tick(&mut self);
    fn poll_events(&mut self) -> Vec<TransportEvent>;
    fn rtt_ms(&self) -> Option<f32>;
}
