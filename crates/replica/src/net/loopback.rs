use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use super::channel::Channel;
use super::protocol::ConnectionId;
use super::stats::{NetworkStats, PacketLossSimulation};
use super::transport::{ClientTransport, ServerTransport, TransportError, TransportEvent};

#[derive(Debug, Default)]
struct Link {
    inbound: VecDeque<TransportEvent>,
    open: bool,
}

#[derive(Debug)]
struct Hub {
    server_running: bool,
    next_connection_id: ConnectionId,
    to_server: VecDeque<TransportEvent>,
    links: HashMap<ConnectionId, Link>,
    loss: PacketLossSimulation,
    stats: NetworkStats,
}

impl Hub {
    fn close(&mut self, connection_id: ConnectionId) -> bool {
        let Some(link) = self.links.get_mut(&connection_id) else {
            return false;
        };
        if !link.open {
            return false;
        }
        link.open = false;
        link.inbound
            .push_back(TransportEvent::Disconnected { connection_id });
        self.to_server
            .push_back(TransportEvent::Disconnected { connection_id });
        true
    }

    fn deliver(
        &mut self,
        channel: Channel,
        bytes: &[u8],
        target: Option<ConnectionId>,
        connection_id: ConnectionId,
    ) -> Result<(), TransportError> {
        self.stats.record_sent(bytes.len());
        if self.loss.should_drop(channel) {
            self.stats.record_dropped();
            return Ok(());
        }

        let event = TransportEvent::Data {
            connection_id,
            channel,
            bytes: bytes.to_vec(),
        };
        match target {
            Some(id) => match self.links.get_mut(&id) {
                Some(link) if link.open => link.inbound.push_back(event),
                Some(_) => return Err(TransportError::Closed),
                None => return Err(TransportError::UnknownConnection(id)),
            },
            None => self.to_server.push_back(event),
        }
        self.stats.record_received(bytes.len());
        Ok(())
    }
}

/// In-process transport: one server endpoint and any number of client
/// endpoints sharing a hub. Reliable channels deliver every packet in send
/// order; unreliable channels may drop according to the loss simulation.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::with_loss(PacketLossSimulation::default())
    }

    pub fn with_loss(loss: PacketLossSimulation) -> Self {
        Self {
            hub: Rc::new(RefCell::new(Hub {
                server_running: false,
                next_connection_id: 1,
                to_server: VecDeque::new(),
                links: HashMap::new(),
                loss,
                stats: NetworkStats::default(),
            })),
        }
    }

    pub fn server_transport(&self) -> LoopbackServerTransport {
        LoopbackServerTransport {
            hub: Rc::clone(&self.hub),
        }
    }

    pub fn client_transport(&self) -> LoopbackClientTransport {
        LoopbackClientTransport {
            hub: Rc::clone(&self.hub),
            connection_id: None,
        }
    }

    pub fn set_loss(&self, loss: PacketLossSimulation) {
        self.hub.borrow_mut().loss = loss;
    }

    pub fn stats(&self) -> NetworkStats {
        self.hub.borrow().stats.clone()
    }
}

#[derive(Debug)]
pub struct LoopbackServerTransport {
    hub: Rc<RefCell<Hub>>,
}

impl ServerTransport for LoopbackServerTransport {
    fn start(&mut self) -> Result<(), TransportError> {
        self.hub.borrow_mut().server_running = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut hub = self.hub.borrow_mut();
        let open: Vec<ConnectionId> = hub
            .links
            .iter()
            .filter(|(_, link)| link.open)
            .map(|(&id, _)| id)
            .collect();
        for connection_id in open {
            hub.close(connection_id);
        }
        hub.server_running = false;
        hub.to_server.clear();
    }

    fn send(
        &mut self,
        channel: Channel,
        connection_id: ConnectionId,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        if !hub.server_running {
            return Err(TransportError::NotRunning);
        }
        hub.deliver(channel, bytes, Some(connection_id), connection_id)
    }

    fn disconnect(&mut self, connection_id: ConnectionId) {
        self.hub.borrow_mut().close(connection_id);
    }

    fn tick(&mut self) {}

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        self.hub.borrow_mut().to_server.drain(..).collect()
    }

    fn rtt_ms(&self, connection_id: ConnectionId) -> Option<f32> {
        let hub = self.hub.borrow();
        hub.links
            .get(&connection_id)
            .filter(|link| link.open)
            .map(|_| 0.0)
    }
}

#[derive(Debug)]
pub struct LoopbackClientTransport {
    hub: Rc<RefCell<Hub>>,
    connection_id: Option<ConnectionId>,
}

impl LoopbackClientTransport {
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }
}

impl ClientTransport for LoopbackClientTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        if !hub.server_running {
            return Err(TransportError::NotRunning);
        }

        let connection_id = hub.next_connection_id;
        hub.next_connection_id += 1;

        let mut link = Link {
            inbound: VecDeque::new(),
            open: true,
        };
        link.inbound
            .push_back(TransportEvent::Connected { connection_id });
        hub.links.insert(connection_id, link);
        hub.to_server
            .push_back(TransportEvent::Connected { connection_id });

        self.connection_id = Some(connection_id);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(connection_id) = self.connection_id {
            self.hub.borrow_mut().close(connection_id);
        }
    }

    fn send(&mut self, channel: Channel, bytes: &[u8]) -> Result<(), TransportError> {
        let connection_id = self.connection_id.ok_or(TransportError::Closed)?;
        let mut hub = self.hub.borrow_mut();
        let open = hub.links.get(&connection_id).is_some_and(|link| link.open);
        if !open || !hub.server_running {
            return Err(TransportError::Closed);
        }
        hub.deliver(channel, bytes, None, connection_id)
    }

    fn tick(&mut self) {}

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let Some(connection_id) = self.connection_id else {
            return Vec::new();
        };
        let mut hub = self.hub.borrow_mut();
        let Some(link) = hub.links.get_mut(&connection_id) else {
            return Vec::new();
        };
        let events: Vec<TransportEvent> = link.inbound.drain(..).collect();
        if !link.open {
            hub.links.remove(&connection_id);
            self.connection_id = None;
        }
        events
    }

    fn rtt_ms(&self) -> Option<f32> {
        self.connection_id.map(|_| 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_start_at_one_and_increase() {
        let network = LoopbackNetwork::new();
        let mut server = network.server_transport();
        server.start().unwrap();

        let mut a = network.client_transport();
        let mut b = network.client_transport();
        a.connect().unwrap();
        b.connect().unwrap();

        assert_eq!(a.connection_id(), Some(1));
        assert_eq!(b.connection_id(), Some(2));
        assert_eq!(
            server.poll_events(),
            vec![
                TransportEvent::Connected { connection_id: 1 },
                TransportEvent::Connected { connection_id: 2 },
            ]
        );
    }

    #[test]
    fn connect_fails_without_server() {
        let network = LoopbackNetwork::new();
        let mut client = network.client_transport();
        assert_eq!(client.connect(), Err(TransportError::NotRunning));
    }

    #[test]
    fn data_flows_both_ways() {
        let network = LoopbackNetwork::new();
        let mut server = network.server_transport();
        server.start().unwrap();
        let mut client = network.client_transport();
        client.connect().unwrap();
        server.poll_events();
        client.poll_events();

        client.send(Channel::ReliableOrdered, &[1, 2]).unwrap();
        server.send(Channel::ReliableOrdered, 1, &[3]).unwrap();

        assert_eq!(
            server.poll_events(),
            vec![TransportEvent::Data {
                connection_id: 1,
                channel: Channel::ReliableOrdered,
                bytes: vec![1, 2],
            }]
        );
        assert_eq!(
            client.poll_events(),
            vec![TransportEvent::Data {
                connection_id: 1,
                channel: Channel::ReliableOrdered,
                bytes: vec![3],
            }]
        );
    }

    #[test]
    fn server_disconnect_notifies_both_sides() {
        let network = LoopbackNetwork::new();
        let mut server = network.server_transport();
        server.start().unwrap();
        let mut client = network.client_transport();
        client.connect().unwrap();
        server.poll_events();
        client.poll_events();

        server.disconnect(1);

        assert_eq!(
            server.poll_events(),
            vec![TransportEvent::Disconnected { connection_id: 1 }]
        );
        assert_eq!(
            client.poll_events(),
            vec![TransportEvent::Disconnected { connection_id: 1 }]
        );
        assert_eq!(client.connection_id(), None);
        assert_eq!(
            server.send(Channel::ReliableOrdered, 1, &[0]),
            Err(TransportError::UnknownConnection(1))
        );
    }

    #[test]
    fn unreliable_loss_is_counted() {
        let network = LoopbackNetwork::with_loss(PacketLossSimulation::new(100.0));
        let mut server = network.server_transport();
        server.start().unwrap();
        let mut client = network.client_transport();
        client.connect().unwrap();
        server.poll_events();

        client.send(Channel::UnreliableUnordered, &[1]).unwrap();
        client.send(Channel::ReliableOrdered, &[2]).unwrap();

        assert_eq!(server.poll_events().len(), 1);
        assert_eq!(network.stats().packets_dropped, 1);
    }
}
