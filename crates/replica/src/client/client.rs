use std::collections::VecDeque;

use crate::authority::{AuthorityError, AuthorityOp};
use crate::net::{
    Channel, ChallengeAnswer, ClientId, ClientTransport, ClientUpdate, ClientUpdateKind,
    DataPacket, DataRouting, DistributedAuthority, NetworkStats, ObjectId, Packet, PacketError,
    ServerUpdate,
    ServerUpdateKind, SpawnObject, TransformPacket, TransportError, TransportEvent, UpdateObject,
    challenge_hash,
};
use crate::object::{NetworkObject, ObjectEvent, ObjectKind, Scene};
use crate::registry::{ClientInfo, ClientRegistry, Color};

use super::config::ClientConfig;
use super::events::ClientEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Starting,
    Started,
    Authenticated,
    Stopping,
    Stopped,
}

/// Connecting side of a session. Mirrors the server's registry and spawned
/// objects; never mutates authority state without the server's answer.
pub struct NetworkClient {
    transport: Box<dyn ClientTransport>,
    config: ClientConfig,
    state: ClientState,
    client_id: Option<ClientId>,
    server_name: String,
    max_clients: u32,
    registry: ClientRegistry,
    co_located: bool,
    pending_events: VecDeque<ClientEvent>,
    stats: NetworkStats,
}

impl NetworkClient {
    pub fn new(config: ClientConfig, transport: impl ClientTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            config,
            state: ClientState::Stopped,
            client_id: None,
            server_name: String::new(),
            max_clients: 0,
            registry: ClientRegistry::new(),
            co_located: false,
            pending_events: VecDeque::new(),
            stats: NetworkStats::default(),
        }
    }

    /// A client sharing its scene with a local server leaves object
    /// teardown to that server.
    pub fn set_co_located(&mut self, co_located: bool) {
        self.co_located = co_located;
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ClientState::Authenticated
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.registry
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn rtt_ms(&self) -> Option<f32> {
        self.transport.rtt_ms()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        if !matches!(self.state, ClientState::Stopped) {
            return Ok(());
        }
        self.state = ClientState::Starting;
        if let Err(e) = self.transport.connect() {
            self.state = ClientState::Stopped;
            return Err(e);
        }
        log::info!("Client '{}' connecting", self.config.username);
        Ok(())
    }

    pub fn disconnect(&mut self, scene: &mut Scene<'_>) {
        if self.state == ClientState::Stopped {
            return;
        }
        self.transport.disconnect();
        self.teardown(scene);
    }

    fn teardown(&mut self, scene: &mut Scene<'_>) {
        self.state = ClientState::Stopping;
        self.registry.clear();
        if !self.co_located {
            scene.objects.unspawn_all(scene.host);
        }
        self.client_id = None;
        self.state = ClientState::Stopped;
        log::info!("Client '{}' stopped", self.config.username);
        self.pending_events.push_back(ClientEvent::Disconnected);
    }

    pub fn update(&mut self, scene: &mut Scene<'_>) {
        if self.state == ClientState::Stopped {
            return;
        }
        self.transport.tick();

        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected { .. } => {
                    if self.state == ClientState::Starting {
                        self.state = ClientState::Started;
                        self.pending_events.push_back(ClientEvent::Connected);
                    }
                }
                TransportEvent::Disconnected { .. } => {
                    if self.state != ClientState::Stopped {
                        self.teardown(scene);
                    }
                }
                TransportEvent::Data { bytes, .. } => {
                    self.stats.record_received(bytes.len());
                    match Packet::deserialize(&bytes) {
                        Ok(packet) => self.handle_packet(packet, scene),
                        Err(e) => log::warn!("Dropping packet from server: {}", e),
                    }
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet, scene: &mut Scene<'_>) {
        match packet {
            Packet::ConnectionChallenge(challenge) => {
                if self.state != ClientState::Started {
                    log::debug!("Ignoring challenge in state {:?}", self.state);
                    return;
                }
                let answer = Packet::ChallengeAnswer(ChallengeAnswer {
                    hash: challenge_hash(challenge.challenge),
                    username: self.config.username.clone(),
                    color: self.config.color,
                });
                self.send(Channel::ReliableOrdered, &answer);
            }
            Packet::ServerUpdate(update) => self.on_server_update(update),
            other if self.state != ClientState::Authenticated => log::debug!(
                "Ignoring {:?} before authentication",
                other.packet_type()
            ),
            Packet::ClientUpdate(update) => self.registry.apply(&update),
            Packet::Data(data) => match data.routing {
                DataRouting::Forwarded(from) => {
                    self.pending_events.push_back(ClientEvent::DataReceived {
                        from,
                        hash: data.hash,
                        payload: data.payload,
                    })
                }
                routing => log::debug!("Ignoring data routed {:?}", routing),
            },
            Packet::SpawnObject(spawn) => self.on_spawn(spawn, scene),
            Packet::UpdateObject(update) => self.on_update_object(update, scene),
            Packet::DespawnObject(despawn) => {
                let id = despawn.object_id;
                if !scene.objects.get(id).is_some_and(NetworkObject::is_spawned) {
                    log::debug!("Despawn for object {} which is not spawned", id);
                    return;
                }
                let subtree = scene.objects.subtree(id);
                scene.objects.unspawn(&subtree, scene.host);
            }
            Packet::Transform(transform) => self.on_transform(transform, scene),
            other => log::debug!("Ignoring unexpected {:?}", other.packet_type()),
        }
    }

    fn on_server_update(&mut self, update: ServerUpdate) {
        match update.kind {
            ServerUpdateKind::Authenticated => {
                if self.state != ClientState::Started {
                    log::debug!("Ignoring authentication in state {:?}", self.state);
                    return;
                }
                self.state = ClientState::Authenticated;
                self.client_id = Some(update.client_id);
                self.server_name = update.server_name.clone();
                self.max_clients = update.max_clients;
                self.registry.insert(ClientInfo::new(
                    update.client_id,
                    self.config.username.clone(),
                    self.config.color,
                ));
                log::info!(
                    "Authenticated with '{}' as client {}",
                    update.server_name,
                    update.client_id
                );
                self.pending_events.push_back(ClientEvent::Authenticated {
                    client_id: update.client_id,
                    server_name: update.server_name,
                    max_clients: update.max_clients,
                });
            }
            ServerUpdateKind::Updated => {
                if self.state != ClientState::Authenticated {
                    return;
                }
                self.server_name = update.server_name.clone();
                self.max_clients = update.max_clients;
                self.pending_events.push_back(ClientEvent::ServerUpdated {
                    server_name: update.server_name,
                });
            }
        }
    }

    fn on_spawn(&mut self, spawn: SpawnObject, scene: &mut Scene<'_>) {
        let id = spawn.object_id;
        if let Some(object) = scene.objects.get_mut(id) {
            if object.is_spawned() {
                return;
            }
            object.set_parent_id(spawn.parent_id);
            if let Err(e) =
                object.set_distributed_authority(spawn.distributed_authority, spawn.allow_authority_requests)
            {
                log::warn!("{}", e);
            }
            object.set_spawned(true);
            scene.objects.notify(ObjectEvent::Spawned(id));
            return;
        }

        match (spawn.kind, spawn.prefab_id) {
            (ObjectKind::Instantiated, Some(prefab_id)) => {
                let template = NetworkObject::from_spawn(&spawn);
                let Some(mut object) = scene.host.instantiate(prefab_id, template) else {
                    log::error!("Failed to instantiate prefab {} for object {}", prefab_id, id);
                    return;
                };
                object.set_spawned(true);
                if scene.objects.register(object) {
                    scene.objects.notify(ObjectEvent::Spawned(id));
                } else {
                    scene.host.destroy(id);
                }
            }
            (ObjectKind::Instantiated, None) => {
                log::error!("Instantiated object {} spawned without a prefab", id);
            }
            (ObjectKind::Placed, _) => {
                log::error!("Placed object {} is not present locally", id);
            }
        }
    }

    fn on_update_object(&mut self, update: UpdateObject, scene: &mut Scene<'_>) {
        let id = update.object_id;
        let Some(object) = scene.objects.get_mut(id) else {
            log::debug!("Update for unknown object {}", id);
            return;
        };
        if let Some(parent) = update.parent {
            object.set_parent_id(parent);
        }
        if let Some(state) = update.authority {
            let change = object.authority_mut().merge(state);
            if change.is_changed() {
                scene.objects.notify_authority(id, &change);
            }
        }
    }

    fn on_transform(&mut self, packet: TransformPacket, scene: &mut Scene<'_>) {
        let id = packet.object_id;
        let Some(object) = scene.objects.get_mut(id) else {
            return;
        };
        if !object.is_spawned() || self.client_id.is_some_and(|me| object.author_id() == me) {
            return;
        }
        let current = scene.host.pose(id);
        if let Some(transform) = object.transform_mut() {
            transform.receive(&packet, scene.now, current);
        }
    }

    /// Changes the local username and/or color and tells the server.
    pub fn update_info(&mut self, username: Option<String>, color: Option<Color>) {
        if let Some(username) = &username {
            self.config.username = username.clone();
        }
        if let Some(color) = color {
            self.config.color = color;
        }
        let Some(client_id) = self.client_id.filter(|_| self.is_authenticated()) else {
            return;
        };
        self.registry
            .update(client_id, username.as_deref(), color);
        let packet = Packet::ClientUpdate(ClientUpdate {
            kind: ClientUpdateKind::Updated,
            client_id,
            username,
            color,
        });
        self.send(Channel::ReliableOrdered, &packet);
    }

    /// Validates `op` locally and submits it with the next sequence number.
    /// The local state only changes once the server's answer arrives.
    pub fn submit_authority(
        &mut self,
        op: AuthorityOp,
        object_id: ObjectId,
        scene: &Scene<'_>,
    ) -> Result<(), AuthorityError> {
        let client_id = self
            .client_id
            .filter(|_| self.is_authenticated())
            .ok_or(AuthorityError::NotConnected)?;
        let object = scene
            .objects
            .get(object_id)
            .ok_or(AuthorityError::UnknownObject(object_id))?;
        if !object.is_spawned() {
            return Err(AuthorityError::NotSpawned(object_id));
        }
        if !object.distributed_authority() {
            return Err(AuthorityError::NotDistributed(object_id));
        }
        if op.is_request() && !object.allow_authority_requests() {
            return Err(AuthorityError::RequestsDisabled(object_id));
        }
        object.authority().check(op, client_id)?;

        let (authority_sequence, ownership_sequence) = object.authority().proposed_sequences(op);
        let packet = Packet::DistributedAuthority(DistributedAuthority {
            object_id,
            op,
            authority_sequence,
            ownership_sequence,
        });
        self.send(Channel::ReliableOrdered, &packet);
        Ok(())
    }

    pub fn send_transform(&mut self, channel: Channel, packet: TransformPacket) {
        self.send(channel, &Packet::Transform(packet));
    }

    pub fn send_data(
        &mut self,
        channel: Channel,
        routing: DataRouting,
        hash: u32,
        payload: &[u8],
    ) -> Result<(), PacketError> {
        let packet = Packet::Data(DataPacket::new(hash, routing, payload)?);
        if !self.is_authenticated() {
            log::debug!("Dropping data sent before authentication");
            return Ok(());
        }
        self.send(channel, &packet);
        Ok(())
    }

    fn send(&mut self, channel: Channel, packet: &Packet) {
        let bytes = packet.serialize();
        match self.transport.send(channel, &bytes) {
            Ok(()) => self.stats.record_sent(bytes.len()),
            Err(e) => log::warn!("Failed to send {:?}: {}", packet.packet_type(), e),
        }
    }
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("client_id", &self.client_id)
            .field("server_name", &self.server_name)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
