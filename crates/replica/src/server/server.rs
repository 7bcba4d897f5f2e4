use std::collections::{HashSet, VecDeque};

use crate::authority::{AuthorityChange, AuthorityError};
use crate::net::{
    Channel, ChallengeAnswer, ClientId, ClientUpdate, ClientUpdateKind, ConnectionChallenge,
    ConnectionId, ConnectionManager, DataPacket, DataRouting, DespawnObject, DistributedAuthority,
    NO_CLIENT, NetworkStats, ObjectId, Packet, PacketError, ServerTransport, ServerUpdate, ServerUpdateKind,
    TransformPacket, TransportError, TransportEvent, UpdateObject, challenge_hash,
};
use crate::object::{NetworkObject, ObjectError, ObjectEvent, Scene};
use crate::registry::{ClientInfo, ClientRegistry};

use super::config::ServerConfig;
use super::events::{DisconnectReason, ServerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// Authoritative side of a session: runs the handshake, owns the canonical
/// client registry, replicates objects and arbitrates authority requests.
pub struct NetworkServer {
    transport: Box<dyn ServerTransport>,
    config: ServerConfig,
    state: ServerState,
    connections: ConnectionManager,
    registry: ClientRegistry,
    host_client_id: Option<ClientId>,
    challenge_source: Box<dyn FnMut() -> u64>,
    pending_events: VecDeque<ServerEvent>,
    stats: NetworkStats,
}

impl NetworkServer {
    pub fn new(config: ServerConfig, transport: impl ServerTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            connections: ConnectionManager::new(config.max_clients),
            config,
            state: ServerState::Stopped,
            registry: ClientRegistry::new(),
            host_client_id: None,
            challenge_source: Box::new(rand::random::<u64>),
            pending_events: VecDeque::new(),
            stats: NetworkStats::default(),
        }
    }

    /// Replaces the random challenge generator.
    pub fn with_challenge_source(mut self, source: impl FnMut() -> u64 + 'static) -> Self {
        self.challenge_source = Box::new(source);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Started
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.registry
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn host_client_id(&self) -> Option<ClientId> {
        self.host_client_id
    }

    /// Marks the co-located client; it is skipped for transform traffic.
    pub fn set_host_client(&mut self, client_id: Option<ClientId>) {
        self.host_client_id = client_id;
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.state == ServerState::Started {
            return Ok(());
        }
        self.state = ServerState::Starting;
        if let Err(e) = self.transport.start() {
            self.state = ServerState::Stopped;
            return Err(e);
        }
        self.state = ServerState::Started;
        log::info!(
            "Server '{}' started (max {} clients)",
            self.config.server_name,
            self.config.max_clients
        );
        self.pending_events.push_back(ServerEvent::Started);
        Ok(())
    }

    /// Disconnects everyone and tears down replicated state.
    pub fn stop(&mut self, scene: &mut Scene<'_>) {
        if self.state == ServerState::Stopped {
            return;
        }
        self.state = ServerState::Stopping;

        let ids: Vec<ConnectionId> = self.connections.iter().map(|c| c.id).collect();
        for id in ids {
            self.transport.disconnect(id);
            if self.registry.contains(id) {
                self.pending_events
                    .push_back(ServerEvent::ClientDisconnected {
                        client_id: id,
                        reason: DisconnectReason::Shutdown,
                    });
            }
        }
        self.connections.clear();
        self.registry.clear();
        scene.objects.unspawn_all(scene.host);
        self.transport.stop();

        self.state = ServerState::Stopped;
        log::info!("Server '{}' stopped", self.config.server_name);
        self.pending_events.push_back(ServerEvent::Stopped);
    }

    pub fn set_server_name(&mut self, name: impl Into<String>) {
        self.config.server_name = name.into();
        if !self.is_running() {
            return;
        }
        for id in self.connections.authenticated_ids() {
            let packet = Packet::ServerUpdate(ServerUpdate {
                kind: ServerUpdateKind::Updated,
                client_id: id,
                server_name: self.config.server_name.clone(),
                max_clients: self.config.max_clients as u32,
            });
            self.send(Channel::ReliableOrdered, id, &packet);
        }
    }

    pub fn kick(&mut self, client_id: ClientId, scene: &mut Scene<'_>) {
        if self.connections.get(client_id).is_none() {
            return;
        }
        self.transport.disconnect(client_id);
        self.drop_connection(client_id, DisconnectReason::Kicked, scene);
    }

    /// Pumps the transport and handles everything it delivered.
    pub fn update(&mut self, scene: &mut Scene<'_>) {
        if self.state != ServerState::Started {
            return;
        }
        self.transport.tick();

        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected { connection_id } => self.on_connected(connection_id),
                TransportEvent::Disconnected { connection_id } => {
                    self.drop_connection(connection_id, DisconnectReason::Graceful, scene)
                }
                TransportEvent::Data {
                    connection_id,
                    bytes,
                    ..
                } => {
                    self.stats.record_received(bytes.len());
                    match Packet::deserialize(&bytes) {
                        Ok(packet) => self.handle_packet(connection_id, packet, scene),
                        Err(e) => log::warn!("Dropping packet from {}: {}", connection_id, e),
                    }
                }
            }
        }

        let ids: Vec<ConnectionId> = self.connections.iter().map(|c| c.id).collect();
        for id in ids {
            if let Some(rtt) = self.transport.rtt_ms(id) {
                if let Some(connection) = self.connections.get_mut(id) {
                    connection.rtt_ms = rtt;
                }
            }
        }
    }

    fn on_connected(&mut self, connection_id: ConnectionId) {
        let challenge = (self.challenge_source)();
        let hash = challenge_hash(challenge);
        if let Err(reason) = self.connections.create_pending(connection_id, hash) {
            log::warn!("Refusing connection {}: {}", connection_id, reason);
            self.transport.disconnect(connection_id);
            self.pending_events
                .push_back(ServerEvent::ConnectionDenied {
                    connection_id,
                    reason: DisconnectReason::ServerFull,
                });
            return;
        }

        log::debug!("Connection {} pending authentication", connection_id);
        self.pending_events
            .push_back(ServerEvent::ClientConnecting { connection_id });
        self.send(
            Channel::ReliableOrdered,
            connection_id,
            &Packet::ConnectionChallenge(ConnectionChallenge { challenge }),
        );
    }

    fn drop_connection(
        &mut self,
        connection_id: ConnectionId,
        reason: DisconnectReason,
        scene: &mut Scene<'_>,
    ) {
        if self.connections.remove(connection_id).is_none() {
            return;
        }
        let Some(info) = self.registry.remove(connection_id) else {
            log::debug!("Pending connection {} closed", connection_id);
            return;
        };
        log::info!("Client {} ({}) {}", info.id, info.username, reason.as_str());
        if self.host_client_id == Some(info.id) {
            self.host_client_id = None;
        }

        self.broadcast(
            Channel::ReliableOrdered,
            &Packet::ClientUpdate(ClientUpdate {
                kind: ClientUpdateKind::Disconnected,
                client_id: info.id,
                username: None,
                color: None,
            }),
            &[],
        );
        self.release_rights(info.id, scene);
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected {
                client_id: info.id,
                reason,
            });
    }

    /// Forcibly releases every right `client_id` held and broadcasts the
    /// resulting states.
    fn release_rights(&mut self, client_id: ClientId, scene: &mut Scene<'_>) {
        for id in scene.objects.ids() {
            let Some(object) = scene.objects.get_mut(id) else {
                continue;
            };
            let change = object.authority_mut().release_client(client_id);
            if !change.is_changed() {
                continue;
            }
            log::debug!("Released rights of client {} on object {}", client_id, id);
            if object.is_spawned() {
                let packet = Packet::UpdateObject(object.authority_update());
                self.broadcast(Channel::ReliableOrdered, &packet, &[]);
            }
            scene.objects.notify_authority(id, &change);
        }
    }

    fn handle_packet(&mut self, sender: ConnectionId, packet: Packet, scene: &mut Scene<'_>) {
        if let Packet::ChallengeAnswer(answer) = packet {
            self.on_challenge_answer(sender, answer, scene);
            return;
        }
        if !self.connections.is_authenticated(sender) {
            log::debug!(
                "Ignoring {:?} from unauthenticated connection {}",
                packet.packet_type(),
                sender
            );
            return;
        }

        match packet {
            Packet::ClientUpdate(update) => self.on_client_update(sender, update),
            Packet::Data(data) => self.on_data(sender, data),
            Packet::DistributedAuthority(request) => {
                self.on_authority_request(sender, request, scene)
            }
            Packet::Transform(transform) => self.on_transform(sender, transform, scene),
            other => log::debug!(
                "Ignoring unexpected {:?} from client {}",
                other.packet_type(),
                sender
            ),
        }
    }

    fn on_challenge_answer(
        &mut self,
        sender: ConnectionId,
        answer: ChallengeAnswer,
        scene: &mut Scene<'_>,
    ) {
        let Some(connection) = self.connections.get_mut(sender) else {
            return;
        };
        if connection.is_authenticated() {
            log::debug!("Ignoring repeated challenge answer from {}", sender);
            return;
        }
        if !connection.verify_answer(&answer.hash) {
            log::warn!("Connection {} failed the challenge", sender);
            self.connections.remove(sender);
            self.transport.disconnect(sender);
            self.pending_events
                .push_back(ServerEvent::ConnectionDenied {
                    connection_id: sender,
                    reason: DisconnectReason::AuthenticationFailed,
                });
            return;
        }

        let info = ClientInfo::new(sender, answer.username, answer.color);
        log::info!("Client {} authenticated as '{}'", sender, info.username);

        self.send(
            Channel::ReliableOrdered,
            sender,
            &Packet::ServerUpdate(ServerUpdate {
                kind: ServerUpdateKind::Authenticated,
                client_id: sender,
                server_name: self.config.server_name.clone(),
                max_clients: self.config.max_clients as u32,
            }),
        );

        let existing: Vec<ClientUpdate> = self
            .registry
            .iter()
            .map(ClientInfo::connected_update)
            .collect();
        for update in existing {
            self.send(Channel::ReliableOrdered, sender, &Packet::ClientUpdate(update));
        }

        let announcement = Packet::ClientUpdate(info.connected_update());
        self.broadcast(Channel::ReliableOrdered, &announcement, &[sender]);
        self.registry.insert(info.clone());

        self.replicate_to(sender, scene);
        self.pending_events
            .push_back(ServerEvent::ClientAuthenticated {
                client_id: sender,
                username: info.username,
            });
    }

    /// Sends every spawned object to a joining client, ancestors first.
    fn replicate_to(&mut self, client_id: ClientId, scene: &mut Scene<'_>) {
        let mut sent = HashSet::new();
        for id in scene.objects.spawned_ids() {
            for link in scene.objects.ancestry(id) {
                if !sent.insert(link) {
                    continue;
                }
                let Some(object) = scene.objects.get(link).filter(|o| o.is_spawned()) else {
                    continue;
                };
                let packets = spawn_packets(object);
                for packet in &packets {
                    self.send(Channel::ReliableOrdered, client_id, packet);
                }
                scene.objects.notify(ObjectEvent::SpawnedForClient {
                    object_id: link,
                    client_id,
                });
            }
        }
    }

    fn on_client_update(&mut self, sender: ClientId, update: ClientUpdate) {
        if update.kind != ClientUpdateKind::Updated {
            log::debug!("Client {} sent a {:?} update", sender, update.kind);
            return;
        }
        self.registry
            .update(sender, update.username.as_deref(), update.color);
        let relay = Packet::ClientUpdate(ClientUpdate {
            client_id: sender,
            ..update
        });
        self.broadcast(Channel::ReliableOrdered, &relay, &[sender]);
        self.pending_events
            .push_back(ServerEvent::ClientUpdated { client_id: sender });
    }

    fn on_data(&mut self, sender: ClientId, data: DataPacket) {
        let targets = match data.routing {
            DataRouting::ToServer => {
                self.pending_events.push_back(ServerEvent::DataReceived {
                    from: sender,
                    hash: data.hash,
                    payload: data.payload,
                });
                return;
            }
            DataRouting::ToClient(id) => vec![id],
            DataRouting::ToClients(ids) => ids,
            DataRouting::Forwarded(_) => {
                log::debug!("Client {} sent a forwarded data packet", sender);
                return;
            }
        };
        let packet = Packet::Data(DataPacket {
            hash: data.hash,
            routing: DataRouting::Forwarded(sender),
            payload: data.payload,
        });
        for target in targets {
            if self.connections.is_authenticated(target) {
                self.send(Channel::ReliableOrdered, target, &packet);
            } else {
                log::debug!("Dropping data for unknown client {}", target);
            }
        }
    }

    fn on_authority_request(
        &mut self,
        sender: ClientId,
        request: DistributedAuthority,
        scene: &mut Scene<'_>,
    ) {
        let object_id = request.object_id;
        match self.submit_authority(sender, &request, scene) {
            Ok(_) => {}
            Err(AuthorityError::Rejected(reason)) => {
                log::debug!(
                    "Rejected {:?} on object {} from client {}: {}",
                    request.op,
                    object_id,
                    sender,
                    reason
                );
                if let Some(object) = scene.objects.get(object_id) {
                    let echo = Packet::UpdateObject(object.authority_update());
                    self.send(Channel::ReliableOrdered, sender, &echo);
                }
                self.pending_events
                    .push_back(ServerEvent::AuthorityRejected {
                        object_id,
                        requester: sender,
                        reason,
                    });
            }
            Err(e) => log::warn!(
                "Ignoring {:?} on object {} from client {}: {}",
                request.op,
                object_id,
                sender,
                e
            ),
        }
    }

    /// Arbitrates one request. On acceptance the new state is broadcast to
    /// every client and change notifications fire locally.
    pub fn submit_authority(
        &mut self,
        requester: ClientId,
        request: &DistributedAuthority,
        scene: &mut Scene<'_>,
    ) -> Result<AuthorityChange, AuthorityError> {
        let object_id = request.object_id;
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

        let mut state = *object.authority();
        let allow = object.allow_authority_requests();
        let objects = &mut *scene.objects;
        let change = state.arbitrate(
            request.op,
            requester,
            request.authority_sequence,
            request.ownership_sequence,
            || allow && objects.allow_request(object_id, requester),
        )?;

        self.commit_authority(object_id, change, scene);
        Ok(change)
    }

    /// Direct server assignment of authority; works in either topology.
    pub fn set_authority(
        &mut self,
        object_id: ObjectId,
        author_id: ClientId,
        scene: &mut Scene<'_>,
    ) -> Result<AuthorityChange, AuthorityError> {
        let object = scene
            .objects
            .get(object_id)
            .ok_or(AuthorityError::UnknownObject(object_id))?;
        let mut state = *object.authority();
        let change = state.set_author(author_id)?;
        self.commit_authority(object_id, change, scene);
        Ok(change)
    }

    /// Direct server assignment of ownership; a non-zero owner also becomes
    /// the author.
    pub fn set_ownership(
        &mut self,
        object_id: ObjectId,
        owner_id: ClientId,
        scene: &mut Scene<'_>,
    ) -> Result<AuthorityChange, AuthorityError> {
        let object = scene
            .objects
            .get(object_id)
            .ok_or(AuthorityError::UnknownObject(object_id))?;
        let mut state = *object.authority();
        let change = state.set_owner(owner_id);
        self.commit_authority(object_id, change, scene);
        Ok(change)
    }

    fn commit_authority(
        &mut self,
        object_id: ObjectId,
        change: AuthorityChange,
        scene: &mut Scene<'_>,
    ) {
        if !change.is_changed() {
            return;
        }
        let Some(object) = scene.objects.get_mut(object_id) else {
            return;
        };
        *object.authority_mut() = change.current;
        if object.is_spawned() && self.is_running() {
            let packet = Packet::UpdateObject(object.authority_update());
            self.broadcast(Channel::ReliableOrdered, &packet, &[]);
        }
        scene.objects.notify_authority(object_id, &change);
    }

    fn on_transform(&mut self, sender: ClientId, packet: TransformPacket, scene: &mut Scene<'_>) {
        let object_id = packet.object_id;
        let Some(object) = scene.objects.get_mut(object_id) else {
            log::debug!("Transform for unknown object {}", object_id);
            return;
        };
        if !object.is_spawned() || object.author_id() != sender || sender == NO_CLIENT {
            log::debug!(
                "Ignoring transform for object {} from non-author {}",
                object_id,
                sender
            );
            return;
        }
        let current = scene.host.pose(object_id);
        let Some(transform) = object.transform_mut() else {
            return;
        };
        transform.receive(&packet, scene.now, current);
        let channel = transform.config().channel;

        let mut skip = vec![sender];
        skip.extend(self.host_client_id);
        self.broadcast(channel, &Packet::Transform(packet), &skip);
    }

    /// Sends a locally produced transform to every client except the host
    /// client.
    pub fn send_transform(&mut self, channel: Channel, packet: TransformPacket) {
        let skip: Vec<ClientId> = self.host_client_id.into_iter().collect();
        self.broadcast(channel, &Packet::Transform(packet), &skip);
    }

    /// Marks `object_id` spawned and replicates it, spawning any unspawned
    /// ancestors first.
    pub fn spawn(&mut self, object_id: ObjectId, scene: &mut Scene<'_>) -> Result<(), ObjectError> {
        let object = scene
            .objects
            .get(object_id)
            .ok_or(ObjectError::UnknownObject(object_id))?;
        if object.is_spawned() {
            return Err(ObjectError::AlreadySpawned(object_id));
        }
        if let Some(parent) = object.parent_id() {
            if !scene.objects.contains(parent) {
                log::warn!("Object {} spawns with unknown parent {}", object_id, parent);
            }
        }

        for link in scene.objects.ancestry(object_id) {
            let Some(object) = scene.objects.get_mut(link) else {
                continue;
            };
            if object.is_spawned() {
                continue;
            }
            object.set_spawned(true);
            let packets = spawn_packets(object);
            log::debug!("Spawning object {}", link);
            scene.objects.notify(ObjectEvent::Spawned(link));
            if self.is_running() {
                for packet in &packets {
                    self.broadcast(Channel::ReliableOrdered, packet, &[]);
                }
            }
        }
        Ok(())
    }

    /// Despawns the object and its descendants everywhere.
    pub fn despawn(
        &mut self,
        object_id: ObjectId,
        scene: &mut Scene<'_>,
    ) -> Result<(), ObjectError> {
        let object = scene
            .objects
            .get(object_id)
            .ok_or(ObjectError::UnknownObject(object_id))?;
        if !object.is_spawned() {
            return Err(ObjectError::NotSpawned(object_id));
        }

        let subtree = scene.objects.subtree(object_id);
        log::debug!("Despawning object {} ({} total)", object_id, subtree.len());
        scene.objects.unspawn(&subtree, scene.host);
        if self.is_running() {
            self.broadcast(
                Channel::ReliableOrdered,
                &Packet::DespawnObject(DespawnObject { object_id }),
                &[],
            );
        }
        Ok(())
    }

    pub fn set_parent(
        &mut self,
        object_id: ObjectId,
        parent_id: Option<ObjectId>,
        scene: &mut Scene<'_>,
    ) -> Result<(), ObjectError> {
        if let Some(parent) = parent_id {
            if !scene.objects.contains(parent) {
                return Err(ObjectError::UnknownObject(parent));
            }
        }
        let object = scene
            .objects
            .get_mut(object_id)
            .ok_or(ObjectError::UnknownObject(object_id))?;
        object.set_parent_id(parent_id);
        if !object.is_spawned() {
            return Ok(());
        }

        if let Some(parent) = parent_id {
            if scene.objects.get(parent).is_some_and(|p| !p.is_spawned()) {
                self.spawn(parent, scene)?;
            }
        }
        if self.is_running() {
            self.broadcast(
                Channel::ReliableOrdered,
                &Packet::UpdateObject(UpdateObject {
                    object_id,
                    authority: None,
                    parent: Some(parent_id),
                }),
                &[],
            );
        }
        Ok(())
    }

    pub fn send_data(
        &mut self,
        channel: Channel,
        client_id: ClientId,
        hash: u32,
        payload: &[u8],
    ) -> Result<(), PacketError> {
        let packet = server_data(hash, payload)?;
        self.send(channel, client_id, &packet);
        Ok(())
    }

    pub fn broadcast_data(
        &mut self,
        channel: Channel,
        hash: u32,
        payload: &[u8],
    ) -> Result<(), PacketError> {
        let packet = server_data(hash, payload)?;
        self.broadcast(channel, &packet, &[]);
        Ok(())
    }

    fn send(&mut self, channel: Channel, connection_id: ConnectionId, packet: &Packet) {
        let bytes = packet.serialize();
        match self.transport.send(channel, connection_id, &bytes) {
            Ok(()) => self.stats.record_sent(bytes.len()),
            Err(e) => log::warn!(
                "Failed to send {:?} to {}: {}",
                packet.packet_type(),
                connection_id,
                e
            ),
        }
    }

    /// Sends to every authenticated client not listed in `skip`.
    fn broadcast(&mut self, channel: Channel, packet: &Packet, skip: &[ClientId]) {
        let bytes = packet.serialize();
        for id in self.connections.authenticated_ids() {
            if skip.contains(&id) {
                continue;
            }
            match self.transport.send(channel, id, &bytes) {
                Ok(()) => self.stats.record_sent(bytes.len()),
                Err(e) => log::warn!("Failed to send {:?} to {}: {}", packet.packet_type(), id, e),
            }
        }
    }
}

/// Spawn packet plus the authority follow-up when the state is not initial.
fn spawn_packets(object: &NetworkObject) -> Vec<Packet> {
    let mut packets = vec![Packet::SpawnObject(object.spawn_packet())];
    if *object.authority() != Default::default() {
        packets.push(Packet::UpdateObject(object.authority_update()));
    }
    packets
}

/// Data originating at the server reaches clients as forwarded from id 0.
fn server_data(hash: u32, payload: &[u8]) -> Result<Packet, PacketError> {
    DataPacket::new(hash, DataRouting::Forwarded(NO_CLIENT), payload).map(Packet::Data)
}

impl std::fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("connections", &self.connections)
            .field("registry", &self.registry)
            .field("host_client_id", &self.host_client_id)
            .finish_non_exhaustive()
    }
}
