use rkyv::api::high::{HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::de::Pool;
use rkyv::rancor::Strategy;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::authority::{AuthorityError, AuthorityOp};
use crate::client::{ClientConfig, NetworkClient};
use crate::net::{
    Channel, ClientId, ClientTransport, DataRouting, DistributedAuthority, ObjectId, PacketError,
    ServerTransport, TransportError, encode_message, message_hash,
};
use crate::object::{
    NetworkObject, ObjectDirectory, ObjectError, ObjectHost, Pose, Scene,
};
use crate::server::{NetworkServer, ServerConfig};
use crate::simulation::FixedTimestep;

/// One peer's network context: the object directory, the scene host and
/// whichever of server and client are running. Both at once is host mode.
///
/// The event queues of the directory, the server, the client and their
/// registries grow until drained. A long-running application drains them
/// every frame.
pub struct NetworkManager<H: ObjectHost> {
    objects: ObjectDirectory,
    host: H,
    server: Option<NetworkServer>,
    client: Option<NetworkClient>,
    timestep: FixedTimestep,
    tick: u32,
    time: f64,
}

macro_rules! scene {
    ($objects:expr, $host:expr, $time:expr) => {
        Scene {
            objects: $objects,
            host: $host,
            now: $time,
        }
    };
}

impl<H: ObjectHost> NetworkManager<H> {
    pub fn new(host: H, tick_rate: u32) -> Self {
        Self {
            objects: ObjectDirectory::new(),
            host,
            server: None,
            client: None,
            timestep: FixedTimestep::new(tick_rate),
            tick: 0,
            time: 0.0,
        }
    }

    pub fn objects(&self) -> &ObjectDirectory {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectDirectory {
        &mut self.objects
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn server(&self) -> Option<&NetworkServer> {
        self.server.as_ref()
    }

    pub fn server_mut(&mut self) -> Option<&mut NetworkServer> {
        self.server.as_mut()
    }

    pub fn client(&self) -> Option<&NetworkClient> {
        self.client.as_ref()
    }

    pub fn client_mut(&mut self) -> Option<&mut NetworkClient> {
        self.client.as_mut()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Seconds since the manager was created, advanced by `update`.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn timestep(&self) -> &FixedTimestep {
        &self.timestep
    }

    pub fn is_server(&self) -> bool {
        self.server.as_ref().is_some_and(NetworkServer::is_running)
    }

    pub fn is_host(&self) -> bool {
        self.is_server() && self.client.is_some()
    }

    pub fn local_client_id(&self) -> Option<ClientId> {
        self.client
            .as_ref()
            .filter(|client| client.is_authenticated())
            .and_then(NetworkClient::client_id)
    }

    pub fn start_server(
        &mut self,
        config: ServerConfig,
        transport: impl ServerTransport + 'static,
    ) -> Result<(), TransportError> {
        if let Some(server) = &self.server {
            if server.is_running() {
                return Ok(());
            }
        }
        self.timestep = FixedTimestep::new(config.tick_rate);
        let mut server = NetworkServer::new(config, transport);
        server.start()?;
        self.server = Some(server);
        Ok(())
    }

    pub fn stop_server(&mut self) {
        let Self {
            objects,
            host,
            server,
            client,
            time,
            ..
        } = self;
        if let Some(client) = client.as_mut() {
            client.set_co_located(false);
        }
        if let Some(mut server) = server.take() {
            server.stop(&mut scene!(objects, host, *time));
        }
    }

    pub fn start_client(
        &mut self,
        config: ClientConfig,
        transport: impl ClientTransport + 'static,
    ) -> Result<(), TransportError> {
        let mut client = NetworkClient::new(config, transport);
        client.set_co_located(self.server.is_some());
        client.connect()?;
        self.client = Some(client);
        Ok(())
    }

    pub fn stop_client(&mut self) {
        let Self {
            objects,
            host,
            server,
            client,
            time,
            ..
        } = self;
        if let Some(mut client) = client.take() {
            client.disconnect(&mut scene!(objects, host, *time));
        }
        if let Some(server) = server.as_mut() {
            server.set_host_client(None);
        }
    }

    /// Server plus a co-located client sharing this manager's scene.
    pub fn start_host(
        &mut self,
        server_config: ServerConfig,
        server_transport: impl ServerTransport + 'static,
        client_config: ClientConfig,
        client_transport: impl ClientTransport + 'static,
    ) -> Result<(), TransportError> {
        self.start_server(server_config, server_transport)?;
        self.start_client(client_config, client_transport)
    }

    pub fn stop(&mut self) {
        self.stop_client();
        self.stop_server();
    }

    pub fn register(&mut self, object: NetworkObject) -> bool {
        self.objects.register(object)
    }

    /// Builds a prefab instance with a fresh random id and spawns it.
    pub fn instantiate(
        &mut self,
        prefab_id: u32,
        parent_id: Option<ObjectId>,
    ) -> Result<ObjectId, ObjectError> {
        if !self.is_server() {
            return Err(ObjectError::NotServer);
        }
        let id = self.objects.next_id();
        let mut template = NetworkObject::instantiated(id, prefab_id);
        if let Some(parent_id) = parent_id {
            template = template.with_parent(parent_id);
        }
        let object = self
            .host
            .instantiate(prefab_id, template)
            .ok_or(ObjectError::InstantiateFailed(prefab_id))?;
        if !self.objects.register(object) {
            self.host.destroy(id);
            return Err(ObjectError::IdCollision(id));
        }
        self.spawn(id)?;
        Ok(id)
    }

    pub fn spawn(&mut self, object_id: ObjectId) -> Result<(), ObjectError> {
        let Self {
            objects,
            host,
            server,
            time,
            ..
        } = self;
        let server = server
            .as_mut()
            .filter(|s| s.is_running())
            .ok_or(ObjectError::NotServer)?;
        server.spawn(object_id, &mut scene!(objects, host, *time))
    }

    pub fn despawn(&mut self, object_id: ObjectId) -> Result<(), ObjectError> {
        let Self {
            objects,
            host,
            server,
            time,
            ..
        } = self;
        let server = server
            .as_mut()
            .filter(|s| s.is_running())
            .ok_or(ObjectError::NotServer)?;
        server.despawn(object_id, &mut scene!(objects, host, *time))
    }

    pub fn set_parent(
        &mut self,
        object_id: ObjectId,
        parent_id: Option<ObjectId>,
    ) -> Result<(), ObjectError> {
        let Self {
            objects,
            host,
            server,
            time,
            ..
        } = self;
        let server = server
            .as_mut()
            .filter(|s| s.is_running())
            .ok_or(ObjectError::NotServer)?;
        server.set_parent(object_id, parent_id, &mut scene!(objects, host, *time))
    }

    pub fn has_authority(&self, object_id: ObjectId) -> bool {
        self.objects
            .get(object_id)
            .is_some_and(|o| o.has_authority(self.local_client_id(), self.is_server()))
    }

    pub fn request_authority(&mut self, object_id: ObjectId) -> Result<(), AuthorityError> {
        self.submit_authority(AuthorityOp::RequestAuthority, object_id)
    }

    pub fn release_authority(&mut self, object_id: ObjectId) -> Result<(), AuthorityError> {
        self.submit_authority(AuthorityOp::ReleaseAuthority, object_id)
    }

    pub fn request_ownership(&mut self, object_id: ObjectId) -> Result<(), AuthorityError> {
        self.submit_authority(AuthorityOp::RequestOwnership, object_id)
    }

    pub fn release_ownership(&mut self, object_id: ObjectId) -> Result<(), AuthorityError> {
        self.submit_authority(AuthorityOp::ReleaseOwnership, object_id)
    }

    /// Host mode arbitrates in place; a remote client sends the request and
    /// waits for the server's broadcast.
    fn submit_authority(&mut self, op: AuthorityOp, object_id: ObjectId) -> Result<(), AuthorityError> {
        let result = self.try_submit_authority(op, object_id);
        if let Err(e) = &result {
            log::warn!("{:?} on object {} refused: {}", op, object_id, e);
        }
        result
    }

    fn try_submit_authority(
        &mut self,
        op: AuthorityOp,
        object_id: ObjectId,
    ) -> Result<(), AuthorityError> {
        let local_id = self.local_client_id();
        let is_server = self.is_server();
        let Self {
            objects,
            host,
            server,
            client,
            time,
            ..
        } = self;
        let mut scene = scene!(objects, host, *time);

        match (server.as_mut().filter(|_| is_server), local_id) {
            (Some(server), Some(requester)) => {
                let object = scene
                    .objects
                    .get(object_id)
                    .ok_or(AuthorityError::UnknownObject(object_id))?;
                if op.is_request() && !object.allow_authority_requests() {
                    return Err(AuthorityError::RequestsDisabled(object_id));
                }
                object.authority().check(op, requester)?;
                let (authority_sequence, ownership_sequence) =
                    object.authority().proposed_sequences(op);
                let request = DistributedAuthority {
                    object_id,
                    op,
                    authority_sequence,
                    ownership_sequence,
                };
                server
                    .submit_authority(requester, &request, &mut scene)
                    .map(|_| ())
            }
            (None, Some(_)) => match client.as_mut() {
                Some(client) => client.submit_authority(op, object_id, &scene),
                None => Err(AuthorityError::NotConnected),
            },
            (_, None) => Err(AuthorityError::NotConnected),
        }
    }

    /// Server-side direct assignment; the only path for centralized objects.
    pub fn set_authority(
        &mut self,
        object_id: ObjectId,
        author_id: ClientId,
    ) -> Result<(), AuthorityError> {
        let Self {
            objects,
            host,
            server,
            time,
            ..
        } = self;
        let server = server
            .as_mut()
            .filter(|s| s.is_running())
            .ok_or(AuthorityError::NotServer)?;
        server
            .set_authority(object_id, author_id, &mut scene!(objects, host, *time))
            .map(|_| ())
    }

    pub fn set_ownership(
        &mut self,
        object_id: ObjectId,
        owner_id: ClientId,
    ) -> Result<(), AuthorityError> {
        let Self {
            objects,
            host,
            server,
            time,
            ..
        } = self;
        let server = server
            .as_mut()
            .filter(|s| s.is_running())
            .ok_or(AuthorityError::NotServer)?;
        server
            .set_ownership(object_id, owner_id, &mut scene!(objects, host, *time))
            .map(|_| ())
    }

    /// A connected client routes through the server; a dedicated server
    /// sends to the addressed clients directly.
    /// Fails only when the payload or recipient list exceeds the wire limits.
    pub fn send_data(
        &mut self,
        channel: Channel,
        routing: DataRouting,
        hash: u32,
        payload: &[u8],
    ) -> Result<(), PacketError> {
        if let Some(client) = self.client.as_mut().filter(|c| c.is_authenticated()) {
            return client.send_data(channel, routing, hash, payload);
        }
        let Some(server) = self.server.as_mut().filter(|s| s.is_running()) else {
            log::warn!("Dropping data: not connected");
            return Ok(());
        };
        match routing {
            DataRouting::ToClient(id) => server.send_data(channel, id, hash, payload)?,
            DataRouting::ToClients(ids) => {
                for id in ids {
                    server.send_data(channel, id, hash, payload)?;
                }
            }
            DataRouting::ToServer | DataRouting::Forwarded(_) => {
                log::warn!("Server cannot route data {:?}", routing)
            }
        }
        Ok(())
    }

    /// Sends every client a payload from the server.
    pub fn broadcast_data(
        &mut self,
        channel: Channel,
        hash: u32,
        payload: &[u8],
    ) -> Result<(), PacketError> {
        match self.server.as_mut().filter(|s| s.is_running()) {
            Some(server) => server.broadcast_data(channel, hash, payload),
            None => {
                log::warn!("Only the server can broadcast data");
                Ok(())
            }
        }
    }

    /// Typed variant of `send_data`: the payload is the rkyv encoding of
    /// `message` keyed by its type name hash.
    pub fn send_message<T>(
        &mut self,
        channel: Channel,
        routing: DataRouting,
        message: &T,
    ) -> Result<(), PacketError>
    where
        T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rkyv::rancor::Error>>,
    {
        let payload = encode_message(message)?;
        self.send_data(channel, routing, message_hash::<T>(), &payload)
    }

    /// Advances time by `delta` seconds, runs any due network ticks and
    /// plays back remote transforms.
    pub fn update(&mut self, delta: f64) {
        self.time += delta;
        let ticks = self.timestep.advance(delta);
        for _ in 0..ticks {
            self.tick_once();
        }
        self.play_back(delta as f32);
    }

    /// One network tick: receive, sync host bookkeeping, send transforms.
    pub fn tick_once(&mut self) {
        {
            let Self {
                objects,
                host,
                server,
                client,
                time,
                ..
            } = self;
            if let Some(server) = server.as_mut() {
                server.update(&mut scene!(&mut *objects, &mut *host, *time));
            }
            if let Some(client) = client.as_mut() {
                client.update(&mut scene!(&mut *objects, &mut *host, *time));
            }
        }

        if self.is_server() {
            let host_client = self.local_client_id();
            if let Some(server) = self.server.as_mut() {
                if server.host_client_id() != host_client {
                    server.set_host_client(host_client);
                }
            }
        }

        self.send_transforms();
        self.tick = self.tick.wrapping_add(1);
    }

    fn send_transforms(&mut self) {
        let local_id = self.local_client_id();
        let is_server = self.is_server();
        let tick = self.tick;

        for id in self.objects.spawned_ids() {
            let Some(object) = self.objects.get_mut(id) else {
                continue;
            };
            let authoritative = object.has_authority(local_id, is_server);
            let Some(transform) = object.transform_mut() else {
                continue;
            };
            transform.set_authoritative(authoritative);
            if !authoritative {
                continue;
            }
            let Some(pose) = self.host.pose(id) else {
                continue;
            };
            let channel = transform.config().channel;
            let Some(packet) = transform.encode(id, tick, &pose) else {
                continue;
            };

            if is_server {
                if let Some(server) = self.server.as_mut() {
                    server.send_transform(channel, packet);
                }
            } else if let Some(client) = self.client.as_mut().filter(|c| c.is_authenticated()) {
                client.send_transform(channel, packet);
            }
        }
    }

    /// Applies smoothed snapshot playback to every remotely driven object.
    pub fn play_back(&mut self, dt: f32) {
        let now = self.time;
        for id in self.objects.spawned_ids() {
            let Some(transform) = self.objects.get_mut(id).and_then(NetworkObject::transform_mut)
            else {
                continue;
            };
            let current = self.host.pose(id).unwrap_or_default();
            if let Some(pose) = transform.update(now, dt, &current) {
                self.host.apply_pose(id, &pose);
            }
        }
    }

    /// Current pose of a hosted object.
    pub fn pose(&self, object_id: ObjectId) -> Option<Pose> {
        self.host.pose(object_id)
    }
}

/// Decodes a typed payload received through `send_message`, returning
/// `None` when the hash belongs to another type.
pub fn receive_message<T>(hash: u32, payload: &[u8]) -> Option<Result<T, PacketError>>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, Strategy<Pool, rkyv::rancor::Error>>,
{
    (hash == message_hash::<T>()).then(|| crate::net::decode_message(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::LoopbackNetwork;
    use crate::object::MemoryHost;

    #[test]
    fn object_api_requires_a_running_server() {
        let mut manager = NetworkManager::new(MemoryHost::new(), 60);
        manager.register(NetworkObject::placed(7));

        assert_eq!(manager.spawn(7), Err(ObjectError::NotServer));
        assert_eq!(manager.instantiate(1, None), Err(ObjectError::NotServer));
        assert_eq!(manager.set_authority(7, 1), Err(AuthorityError::NotServer));
        assert_eq!(manager.request_authority(7), Err(AuthorityError::NotConnected));
    }

    #[test]
    fn unclaimed_objects_belong_to_the_server() {
        let network = LoopbackNetwork::new();
        let mut manager = NetworkManager::new(MemoryHost::new(), 60);
        manager
            .start_server(ServerConfig::default(), network.server_transport())
            .unwrap();
        manager.register(NetworkObject::placed(7));
        manager.spawn(7).unwrap();

        assert!(manager.is_server());
        assert!(!manager.is_host());
        assert!(manager.has_authority(7));
        assert_eq!(manager.spawn(7), Err(ObjectError::AlreadySpawned(7)));
    }

    #[test]
    fn events_accumulate_until_drained() {
        let network = LoopbackNetwork::new();
        let mut manager = NetworkManager::new(MemoryHost::new(), 60);
        manager
            .start_server(ServerConfig::default(), network.server_transport())
            .unwrap();
        for id in [7, 8] {
            manager.register(NetworkObject::placed(id));
            manager.spawn(id).unwrap();
        }

        assert_eq!(manager.objects_mut().drain_events().count(), 2);
        assert_eq!(manager.objects_mut().drain_events().count(), 0);
    }

    #[test]
    fn update_runs_fixed_ticks() {
        let mut manager = NetworkManager::new(MemoryHost::new(), 10);
        manager.update(0.25);
        assert_eq!(manager.tick(), 2);
        assert!((manager.time() - 0.25).abs() < 1e-9);
    }
}
