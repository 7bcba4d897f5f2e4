use std::fmt;

use crate::authority::AuthorityState;
use crate::net::{ClientId, ObjectId, PacketError, SpawnObject, UpdateObject};
use crate::transform::{NetworkTransform, TransformConfig};

use super::ObjectError;
use super::listener::ObjectListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    /// Exists in every peer's static content; matched by id.
    Placed = 0,
    /// Created at runtime from a prefab.
    Instantiated = 1,
}

impl TryFrom<u8> for ObjectKind {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ObjectKind::Placed),
            1 => Ok(ObjectKind::Instantiated),
            value => Err(PacketError::InvalidValue {
                field: "object kind",
                value: value.into(),
            }),
        }
    }
}

pub struct NetworkObject {
    id: ObjectId,
    kind: ObjectKind,
    prefab_id: Option<u32>,
    parent_id: Option<ObjectId>,
    spawned: bool,
    distributed_authority: bool,
    allow_authority_requests: bool,
    authority: AuthorityState,
    transform: Option<NetworkTransform>,
    pub(crate) listeners: Vec<Box<dyn ObjectListener>>,
}

impl fmt::Debug for NetworkObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkObject")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("prefab_id", &self.prefab_id)
            .field("parent_id", &self.parent_id)
            .field("spawned", &self.spawned)
            .field("distributed_authority", &self.distributed_authority)
            .field("authority", &self.authority)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl NetworkObject {
    fn new(id: ObjectId, kind: ObjectKind, prefab_id: Option<u32>) -> Self {
        Self {
            id,
            kind,
            prefab_id,
            parent_id: None,
            spawned: false,
            distributed_authority: false,
            allow_authority_requests: false,
            authority: AuthorityState::default(),
            transform: None,
            listeners: Vec::new(),
        }
    }

    pub fn placed(id: ObjectId) -> Self {
        Self::new(id, ObjectKind::Placed, None)
    }

    pub fn instantiated(id: ObjectId, prefab_id: u32) -> Self {
        Self::new(id, ObjectKind::Instantiated, Some(prefab_id))
    }

    pub(crate) fn from_spawn(packet: &SpawnObject) -> Self {
        let mut object = Self::new(packet.object_id, packet.kind, packet.prefab_id);
        object.parent_id = packet.parent_id;
        object.distributed_authority = packet.distributed_authority;
        object.allow_authority_requests = packet.allow_authority_requests;
        object
    }

    pub fn with_parent(mut self, parent_id: ObjectId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_distributed_authority(mut self, allow_requests: bool) -> Self {
        self.distributed_authority = true;
        self.allow_authority_requests = allow_requests;
        self
    }

    pub fn with_transform(mut self, config: TransformConfig) -> Self {
        self.transform = Some(NetworkTransform::new(config));
        self
    }

    pub fn with_listener(mut self, listener: impl ObjectListener + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn add_listener(&mut self, listener: Box<dyn ObjectListener>) {
        self.listeners.push(listener);
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn prefab_id(&self) -> Option<u32> {
        self.prefab_id
    }

    pub fn parent_id(&self) -> Option<ObjectId> {
        self.parent_id
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<ObjectId>) {
        self.parent_id = parent_id;
    }

    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    pub(crate) fn set_spawned(&mut self, spawned: bool) {
        self.spawned = spawned;
    }

    pub fn distributed_authority(&self) -> bool {
        self.distributed_authority
    }

    pub fn allow_authority_requests(&self) -> bool {
        self.allow_authority_requests
    }

    /// Fixed once the object is spawned.
    pub fn set_distributed_authority(
        &mut self,
        enabled: bool,
        allow_requests: bool,
    ) -> Result<(), ObjectError> {
        if self.spawned {
            return Err(ObjectError::AlreadySpawned(self.id));
        }
        self.distributed_authority = enabled;
        self.allow_authority_requests = allow_requests;
        Ok(())
    }

    pub fn authority(&self) -> &AuthorityState {
        &self.authority
    }

    pub(crate) fn authority_mut(&mut self) -> &mut AuthorityState {
        &mut self.authority
    }

    pub fn author_id(&self) -> ClientId {
        self.authority.author_id
    }

    pub fn owner_id(&self) -> ClientId {
        self.authority.owner_id
    }

    pub fn has_authority(&self, local_client: Option<ClientId>, is_server: bool) -> bool {
        self.authority.has_authority(local_client, is_server)
    }

    pub fn transform(&self) -> Option<&NetworkTransform> {
        self.transform.as_ref()
    }

    pub fn transform_mut(&mut self) -> Option<&mut NetworkTransform> {
        self.transform.as_mut()
    }

    pub(crate) fn spawn_packet(&self) -> SpawnObject {
        SpawnObject {
            object_id: self.id,
            kind: self.kind,
            parent_id: self.parent_id,
            prefab_id: self.prefab_id,
            distributed_authority: self.distributed_authority,
            allow_authority_requests: self.allow_authority_requests,
        }
    }

    pub(crate) fn authority_update(&self) -> UpdateObject {
        UpdateObject {
            object_id: self.id,
            authority: Some(self.authority),
            parent: None,
        }
    }
}
