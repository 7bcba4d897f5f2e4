use std::collections::{BTreeMap, HashMap};

use glam::{Quat, Vec3};

use crate::net::ObjectId;
use crate::transform::TransformConfig;

use super::network_object::NetworkObject;

/// Full local pose of a hosted object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }
}

impl Pose {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

/// The scene the replication layer drives. Implemented by the embedding
/// application; the library only asks it to build, tear down and move
/// objects.
pub trait ObjectHost {
    /// Builds an instance of `prefab_id` for `object` and returns the object
    /// with whatever components the template carries attached. `None` when
    /// the template is unknown.
    fn instantiate(&mut self, prefab_id: u32, object: NetworkObject) -> Option<NetworkObject>;

    fn destroy(&mut self, object_id: ObjectId);

    fn pose(&self, object_id: ObjectId) -> Option<Pose>;

    fn apply_pose(&mut self, object_id: ObjectId, pose: &Pose);
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostedObject {
    pub prefab_id: Option<u32>,
    pub parent_id: Option<ObjectId>,
    pub pose: Pose,
}

/// Map-backed host for headless peers, tests and the demo.
#[derive(Debug, Default)]
pub struct MemoryHost {
    objects: BTreeMap<ObjectId, HostedObject>,
    prefabs: HashMap<u32, Option<TransformConfig>>,
    strict: bool,
}

impl MemoryHost {
    /// Accepts any prefab id; unregistered prefabs carry no transform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only registered prefabs can be instantiated.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Default::default()
        }
    }

    pub fn register_prefab(&mut self, prefab_id: u32, transform: Option<TransformConfig>) {
        self.prefabs.insert(prefab_id, transform);
    }

    /// Adds a statically placed object.
    pub fn place(&mut self, object_id: ObjectId, pose: Pose) {
        self.objects.insert(
            object_id,
            HostedObject {
                prefab_id: None,
                parent_id: None,
                pose,
            },
        );
    }

    pub fn set_pose(&mut self, object_id: ObjectId, pose: Pose) -> bool {
        match self.objects.get_mut(&object_id) {
            Some(object) => {
                object.pose = pose;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, object_id: ObjectId) -> Option<&HostedObject> {
        self.objects.get(&object_id)
    }

    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.objects.contains_key(&object_id)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectHost for MemoryHost {
    fn instantiate(&mut self, prefab_id: u32, object: NetworkObject) -> Option<NetworkObject> {
        let transform = match self.prefabs.get(&prefab_id) {
            Some(transform) => transform.clone(),
            None if self.strict => return None,
            None => None,
        };
        if self.objects.contains_key(&object.id()) {
            return None;
        }
        self.objects.insert(
            object.id(),
            HostedObject {
                prefab_id: Some(prefab_id),
                parent_id: object.parent_id(),
                pose: Pose::default(),
            },
        );
        Some(match transform {
            Some(config) => object.with_transform(config),
            None => object,
        })
    }

    fn destroy(&mut self, object_id: ObjectId) {
        self.objects.remove(&object_id);
    }

    fn pose(&self, object_id: ObjectId) -> Option<Pose> {
        self.objects.get(&object_id).map(|object| object.pose)
    }

    fn apply_pose(&mut self, object_id: ObjectId, pose: &Pose) {
        if let Some(object) = self.objects.get_mut(&object_id) {
            object.pose = *pose;
        }
    }
}
