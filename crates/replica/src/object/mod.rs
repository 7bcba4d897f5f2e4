mod directory;
mod host;
mod listener;
mod network_object;

pub use directory::{ObjectDirectory, ObjectEvent};
pub use host::{HostedObject, MemoryHost, ObjectHost, Pose};
pub use listener::ObjectListener;
pub use network_object::{NetworkObject, ObjectKind};

use crate::net::{NO_OBJECT, ObjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),
    #[error("object {0} is already spawned")]
    AlreadySpawned(ObjectId),
    #[error("object {0} is not spawned")]
    NotSpawned(ObjectId),
    #[error("object id {0} is already registered")]
    IdCollision(ObjectId),
    #[error("prefab {0} could not be instantiated")]
    InstantiateFailed(u32),
    #[error("only the server may do this")]
    NotServer,
}

/// Id of a statically placed object, derived from its stable identifier.
pub fn placed_object_id(stable_id: &str) -> ObjectId {
    match crc32fast::hash(stable_id.as_bytes()) {
        NO_OBJECT => 1,
        id => id,
    }
}

/// What protocol handlers need from the peer's scene for one step.
pub struct Scene<'a> {
    pub objects: &'a mut ObjectDirectory,
    pub host: &'a mut dyn ObjectHost,
    pub now: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placed_ids_are_stable() {
        assert_eq!(placed_object_id("level/door-1"), placed_object_id("level/door-1"));
        assert_ne!(placed_object_id("level/door-1"), placed_object_id("level/door-2"));
        assert_eq!(placed_object_id(""), 1);
    }
}
