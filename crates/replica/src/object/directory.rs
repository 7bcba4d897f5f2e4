use std::collections::{HashMap, HashSet, VecDeque};

use crate::authority::{AuthorityChange, AuthorityState};
use crate::net::{ClientId, NO_OBJECT, ObjectId};

use super::host::ObjectHost;
use super::network_object::{NetworkObject, ObjectKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectEvent {
    Spawned(ObjectId),
    Despawned(ObjectId),
    SpawnedForClient {
        object_id: ObjectId,
        client_id: ClientId,
    },
    AuthorityChanged {
        object_id: ObjectId,
        previous: ClientId,
        current: ClientId,
    },
    OwnershipChanged {
        object_id: ObjectId,
        previous: ClientId,
        current: ClientId,
    },
}

/// Every network object known to one peer, keyed by id. Parent links are
/// plain ids; hierarchy queries walk the map.
#[derive(Debug, Default)]
pub struct ObjectDirectory {
    objects: HashMap<ObjectId, NetworkObject>,
    events: VecDeque<ObjectEvent>,
}

impl ObjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never overwrites: a colliding id is logged and refused.
    pub fn register(&mut self, object: NetworkObject) -> bool {
        let id = object.id();
        if id == NO_OBJECT {
            log::error!("Refusing to register an object with the reserved id 0");
            return false;
        }
        if self.objects.contains_key(&id) {
            log::error!("Object id collision: {} is already registered", id);
            return false;
        }
        self.objects.insert(id, object);
        true
    }

    /// Random non-zero id not currently in use.
    pub fn next_id(&self) -> ObjectId {
        loop {
            let id: ObjectId = rand::random();
            if id != NO_OBJECT && !self.objects.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn release(&mut self, id: ObjectId) -> Option<NetworkObject> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&NetworkObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut NetworkObject> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkObject> {
        self.objects.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NetworkObject> {
        self.objects.values_mut()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn spawned_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .objects
            .values()
            .filter(|object| object.is_spawned())
            .map(NetworkObject::id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut children: Vec<ObjectId> = self
            .objects
            .values()
            .filter(|object| object.parent_id() == Some(id))
            .map(NetworkObject::id)
            .collect();
        children.sort_unstable();
        children
    }

    /// `id` followed by all of its descendants, parents before children.
    pub fn subtree(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            queue.extend(self.children(current));
        }
        out
    }

    /// Registered ancestors of `id` from the root down, ending with `id`.
    pub fn ancestry(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.get(current).and_then(NetworkObject::parent_id) {
            if chain.contains(&parent) {
                log::warn!("Parent cycle detected at object {}", parent);
                break;
            }
            if !self.contains(parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Queues `event` and forwards it to the object's listeners.
    pub fn notify(&mut self, event: ObjectEvent) {
        let object_id = match event {
            ObjectEvent::Spawned(id) | ObjectEvent::Despawned(id) => id,
            ObjectEvent::SpawnedForClient { object_id, .. }
            | ObjectEvent::AuthorityChanged { object_id, .. }
            | ObjectEvent::OwnershipChanged { object_id, .. } => object_id,
        };
        if let Some(object) = self.objects.get_mut(&object_id) {
            for listener in &mut object.listeners {
                match event {
                    ObjectEvent::Spawned(id) => listener.on_spawned(id),
                    ObjectEvent::Despawned(id) => listener.on_despawned(id),
                    ObjectEvent::SpawnedForClient {
                        object_id,
                        client_id,
                    } => listener.on_spawned_for_client(object_id, client_id),
                    ObjectEvent::AuthorityChanged {
                        object_id,
                        previous,
                        current,
                    } => listener.on_authority_changed(object_id, previous, current),
                    ObjectEvent::OwnershipChanged {
                        object_id,
                        previous,
                        current,
                    } => listener.on_ownership_changed(object_id, previous, current),
                }
            }
        }
        self.events.push_back(event);
    }

    /// Fires authority and ownership notifications for whichever side of
    /// `change` moved.
    pub fn notify_authority(&mut self, object_id: ObjectId, change: &AuthorityChange) {
        if change.author_changed() {
            self.notify(ObjectEvent::AuthorityChanged {
                object_id,
                previous: change.previous.author_id,
                current: change.current.author_id,
            });
        }
        if change.owner_changed() {
            self.notify(ObjectEvent::OwnershipChanged {
                object_id,
                previous: change.previous.owner_id,
                current: change.current.owner_id,
            });
        }
    }

    /// Removes `ids` from the spawned set, firing despawn notifications
    /// first. Instantiated objects are destroyed and released.
    pub fn unspawn(&mut self, ids: &[ObjectId], host: &mut dyn ObjectHost) {
        for &id in ids {
            if !self.get(id).is_some_and(NetworkObject::is_spawned) {
                continue;
            }
            self.notify(ObjectEvent::Despawned(id));
            if let Some(object) = self.get_mut(id) {
                object.set_spawned(false);
                *object.authority_mut() = AuthorityState::default();
            }
        }
        for &id in ids {
            let instantiated = self
                .get(id)
                .is_some_and(|o| o.kind() == ObjectKind::Instantiated && !o.is_spawned());
            if instantiated {
                host.destroy(id);
                self.release(id);
            }
        }
    }

    /// Unspawns every spawned object.
    pub fn unspawn_all(&mut self, host: &mut dyn ObjectHost) {
        let ids = self.spawned_ids();
        self.unspawn(&ids, host);
    }

    /// Asks every listener on the object; any refusal vetoes the request.
    pub fn allow_request(&mut self, id: ObjectId, requester: ClientId) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) => object
                .listeners
                .iter_mut()
                .all(|listener| listener.allow_authority_request(id, requester)),
            None => false,
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ObjectEvent> + '_ {
        self.events.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::object::ObjectListener;

    fn tree() -> ObjectDirectory {
        let mut directory = ObjectDirectory::new();
        directory.register(NetworkObject::placed(1));
        directory.register(NetworkObject::placed(2).with_parent(1));
        directory.register(NetworkObject::placed(3).with_parent(2));
        directory.register(NetworkObject::placed(4).with_parent(1));
        directory.register(NetworkObject::placed(5));
        directory
    }

    #[test]
    fn register_refuses_collisions() {
        let mut directory = ObjectDirectory::new();
        assert!(directory.register(NetworkObject::placed(7)));
        assert!(!directory.register(NetworkObject::instantiated(7, 1)));
        assert!(!directory.register(NetworkObject::placed(NO_OBJECT)));
        assert_eq!(directory.get(7).map(|o| o.prefab_id()), Some(None));
    }

    #[test]
    fn next_id_is_fresh() {
        let directory = tree();
        for _ in 0..64 {
            let id = directory.next_id();
            assert_ne!(id, NO_OBJECT);
            assert!(!directory.contains(id));
        }
    }

    #[test]
    fn subtree_lists_parents_first() {
        let directory = tree();
        assert_eq!(directory.subtree(1), vec![1, 2, 4, 3]);
        assert_eq!(directory.subtree(5), vec![5]);
    }

    #[test]
    fn unspawn_releases_instantiated_only() {
        use crate::object::MemoryHost;

        let mut host = MemoryHost::new();
        let mut directory = ObjectDirectory::new();
        directory.register(NetworkObject::placed(1));
        host.place(1, Default::default());
        let child = host
            .instantiate(7, NetworkObject::instantiated(2, 7).with_parent(1))
            .unwrap();
        directory.register(child);
        for id in [1, 2] {
            directory.get_mut(id).unwrap().set_spawned(true);
        }

        let subtree = directory.subtree(1);
        directory.unspawn(&subtree, &mut host);

        assert!(!directory.get(1).unwrap().is_spawned());
        assert!(!directory.contains(2));
        assert!(!host.contains(2));
        assert_eq!(
            directory.drain_events().collect::<Vec<_>>(),
            vec![ObjectEvent::Despawned(1), ObjectEvent::Despawned(2)]
        );
    }

    #[test]
    fn unspawn_forgets_authority_of_retained_objects() {
        use crate::object::MemoryHost;

        let mut host = MemoryHost::new();
        let mut directory = ObjectDirectory::new();
        directory.register(NetworkObject::placed(1).with_distributed_authority(true));
        let object = directory.get_mut(1).unwrap();
        object.set_spawned(true);
        *object.authority_mut() = AuthorityState {
            author_id: 3,
            authority_sequence: 4,
            owner_id: 3,
            ownership_sequence: 2,
        };

        directory.unspawn(&[1], &mut host);

        let object = directory.get(1).unwrap();
        assert_eq!(*object.authority(), AuthorityState::default());
        assert!(object.distributed_authority());
    }

    #[test]
    fn ancestry_is_root_first() {
        let directory = tree();
        assert_eq!(directory.ancestry(3), vec![1, 2, 3]);
        assert_eq!(directory.ancestry(5), vec![5]);
    }

    #[test]
    fn ancestry_stops_on_cycle() {
        let mut directory = ObjectDirectory::new();
        directory.register(NetworkObject::placed(1).with_parent(2));
        directory.register(NetworkObject::placed(2).with_parent(1));
        assert_eq!(directory.ancestry(1), vec![2, 1]);
    }

    struct Recorder(Rc<RefCell<Vec<String>>>);

    impl ObjectListener for Recorder {
        fn on_spawned(&mut self, object_id: ObjectId) {
            self.0.borrow_mut().push(format!("spawned {object_id}"));
        }

        fn allow_authority_request(&mut self, _object_id: ObjectId, requester: ClientId) -> bool {
            requester != 9
        }
    }

    #[test]
    fn listeners_receive_notifications() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut directory = ObjectDirectory::new();
        directory.register(NetworkObject::placed(1).with_listener(Recorder(Rc::clone(&log))));

        directory.notify(ObjectEvent::Spawned(1));

        assert_eq!(*log.borrow(), vec!["spawned 1".to_string()]);
        assert_eq!(
            directory.drain_events().collect::<Vec<_>>(),
            vec![ObjectEvent::Spawned(1)]
        );
        assert!(directory.allow_request(1, 2));
        assert!(!directory.allow_request(1, 9));
    }
}
