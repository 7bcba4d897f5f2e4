use crate::net::{ClientId, ObjectId};

/// Object-attached logic. Every method has an empty default so a listener
/// only implements the lifecycle points it cares about.
pub trait ObjectListener {
    fn on_spawned(&mut self, _object_id: ObjectId) {}

    /// Called before the object leaves the spawned set.
    fn on_despawned(&mut self, _object_id: ObjectId) {}

    /// Server side: the object was replicated to a joining client.
    fn on_spawned_for_client(&mut self, _object_id: ObjectId, _client_id: ClientId) {}

    fn on_authority_changed(
        &mut self,
        _object_id: ObjectId,
        _previous: ClientId,
        _current: ClientId,
    ) {
    }

    fn on_ownership_changed(
        &mut self,
        _object_id: ObjectId,
        _previous: ClientId,
        _current: ClientId,
    ) {
    }

    /// Server-side veto for authority and ownership requests.
    fn allow_authority_request(&mut self, _object_id: ObjectId, _requester: ClientId) -> bool {
        true
    }
}
