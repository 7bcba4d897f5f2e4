use crate::net::{ClientId, NO_CLIENT, ObjectId, PacketError, next_sequence, sequence_greater_than};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthorityOp {
    RequestAuthority = 0,
    ReleaseAuthority = 1,
    RequestOwnership = 2,
    ReleaseOwnership = 3,
}

impl AuthorityOp {
    pub fn is_ownership(self) -> bool {
        matches!(
            self,
            AuthorityOp::RequestOwnership | AuthorityOp::ReleaseOwnership
        )
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            AuthorityOp::RequestAuthority | AuthorityOp::RequestOwnership
        )
    }
}

impl TryFrom<u8> for AuthorityOp {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => AuthorityOp::RequestAuthority,
            1 => AuthorityOp::ReleaseAuthority,
            2 => AuthorityOp::RequestOwnership,
            3 => AuthorityOp::ReleaseOwnership,
            value => {
                return Err(PacketError::InvalidValue {
                    field: "authority op",
                    value: value.into(),
                });
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("expected sequence {expected}, got {received}")]
    StaleSequence { expected: u16, received: u16 },
    #[error("object is owned by client {0}")]
    Owned(ClientId),
    #[error("requester already holds authority")]
    AlreadyAuthor,
    #[error("requester is not the author")]
    NotAuthor,
    #[error("the owner cannot release authority without releasing ownership")]
    OwnerHoldsAuthority,
    #[error("requester is not the owner")]
    NotOwner,
    #[error("request vetoed")]
    Vetoed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),
    #[error("object {0} is not spawned")]
    NotSpawned(ObjectId),
    #[error("object {0} does not use distributed authority")]
    NotDistributed(ObjectId),
    #[error("object {0} does not accept authority requests")]
    RequestsDisabled(ObjectId),
    #[error("not connected")]
    NotConnected,
    #[error("only the server may do this")]
    NotServer,
    #[error(transparent)]
    Rejected(#[from] Rejection),
}

/// Replicated rights of one object. `owner_id != 0` implies
/// `author_id == owner_id`; both sequences only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorityState {
    pub author_id: ClientId,
    pub authority_sequence: u16,
    pub owner_id: ClientId,
    pub ownership_sequence: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityChange {
    pub previous: AuthorityState,
    pub current: AuthorityState,
}

impl AuthorityChange {
    pub fn author_changed(&self) -> bool {
        self.previous.author_id != self.current.author_id
    }

    pub fn owner_changed(&self) -> bool {
        self.previous.owner_id != self.current.owner_id
    }

    pub fn is_changed(&self) -> bool {
        self.previous != self.current
    }
}

impl AuthorityState {
    pub fn is_owned(&self) -> bool {
        self.owner_id != NO_CLIENT
    }

    pub fn has_author(&self) -> bool {
        self.author_id != NO_CLIENT
    }

    /// Local evaluation: the local client authors the object, or nobody does
    /// and the local peer is the server.
    pub fn has_authority(&self, local_client: Option<ClientId>, is_server: bool) -> bool {
        match local_client {
            Some(id) if id != NO_CLIENT && self.author_id == id => true,
            _ => self.author_id == NO_CLIENT && is_server,
        }
    }

    /// Sequences a peer submits for `op`: the relevant counter advanced by
    /// one, the other left as observed.
    pub fn proposed_sequences(&self, op: AuthorityOp) -> (u16, u16) {
        if op.is_ownership() {
            (
                self.authority_sequence,
                next_sequence(self.ownership_sequence),
            )
        } else {
            (
                next_sequence(self.authority_sequence),
                self.ownership_sequence,
            )
        }
    }

    /// Precondition check for `op` from `requester`, without the sequence rule.
    pub fn check(&self, op: AuthorityOp, requester: ClientId) -> Result<(), Rejection> {
        match op {
            AuthorityOp::RequestAuthority => {
                if self.is_owned() {
                    return Err(Rejection::Owned(self.owner_id));
                }
                if self.author_id == requester {
                    return Err(Rejection::AlreadyAuthor);
                }
            }
            AuthorityOp::ReleaseAuthority => {
                if self.author_id != requester {
                    return Err(Rejection::NotAuthor);
                }
                if self.owner_id == requester {
                    return Err(Rejection::OwnerHoldsAuthority);
                }
            }
            AuthorityOp::RequestOwnership => {
                if self.is_owned() {
                    return Err(Rejection::Owned(self.owner_id));
                }
            }
            AuthorityOp::ReleaseOwnership => {
                if self.owner_id != requester {
                    return Err(Rejection::NotOwner);
                }
            }
        }
        Ok(())
    }

    /// Server-side arbitration of a submitted request. Accepts only when the
    /// relevant submitted sequence is exactly the current one plus one and
    /// the precondition holds; `gate` runs last and only for requests.
    pub fn arbitrate(
        &mut self,
        op: AuthorityOp,
        requester: ClientId,
        authority_sequence: u16,
        ownership_sequence: u16,
        gate: impl FnOnce() -> bool,
    ) -> Result<AuthorityChange, Rejection> {
        let (current, received) = if op.is_ownership() {
            (self.ownership_sequence, ownership_sequence)
        } else {
            (self.authority_sequence, authority_sequence)
        };
        let expected = next_sequence(current);
        if received != expected {
            return Err(Rejection::StaleSequence { expected, received });
        }

        self.check(op, requester)?;
        if op.is_request() && !gate() {
            return Err(Rejection::Vetoed);
        }

        Ok(self.apply(op, requester))
    }

    fn apply(&mut self, op: AuthorityOp, requester: ClientId) -> AuthorityChange {
        let previous = *self;
        match op {
            AuthorityOp::RequestAuthority => self.assign_author(requester),
            AuthorityOp::ReleaseAuthority => self.assign_author(NO_CLIENT),
            AuthorityOp::RequestOwnership => self.assign_owner(requester),
            AuthorityOp::ReleaseOwnership => self.assign_owner(NO_CLIENT),
        }
        AuthorityChange {
            previous,
            current: *self,
        }
    }

    fn assign_author(&mut self, author_id: ClientId) {
        self.authority_sequence = next_sequence(self.authority_sequence);
        self.author_id = author_id;
    }

    fn assign_owner(&mut self, owner_id: ClientId) {
        self.ownership_sequence = next_sequence(self.ownership_sequence);
        self.owner_id = owner_id;
        if owner_id != NO_CLIENT && self.author_id != owner_id {
            self.assign_author(owner_id);
        }
    }

    /// Direct server assignment of authority.
    pub fn set_author(&mut self, author_id: ClientId) -> Result<AuthorityChange, Rejection> {
        let previous = *self;
        if self.is_owned() && author_id != self.owner_id {
            return Err(Rejection::Owned(self.owner_id));
        }
        if author_id != self.author_id {
            self.assign_author(author_id);
        }
        Ok(AuthorityChange {
            previous,
            current: *self,
        })
    }

    /// Direct server assignment of ownership; a non-zero owner also becomes
    /// the author.
    pub fn set_owner(&mut self, owner_id: ClientId) -> AuthorityChange {
        let previous = *self;
        if owner_id != self.owner_id {
            self.assign_owner(owner_id);
        }
        AuthorityChange {
            previous,
            current: *self,
        }
    }

    /// Drops every right `client` holds, bumping each affected sequence once.
    pub fn release_client(&mut self, client: ClientId) -> AuthorityChange {
        let previous = *self;
        if client != NO_CLIENT {
            if self.owner_id == client {
                self.assign_owner(NO_CLIENT);
            }
            if self.author_id == client {
                self.assign_author(NO_CLIENT);
            }
        }
        AuthorityChange {
            previous,
            current: *self,
        }
    }

    /// Applies a state received from the server. Each half is taken only if
    /// its sequence is not older than the local one, so re-delivered or
    /// echoed states are idempotent.
    pub fn merge(&mut self, incoming: AuthorityState) -> AuthorityChange {
        let previous = *self;
        if !sequence_greater_than(self.authority_sequence, incoming.authority_sequence) {
            self.authority_sequence = incoming.authority_sequence;
            self.author_id = incoming.author_id;
        }
        if !sequence_greater_than(self.ownership_sequence, incoming.ownership_sequence) {
            self.ownership_sequence = incoming.ownership_sequence;
            self.owner_id = incoming.owner_id;
        }
        AuthorityChange {
            previous,
            current: *self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(
        state: &mut AuthorityState,
        op: AuthorityOp,
        requester: ClientId,
        view: AuthorityState,
    ) -> Result<AuthorityChange, Rejection> {
        let (authority_sequence, ownership_sequence) = view.proposed_sequences(op);
        state.arbitrate(op, requester, authority_sequence, ownership_sequence, || true)
    }

    #[test]
    fn request_authority_on_unclaimed_object() {
        let mut state = AuthorityState::default();
        let change = { let view = state; submit(&mut state, AuthorityOp::RequestAuthority, 3, view) }.unwrap();
        assert!(change.author_changed());
        assert_eq!(state.author_id, 3);
        assert_eq!(state.authority_sequence, 1);
        assert_eq!(state.ownership_sequence, 0);
    }

    #[test]
    fn concurrent_requests_accept_exactly_one() {
        let mut state = AuthorityState::default();
        let view = state;

        assert!(submit(&mut state, AuthorityOp::RequestAuthority, 1, view).is_ok());
        let second = submit(&mut state, AuthorityOp::RequestAuthority, 2, view);

        assert_eq!(
            second,
            Err(Rejection::StaleSequence {
                expected: 2,
                received: 1
            })
        );
        assert_eq!(state.author_id, 1);
    }

    #[test]
    fn stale_sequence_leaves_state_unchanged() {
        let mut state = AuthorityState {
            author_id: 0,
            authority_sequence: 5,
            owner_id: 0,
            ownership_sequence: 2,
        };
        let before = state;
        let result = state.arbitrate(AuthorityOp::RequestAuthority, 7, 5, 2, || true);
        assert!(matches!(result, Err(Rejection::StaleSequence { expected: 6, received: 5 })));
        assert_eq!(state, before);
    }

    #[test]
    fn ownership_implies_authorship() {
        let mut state = AuthorityState::default();
        { let view = state; submit(&mut state, AuthorityOp::RequestAuthority, 1, view) }.unwrap();
        { let view = state; submit(&mut state, AuthorityOp::RequestOwnership, 2, view) }.unwrap();

        assert_eq!(state.owner_id, 2);
        assert_eq!(state.author_id, 2);
        assert_eq!(state.authority_sequence, 2);
        assert_eq!(state.ownership_sequence, 1);
    }

    #[test]
    fn owner_already_author_keeps_authority_sequence() {
        let mut state = AuthorityState::default();
        { let view = state; submit(&mut state, AuthorityOp::RequestAuthority, 4, view) }.unwrap();
        { let view = state; submit(&mut state, AuthorityOp::RequestOwnership, 4, view) }.unwrap();
        assert_eq!(state.authority_sequence, 1);
        assert_eq!(state.ownership_sequence, 1);
    }

    #[test]
    fn owned_object_blocks_authority_requests() {
        let mut state = AuthorityState::default();
        { let view = state; submit(&mut state, AuthorityOp::RequestOwnership, 1, view) }.unwrap();
        assert_eq!(
            { let view = state; submit(&mut state, AuthorityOp::RequestAuthority, 2, view) },
            Err(Rejection::Owned(1))
        );
        assert_eq!(
            { let view = state; submit(&mut state, AuthorityOp::ReleaseAuthority, 1, view) },
            Err(Rejection::OwnerHoldsAuthority)
        );
    }

    #[test]
    fn release_ownership_keeps_author() {
        let mut state = AuthorityState::default();
        { let view = state; submit(&mut state, AuthorityOp::RequestOwnership, 1, view) }.unwrap();
        { let view = state; submit(&mut state, AuthorityOp::ReleaseOwnership, 1, view) }.unwrap();
        assert_eq!(state.owner_id, 0);
        assert_eq!(state.author_id, 1);
        { let view = state; submit(&mut state, AuthorityOp::ReleaseAuthority, 1, view) }.unwrap();
        assert_eq!(state.author_id, 0);
    }

    #[test]
    fn veto_rejects_requests_only() {
        let mut state = AuthorityState {
            author_id: 2,
            authority_sequence: 1,
            ..Default::default()
        };
        let (a, o) = state.proposed_sequences(AuthorityOp::ReleaseAuthority);
        assert!(state.arbitrate(AuthorityOp::ReleaseAuthority, 2, a, o, || false).is_ok());

        let (a, o) = state.proposed_sequences(AuthorityOp::RequestAuthority);
        assert_eq!(
            state.arbitrate(AuthorityOp::RequestAuthority, 3, a, o, || false),
            Err(Rejection::Vetoed)
        );
    }

    #[test]
    fn release_client_bumps_each_sequence_once() {
        let mut state = AuthorityState::default();
        { let view = state; submit(&mut state, AuthorityOp::RequestOwnership, 9, view) }.unwrap();
        let before = state;

        let change = state.release_client(9);

        assert!(change.author_changed() && change.owner_changed());
        assert_eq!(state.author_id, 0);
        assert_eq!(state.owner_id, 0);
        assert_eq!(state.authority_sequence, before.authority_sequence + 1);
        assert_eq!(state.ownership_sequence, before.ownership_sequence + 1);
    }

    #[test]
    fn set_author_refuses_to_break_ownership() {
        let mut state = AuthorityState::default();
        state.set_owner(5);
        assert_eq!(state.set_author(6), Err(Rejection::Owned(5)));
        assert_eq!(state.author_id, 5);
    }

    #[test]
    fn merge_ignores_older_states() {
        let mut state = AuthorityState {
            author_id: 2,
            authority_sequence: 10,
            owner_id: 0,
            ownership_sequence: 3,
        };
        let older = AuthorityState {
            author_id: 1,
            authority_sequence: 9,
            owner_id: 0,
            ownership_sequence: 3,
        };
        assert!(!state.merge(older).is_changed());
        assert_eq!(state.author_id, 2);

        let newer = AuthorityState {
            author_id: 0,
            authority_sequence: 11,
            owner_id: 0,
            ownership_sequence: 3,
        };
        assert!(state.merge(newer).author_changed());
        assert_eq!(state.authority_sequence, 11);
    }

    #[test]
    fn sequence_wraps_to_zero() {
        let mut state = AuthorityState {
            authority_sequence: u16::MAX,
            ..Default::default()
        };
        assert!(state.arbitrate(AuthorityOp::RequestAuthority, 1, 0, 0, || true).is_ok());
        assert_eq!(state.authority_sequence, 0);

        let mut mirror = AuthorityState {
            authority_sequence: u16::MAX,
            ..Default::default()
        };
        assert!(mirror.merge(state).author_changed());
    }

    #[test]
    fn has_authority_defaults_to_server() {
        let state = AuthorityState::default();
        assert!(state.has_authority(None, true));
        assert!(!state.has_authority(Some(3), false));

        let claimed = AuthorityState {
            author_id: 3,
            authority_sequence: 1,
            ..Default::default()
        };
        assert!(claimed.has_authority(Some(3), false));
        assert!(!claimed.has_authority(None, true));
    }
}
