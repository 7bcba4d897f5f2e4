use crate::authority::Rejection;
use crate::net::{ClientId, ConnectionId, ObjectId};

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Started,
    Stopped,
    ClientConnecting {
        connection_id: ConnectionId,
    },
    ClientAuthenticated {
        client_id: ClientId,
        username: String,
    },
    ConnectionDenied {
        connection_id: ConnectionId,
        reason: DisconnectReason,
    },
    ClientDisconnected {
        client_id: ClientId,
        reason: DisconnectReason,
    },
    ClientUpdated {
        client_id: ClientId,
    },
    DataReceived {
        from: ClientId,
        hash: u32,
        payload: Vec<u8>,
    },
    AuthorityRejected {
        object_id: ObjectId,
        requester: ClientId,
        reason: Rejection,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Kicked,
    AuthenticationFailed,
    ServerFull,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::AuthenticationFailed => "failed authentication",
            DisconnectReason::ServerFull => "server full",
            DisconnectReason::Shutdown => "server shut down",
        }
    }
}
