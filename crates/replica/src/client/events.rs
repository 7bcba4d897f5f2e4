use crate::net::ClientId;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Authenticated {
        client_id: ClientId,
        server_name: String,
        max_clients: u32,
    },
    ServerUpdated {
        server_name: String,
    },
    Disconnected,
    /// `from` is 0 for data sent by the server itself.
    DataReceived {
        from: ClientId,
        hash: u32,
        payload: Vec<u8>,
    },
}
