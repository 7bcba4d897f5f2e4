pub mod authority;
pub mod client;
pub mod manager;
pub mod net;
pub mod object;
pub mod registry;
pub mod server;
pub mod simulation;
pub mod transform;

pub use authority::{AuthorityChange, AuthorityError, AuthorityOp, AuthorityState, Rejection};
pub use client::{ClientConfig, ClientEvent, ClientState, NetworkClient};
pub use manager::{NetworkManager, receive_message};
pub use net::{
    Channel, ClientId, ClientTransport, ConnectionId, DataRouting, LoopbackNetwork, NO_CLIENT,
    NO_OBJECT, NetworkStats, ObjectId, Packet, PacketError, PacketLossSimulation,
    ServerTransport, TransportError, TransportEvent,
};
pub use object::{
    MemoryHost, NetworkObject, ObjectDirectory, ObjectError, ObjectEvent, ObjectHost,
    ObjectKind, ObjectListener, Pose, Scene, placed_object_id,
};
pub use registry::{ClientInfo, ClientRegistry, Color, RegistryEvent};
pub use server::{DisconnectReason, NetworkServer, ServerConfig, ServerEvent, ServerState};
pub use simulation::FixedTimestep;
pub use transform::{NetworkTransform, SyncAxes, TransformConfig};

pub const DEFAULT_TICK_RATE: u32 = 60;
