mod channel;
mod codec;
mod connection;
mod loopback;
mod message;
mod protocol;
mod stats;
mod transport;

pub use channel::Channel;
pub use codec::{ByteReader, ByteWriter, MAX_ID_LIST_LEN, MAX_PAYLOAD_LEN, PacketError};
pub use connection::{Connection, ConnectionManager, ConnectionState, challenge_hash};
pub use loopback::{LoopbackClientTransport, LoopbackNetwork, LoopbackServerTransport};
pub use message::{decode_message, encode_message, fnv1a_32, message_hash};
pub use protocol::{
    CHALLENGE_HASH_LEN, ChallengeAnswer, ClientId, ClientUpdate, ClientUpdateKind,
    ConnectionChallenge, ConnectionId, DataPacket, DataRouting, DespawnObject,
    DistributedAuthority, NO_CLIENT, NO_OBJECT, ObjectId, Packet, PacketType, ServerUpdate,
    ServerUpdateKind, SpawnFlags, SpawnObject, TransformFlags, TransformPacket, UpdateObject, next_sequence,
    sequence_greater_than,
};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use transport::{ClientTransport, ServerTransport, TransportError, TransportEvent};
