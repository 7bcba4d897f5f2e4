use bitflags::bitflags;
use glam::Vec3;

use crate::authority::{AuthorityOp, AuthorityState};
use crate::object::ObjectKind;
use crate::registry::Color;

use super::codec::{ByteReader, ByteWriter, MAX_ID_LIST_LEN, MAX_PAYLOAD_LEN, PacketError};

pub type ClientId = u32;
pub type ConnectionId = u32;
pub type ObjectId = u32;

/// Author/owner id meaning "nobody"; the server drives such objects.
pub const NO_CLIENT: ClientId = 0;
/// Never assigned to an object; encodes "no parent" on the wire.
pub const NO_OBJECT: ObjectId = 0;

pub const CHALLENGE_HASH_LEN: usize = 32;

const SEQUENCE_WRAP_THRESHOLD: u16 = u16::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[inline]
pub fn next_sequence(sequence: u16) -> u16 {
    sequence.wrapping_add(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    ConnectionChallenge = 0,
    ChallengeAnswer = 1,
    ServerUpdate = 2,
    ClientUpdate = 3,
    Data = 4,
    SpawnObject = 5,
    UpdateObject = 6,
    DespawnObject = 7,
    DistributedAuthority = 8,
    Transform = 9,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => PacketType::ConnectionChallenge,
            1 => PacketType::ChallengeAnswer,
            2 => PacketType::ServerUpdate,
            3 => PacketType::ClientUpdate,
            4 => PacketType::Data,
            5 => PacketType::SpawnObject,
            6 => PacketType::UpdateObject,
            7 => PacketType::DespawnObject,
            8 => PacketType::DistributedAuthority,
            9 => PacketType::Transform,
            tag => return Err(PacketError::UnknownTag(tag)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerUpdateKind {
    Authenticated,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientUpdateKind {
    Connected,
    Disconnected,
    Updated,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClientUpdateFlags: u8 {
        const USERNAME = 1 << 0;
        const COLOR = 1 << 1;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpawnFlags: u8 {
        const PARENT = 1 << 0;
        const PREFAB = 1 << 1;
        const DISTRIBUTED = 1 << 2;
        const ALLOW_REQUESTS = 1 << 3;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectUpdateFlags: u8 {
        const AUTHORITY = 1 << 0;
        const PARENT = 1 << 1;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransformFlags: u16 {
        const POSITION_X = 1 << 0;
        const POSITION_Y = 1 << 1;
        const POSITION_Z = 1 << 2;
        const ROTATION_X = 1 << 3;
        const ROTATION_Y = 1 << 4;
        const ROTATION_Z = 1 << 5;
        const SCALE_X = 1 << 6;
        const SCALE_Y = 1 << 7;
        const SCALE_Z = 1 << 8;
        const LINEAR_VELOCITY = 1 << 9;
        const ANGULAR_VELOCITY = 1 << 10;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChallenge {
    pub challenge: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeAnswer {
    pub hash: [u8; CHALLENGE_HASH_LEN],
    pub username: String,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUpdate {
    pub kind: ServerUpdateKind,
    pub client_id: ClientId,
    pub server_name: String,
    pub max_clients: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientUpdate {
    pub kind: ClientUpdateKind,
    pub client_id: ClientId,
    pub username: Option<String>,
    pub color: Option<Color>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRouting {
    ToServer,
    ToClient(ClientId),
    ToClients(Vec<ClientId>),
    Forwarded(ClientId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub hash: u32,
    pub routing: DataRouting,
    pub payload: Vec<u8>,
}

impl DataPacket {
    /// Refuses payloads and recipient lists the receiving side would reject.
    pub fn new(hash: u32, routing: DataRouting, payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(PacketError::LengthTooLarge(payload.len()));
        }
        if let DataRouting::ToClients(ids) = &routing {
            if ids.len() > MAX_ID_LIST_LEN {
                return Err(PacketError::LengthTooLarge(ids.len()));
            }
        }
        Ok(Self {
            hash,
            routing,
            payload: payload.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnObject {
    pub object_id: ObjectId,
    pub kind: ObjectKind,
    pub parent_id: Option<ObjectId>,
    pub prefab_id: Option<u32>,
    pub distributed_authority: bool,
    pub allow_authority_requests: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateObject {
    pub object_id: ObjectId,
    pub authority: Option<AuthorityState>,
    /// `Some(None)` detaches the object from its parent.
    pub parent: Option<Option<ObjectId>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DespawnObject {
    pub object_id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedAuthority {
    pub object_id: ObjectId,
    pub op: AuthorityOp,
    pub authority_sequence: u16,
    pub ownership_sequence: u16,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformPacket {
    pub object_id: ObjectId,
    pub tick: u32,
    pub position: [Option<f32>; 3],
    /// Euler angles in degrees.
    pub rotation: [Option<f32>; 3],
    pub scale: [Option<f32>; 3],
    pub linear_velocity: Option<Vec3>,
    pub angular_velocity: Option<Vec3>,
}

impl TransformPacket {
    pub fn new(object_id: ObjectId, tick: u32) -> Self {
        Self {
            object_id,
            tick,
            ..Default::default()
        }
    }

    pub fn flags(&self) -> TransformFlags {
        let mut flags = TransformFlags::empty();
        let axes = [
            (&self.position, TransformFlags::POSITION_X),
            (&self.rotation, TransformFlags::ROTATION_X),
            (&self.scale, TransformFlags::SCALE_X),
        ];
        for (values, first) in axes {
            for (axis, value) in values.iter().enumerate() {
                if value.is_some() {
                    flags |= TransformFlags::from_bits_retain(first.bits() << axis);
                }
            }
        }
        flags.set(
            TransformFlags::LINEAR_VELOCITY,
            self.linear_velocity.is_some(),
        );
        flags.set(
            TransformFlags::ANGULAR_VELOCITY,
            self.angular_velocity.is_some(),
        );
        flags
    }

    pub fn is_empty(&self) -> bool {
        self.flags().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ConnectionChallenge(ConnectionChallenge),
    ChallengeAnswer(ChallengeAnswer),
    ServerUpdate(ServerUpdate),
    ClientUpdate(ClientUpdate),
    Data(DataPacket),
    SpawnObject(SpawnObject),
    UpdateObject(UpdateObject),
    DespawnObject(DespawnObject),
    DistributedAuthority(DistributedAuthority),
    Transform(TransformPacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ConnectionChallenge(_) => PacketType::ConnectionChallenge,
            Packet::ChallengeAnswer(_) => PacketType::ChallengeAnswer,
            Packet::ServerUpdate(_) => PacketType::ServerUpdate,
            Packet::ClientUpdate(_) => PacketType::ClientUpdate,
            Packet::Data(_) => PacketType::Data,
            Packet::SpawnObject(_) => PacketType::SpawnObject,
            Packet::UpdateObject(_) => PacketType::UpdateObject,
            Packet::DespawnObject(_) => PacketType::DespawnObject,
            Packet::DistributedAuthority(_) => PacketType::DistributedAuthority,
            Packet::Transform(_) => PacketType::Transform,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(32);
        writer.write_u8(self.packet_type() as u8);

        match self {
            Packet::ConnectionChallenge(packet) => writer.write_u64(packet.challenge),
            Packet::ChallengeAnswer(packet) => {
                writer.write_bytes(&packet.hash);
                writer.write_string(&packet.username);
                write_color(&mut writer, packet.color);
            }
            Packet::ServerUpdate(packet) => {
                writer.write_u8(match packet.kind {
                    ServerUpdateKind::Authenticated => 0,
                    ServerUpdateKind::Updated => 1,
                });
                writer.write_u32(packet.client_id);
                writer.write_string(&packet.server_name);
                writer.write_u32(packet.max_clients);
            }
            Packet::ClientUpdate(packet) => {
                writer.write_u8(match packet.kind {
                    ClientUpdateKind::Connected => 0,
                    ClientUpdateKind::Disconnected => 1,
                    ClientUpdateKind::Updated => 2,
                });
                writer.write_u32(packet.client_id);
                let mut flags = ClientUpdateFlags::empty();
                flags.set(ClientUpdateFlags::USERNAME, packet.username.is_some());
                flags.set(ClientUpdateFlags::COLOR, packet.color.is_some());
                writer.write_u8(flags.bits());
                if let Some(username) = &packet.username {
                    writer.write_string(username);
                }
                if let Some(color) = packet.color {
                    write_color(&mut writer, color);
                }
            }
            Packet::Data(packet) => {
                writer.write_u32(packet.hash);
                match &packet.routing {
                    DataRouting::ToServer => writer.write_u8(0),
                    DataRouting::ToClient(id) => {
                        writer.write_u8(1);
                        writer.write_u32(*id);
                    }
                    DataRouting::ToClients(ids) => {
                        writer.write_u8(2);
                        let count = ids.len().min(MAX_ID_LIST_LEN);
                        writer.write_u16(count as u16);
                        for id in &ids[..count] {
                            writer.write_u32(*id);
                        }
                    }
                    DataRouting::Forwarded(from) => {
                        writer.write_u8(3);
                        writer.write_u32(*from);
                    }
                }
                writer.write_payload(&packet.payload);
            }
            Packet::SpawnObject(packet) => {
                writer.write_u32(packet.object_id);
                writer.write_u8(packet.kind as u8);
                let mut flags = SpawnFlags::empty();
                flags.set(SpawnFlags::PARENT, packet.parent_id.is_some());
                flags.set(SpawnFlags::PREFAB, packet.prefab_id.is_some());
                flags.set(SpawnFlags::DISTRIBUTED, packet.distributed_authority);
                flags.set(SpawnFlags::ALLOW_REQUESTS, packet.allow_authority_requests);
                writer.write_u8(flags.bits());
                if let Some(parent_id) = packet.parent_id {
                    writer.write_u32(parent_id);
                }
                if let Some(prefab_id) = packet.prefab_id {
                    writer.write_u32(prefab_id);
                }
            }
            Packet::UpdateObject(packet) => {
                writer.write_u32(packet.object_id);
                let mut flags = ObjectUpdateFlags::empty();
                flags.set(ObjectUpdateFlags::AUTHORITY, packet.authority.is_some());
                flags.set(ObjectUpdateFlags::PARENT, packet.parent.is_some());
                writer.write_u8(flags.bits());
                if let Some(state) = packet.authority {
                    writer.write_u32(state.author_id);
                    writer.write_u16(state.authority_sequence);
                    writer.write_u32(state.owner_id);
                    writer.write_u16(state.ownership_sequence);
                }
                if let Some(parent) = packet.parent {
                    writer.write_u32(parent.unwrap_or(NO_OBJECT));
                }
            }
            Packet::DespawnObject(packet) => writer.write_u32(packet.object_id),
            Packet::DistributedAuthority(packet) => {
                writer.write_u32(packet.object_id);
                writer.write_u8(packet.op as u8);
                writer.write_u16(packet.authority_sequence);
                writer.write_u16(packet.ownership_sequence);
            }
            Packet::Transform(packet) => {
                writer.write_u32(packet.object_id);
                writer.write_u32(packet.tick);
                writer.write_u16(packet.flags().bits());
                for value in packet
                    .position
                    .iter()
                    .chain(&packet.rotation)
                    .chain(&packet.scale)
                    .flatten()
                {
                    writer.write_f32(*value);
                }
                if let Some(velocity) = packet.linear_velocity {
                    writer.write_vec3(velocity);
                }
                if let Some(velocity) = packet.angular_velocity {
                    writer.write_vec3(velocity);
                }
            }
        }

        writer.into_bytes()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let mut reader = ByteReader::new(data);
        let packet_type = PacketType::try_from(reader.read_u8()?)?;

        let packet = match packet_type {
            PacketType::ConnectionChallenge => Packet::ConnectionChallenge(ConnectionChallenge {
                challenge: reader.read_u64()?,
            }),
            PacketType::ChallengeAnswer => Packet::ChallengeAnswer(ChallengeAnswer {
                hash: reader.read_array()?,
                username: reader.read_string()?,
                color: read_color(&mut reader)?,
            }),
            PacketType::ServerUpdate => {
                let kind = match reader.read_u8()? {
                    0 => ServerUpdateKind::Authenticated,
                    1 => ServerUpdateKind::Updated,
                    value => {
                        return Err(PacketError::InvalidValue {
                            field: "server update kind",
                            value: value.into(),
                        });
                    }
                };
                Packet::ServerUpdate(ServerUpdate {
                    kind,
                    client_id: reader.read_u32()?,
                    server_name: reader.read_string()?,
                    max_clients: reader.read_u32()?,
                })
            }
            PacketType::ClientUpdate => {
                let kind = match reader.read_u8()? {
                    0 => ClientUpdateKind::Connected,
                    1 => ClientUpdateKind::Disconnected,
                    2 => ClientUpdateKind::Updated,
                    value => {
                        return Err(PacketError::InvalidValue {
                            field: "client update kind",
                            value: value.into(),
                        });
                    }
                };
                let client_id = reader.read_u32()?;
                let flags = read_flags::<ClientUpdateFlags>(&mut reader, "client update flags")?;
                let username = if flags.contains(ClientUpdateFlags::USERNAME) {
                    Some(reader.read_string()?)
                } else {
                    None
                };
                let color = if flags.contains(ClientUpdateFlags::COLOR) {
                    Some(read_color(&mut reader)?)
                } else {
                    None
                };
                Packet::ClientUpdate(ClientUpdate {
                    kind,
                    client_id,
                    username,
                    color,
                })
            }
            PacketType::Data => {
                let hash = reader.read_u32()?;
                let routing = match reader.read_u8()? {
                    0 => DataRouting::ToServer,
                    1 => DataRouting::ToClient(reader.read_u32()?),
                    2 => {
                        let count = reader.read_u16()? as usize;
                        if count > MAX_ID_LIST_LEN {
                            return Err(PacketError::LengthTooLarge(count));
                        }
                        let ids = (0..count)
                            .map(|_| reader.read_u32())
                            .collect::<Result<Vec<_>, _>>()?;
                        DataRouting::ToClients(ids)
                    }
                    3 => DataRouting::Forwarded(reader.read_u32()?),
                    value => {
                        return Err(PacketError::InvalidValue {
                            field: "data routing",
                            value: value.into(),
                        });
                    }
                };
                Packet::Data(DataPacket {
                    hash,
                    routing,
                    payload: reader.read_payload()?,
                })
            }
            PacketType::SpawnObject => {
                let object_id = reader.read_u32()?;
                let kind = ObjectKind::try_from(reader.read_u8()?)?;
                let flags = read_flags::<SpawnFlags>(&mut reader, "spawn flags")?;
                let parent_id = if flags.contains(SpawnFlags::PARENT) {
                    Some(reader.read_u32()?)
                } else {
                    None
                };
                let prefab_id = if flags.contains(SpawnFlags::PREFAB) {
                    Some(reader.read_u32()?)
                } else {
                    None
                };
                Packet::SpawnObject(SpawnObject {
                    object_id,
                    kind,
                    parent_id,
                    prefab_id,
                    distributed_authority: flags.contains(SpawnFlags::DISTRIBUTED),
                    allow_authority_requests: flags.contains(SpawnFlags::ALLOW_REQUESTS),
                })
            }
            PacketType::UpdateObject => {
                let object_id = reader.read_u32()?;
                let flags = read_flags::<ObjectUpdateFlags>(&mut reader, "object update flags")?;
                let authority = if flags.contains(ObjectUpdateFlags::AUTHORITY) {
                    Some(AuthorityState {
                        author_id: reader.read_u32()?,
                        authority_sequence: reader.read_u16()?,
                        owner_id: reader.read_u32()?,
                        ownership_sequence: reader.read_u16()?,
                    })
                } else {
                    None
                };
                let parent = if flags.contains(ObjectUpdateFlags::PARENT) {
                    let parent_id = reader.read_u32()?;
                    Some((parent_id != NO_OBJECT).then_some(parent_id))
                } else {
                    None
                };
                Packet::UpdateObject(UpdateObject {
                    object_id,
                    authority,
                    parent,
                })
            }
            PacketType::DespawnObject => Packet::DespawnObject(DespawnObject {
                object_id: reader.read_u32()?,
            }),
            PacketType::DistributedAuthority => Packet::DistributedAuthority(DistributedAuthority {
                object_id: reader.read_u32()?,
                op: AuthorityOp::try_from(reader.read_u8()?)?,
                authority_sequence: reader.read_u16()?,
                ownership_sequence: reader.read_u16()?,
            }),
            PacketType::Transform => {
                let mut packet = TransformPacket::new(reader.read_u32()?, reader.read_u32()?);
                let bits = reader.read_u16()?;
                let flags = TransformFlags::from_bits(bits).ok_or(PacketError::InvalidValue {
                    field: "transform flags",
                    value: bits.into(),
                })?;
                let channels = [
                    (TransformFlags::POSITION_X, &mut packet.position),
                    (TransformFlags::ROTATION_X, &mut packet.rotation),
                    (TransformFlags::SCALE_X, &mut packet.scale),
                ];
                for (first, values) in channels {
                    for (axis, value) in values.iter_mut().enumerate() {
                        let flag = TransformFlags::from_bits_retain(first.bits() << axis);
                        if flags.contains(flag) {
                            *value = Some(reader.read_f32()?);
                        }
                    }
                }
                if flags.contains(TransformFlags::LINEAR_VELOCITY) {
                    packet.linear_velocity = Some(reader.read_vec3()?);
                }
                if flags.contains(TransformFlags::ANGULAR_VELOCITY) {
                    packet.angular_velocity = Some(reader.read_vec3()?);
                }
                Packet::Transform(packet)
            }
        };

        reader.finish()?;
        Ok(packet)
    }
}

trait WireFlags: Sized {
    fn from_wire(bits: u8) -> Option<Self>;
}

impl WireFlags for ClientUpdateFlags {
    fn from_wire(bits: u8) -> Option<Self> {
        Self::from_bits(bits)
    }
}

impl WireFlags for SpawnFlags {
    fn from_wire(bits: u8) -> Option<Self> {
        Self::from_bits(bits)
    }
}

impl WireFlags for ObjectUpdateFlags {
    fn from_wire(bits: u8) -> Option<Self> {
        Self::from_bits(bits)
    }
}

fn read_flags<F: WireFlags>(
    reader: &mut ByteReader<'_>,
    field: &'static str,
) -> Result<F, PacketError> {
    let value = reader.read_u8()?;
    F::from_wire(value).ok_or(PacketError::InvalidValue {
        field,
        value: value.into(),
    })
}

fn write_color(writer: &mut ByteWriter, color: Color) {
    writer.write_bytes(&[color.r, color.g, color.b, color.a]);
}

fn read_color(reader: &mut ByteReader<'_>) -> Result<Color, PacketError> {
    let [r, g, b, a] = reader.read_array::<4>()?;
    Ok(Color::new(r, g, b, a))
}
