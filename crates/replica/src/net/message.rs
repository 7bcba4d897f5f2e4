use rkyv::api::high::{HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::de::Pool;
use rkyv::rancor::{self, Strategy};
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use super::codec::PacketError;

const FNV_OFFSET_BASIS: u32 = 0x811C9DC5;
const FNV_PRIME: u32 = 0x01000193;

/// 32-bit FNV-1a, used to key data packets by type name or channel name.
pub fn fnv1a_32(name: &str) -> u32 {
    name.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ byte as u32).wrapping_mul(FNV_PRIME)
    })
}

pub fn message_hash<T: ?Sized>() -> u32 {
    fnv1a_32(std::any::type_name::<T>())
}

pub fn encode_message<T>(message: &T) -> Result<Vec<u8>, PacketError>
where
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
{
    rkyv::to_bytes::<rancor::Error>(message)
        .map(|aligned| aligned.into_vec())
        .map_err(|e| PacketError::Serialize(e.to_string()))
}

pub fn decode_message<T>(bytes: &[u8]) -> Result<T, PacketError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + Deserialize<T, Strategy<Pool, rancor::Error>>,
{
    // payload buffers carry no alignment guarantee
    let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<T, rancor::Error>(&aligned)
        .map_err(|e| PacketError::Deserialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Archive, Serialize, Deserialize)]
    struct Chat {
        from: u32,
        text: String,
    }

    #[test]
    fn fnv1a_known_vectors() {
        assert_eq!(fnv1a_32(""), 0x811C9DC5);
        assert_eq!(fnv1a_32("a"), 0xE40C292C);
        assert_eq!(fnv1a_32("foobar"), 0xBF9CF968);
    }

    #[test]
    fn message_hash_is_stable_per_type() {
        assert_eq!(message_hash::<Chat>(), message_hash::<Chat>());
        assert_ne!(message_hash::<Chat>(), message_hash::<u32>());
    }

    #[test]
    fn typed_message_survives_encoding() {
        let chat = Chat {
            from: 4,
            text: "gg".to_string(),
        };
        let bytes = encode_message(&chat).unwrap();
        assert_eq!(decode_message::<Chat>(&bytes).unwrap(), chat);
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(decode_message::<Chat>(&[1, 2, 3]).is_err());
    }
}
