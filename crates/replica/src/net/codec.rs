use glam::Vec3;

pub const MAX_STRING_LEN: usize = 1024;
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;
pub const MAX_ID_LIST_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("buffer truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown packet tag {0}")]
    UnknownTag(u8),
    #[error("invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u32 },
    #[error("length prefix {0} exceeds limit")]
    LengthTooLarge(usize),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
    #[error("message serialization failed: {0}")]
    Serialize(String),
    #[error("message deserialization failed: {0}")]
    Deserialize(String),
}

#[derive(Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// u16 length prefix followed by the utf-8 bytes, truncated to `MAX_STRING_LEN`.
    pub fn write_string(&mut self, value: &str) {
        let mut end = value.len().min(MAX_STRING_LEN);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.write_u16(end as u16);
        self.buffer.extend_from_slice(&value.as_bytes()[..end]);
    }

    pub fn write_payload(&mut self, payload: &[u8]) {
        self.write_u32(payload.len() as u32);
        self.buffer.extend_from_slice(payload);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], PacketError> {
        if self.remaining() < count {
            return Err(PacketError::Truncated {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, PacketError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(PacketError::InvalidValue {
                field: "bool",
                value: value.into(),
            }),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, PacketError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, PacketError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, PacketError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        self.take_array()
    }

    pub fn read_string(&mut self) -> Result<String, PacketError> {
        let len = self.read_u16()? as usize;
        if len > MAX_STRING_LEN {
            return Err(PacketError::LengthTooLarge(len));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PacketError::InvalidUtf8)
    }

    pub fn read_payload(&mut self) -> Result<Vec<u8>, PacketError> {
        let len = self.read_u32()? as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(PacketError::LengthTooLarge(len));
        }
        Ok(self.take(len)?.to_vec())
    }

    pub fn finish(&self) -> Result<(), PacketError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(PacketError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut writer = ByteWriter::new();
        writer.write_u16(0x0102);
        writer.write_u32(0x03040506);
        assert_eq!(writer.into_bytes(), vec![0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn truncated_read_is_reported() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert_eq!(
            reader.read_u32(),
            Err(PacketError::Truncated {
                needed: 4,
                remaining: 3
            })
        );
    }

    #[test]
    fn string_length_prefix() {
        let mut writer = ByteWriter::new();
        writer.write_string("Alice");
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..2], &[5, 0]);

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_string().unwrap(), "Alice");
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn oversize_string_prefix_rejected() {
        let mut writer = ByteWriter::new();
        writer.write_u16((MAX_STRING_LEN + 1) as u16);
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(
            reader.read_string(),
            Err(PacketError::LengthTooLarge(MAX_STRING_LEN + 1))
        );
    }

    #[test]
    fn invalid_bool_rejected() {
        let mut reader = ByteReader::new(&[2]);
        assert!(matches!(
            reader.read_bool(),
            Err(PacketError::InvalidValue { field: "bool", .. })
        ));
    }
}
