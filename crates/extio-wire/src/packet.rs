//! Packet framing header.
//!
//! Every unit on the wire is a fixed little-endian header followed by
//! `size` payload bytes:
//!
//! ```text
//! ┌──────────┬────────────┬───────────┬──────────┬─────────┐
//! │ type: u8 │ size: u32  │ crc: u32  │ id: u64  │ payload │
//! └──────────┴────────────┴───────────┴──────────┴─────────┘
//! ```
//!
//! `crc` is the CRC-32 (ISO 3309) of the payload, `id` a per-direction
//! monotonic counter assigned by the sender starting at 0.

/// Size of the fixed packet header in bytes.
pub const HEADER_LEN: usize = 17;

/// Maximum payload size; anything larger is a protocol error.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// CRC-32 of a payload. The empty payload hashes to the CRC-32 identity (0).
pub fn crc32(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Discriminates the two payload kinds carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    RawData = 0,
    Message = 1,
}

impl PacketType {
    /// Parse the on-wire type byte. Returns the offending byte on failure.
    pub fn from_wire(byte: u8) -> Result<Self, u8> {
        match byte {
            0 => Ok(PacketType::RawData),
            1 => Ok(PacketType::Message),
            other => Err(other),
        }
    }
}

/// Decoded form of the fixed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketType,
    pub size: u32,
    pub crc: u32,
    pub id: u64,
}

impl PacketHeader {
    /// Serialize into the on-wire little-endian layout.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.kind as u8;
        buf[1..5].copy_from_slice(&self.size.to_le_bytes());
        buf[5..9].copy_from_slice(&self.crc.to_le_bytes());
        buf[9..17].copy_from_slice(&self.id.to_le_bytes());
        buf
    }

    /// Parse a header. Fails with the raw type byte if it is not a known
    /// packet type; size and CRC validation is the channel's job.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, u8> {
        let kind = PacketType::from_wire(buf[0])?;
        let mut size = [0u8; 4];
        size.copy_from_slice(&buf[1..5]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&buf[5..9]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[9..17]);
        Ok(PacketHeader {
            kind,
            size: u32::from_le_bytes(size),
            crc: u32::from_le_bytes(crc),
            id: u64::from_le_bytes(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = PacketHeader {
            kind: PacketType::Message,
            size: 0x01020304,
            crc: 0xDEADBEEF,
            id: 0x1122334455667788,
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(PacketHeader::decode(&bytes), Ok(header));
    }

    #[test]
    fn header_layout_is_little_endian() {
        let header = PacketHeader {
            kind: PacketType::RawData,
            size: 2,
            crc: 0x00000103,
            id: 5,
        };
        let bytes = header.encode();
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..5], &[2, 0, 0, 0]);
        assert_eq!(&bytes[5..9], &[3, 1, 0, 0]);
        assert_eq!(&bytes[9..17], &[5, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn bad_type_byte_is_rejected() {
        let mut bytes = PacketHeader {
            kind: PacketType::Message,
            size: 0,
            crc: 0,
            id: 0,
        }
        .encode();
        bytes[0] = 7;
        assert_eq!(PacketHeader::decode(&bytes), Err(7));
    }

    #[test]
    fn crc_of_empty_payload_is_identity() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn crc_known_vector() {
        // The standard CRC-32 check value.
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }
}
