//! Wire-level types for the ExtIO-over-TCP protocol.
//!
//! Canonical layering, innermost first:
//!
//! - [`packet`]: the fixed 17-byte framing header (`type`/`size`/`crc`/`id`)
//!   that delimits everything on the socket.
//! - [`message`]: the control-message union (one variant per ExtIO entry
//!   point plus protocol messages) and the [`PackagedMessage`] envelope that
//!   carries the dialog id used for request/response correlation.
//! - [`hw`]: ExtIO hardware-type and status constants shared by both ends.
//!
//! Variant tags and field order in this crate are the wire contract between
//! client and server builds; they must not be reordered.

pub mod hw;
pub mod message;
pub mod packet;

pub use message::{
    decode_envelope, encode_envelope, message_name, ErrorCode, Message, MsgKind, PackagedMessage,
    WireError, PROTOCOL_VERSION,
};
pub use packet::{crc32, PacketHeader, PacketType, HEADER_LEN, MAX_PAYLOAD_SIZE};
