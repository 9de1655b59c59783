use extio_wire::WireError;

/// Error from the framed packet channel.
///
/// After any of these the channel is unusable; reconnecting means building
/// a fresh one.
#[derive(Debug)]
pub enum ChannelError {
    /// Socket-level failure (resolve, connect, read, write).
    Io(std::io::Error),
    /// DNS resolution produced no usable IPv4 endpoint.
    NoAddress,
    /// Read head carried a type byte that is neither RawData nor Message.
    BadPacketType(u8),
    /// Announced payload size exceeds the 1 MiB limit.
    PayloadTooLarge(u32),
    /// Payload checksum did not match the header.
    CrcMismatch { expected: u32, actual: u32 },
    /// Peer closed the connection.
    Closed,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Io(e) => write!(f, "io error: {e}"),
            ChannelError::NoAddress => write!(f, "no IPv4 endpoint resolved"),
            ChannelError::BadPacketType(b) => write!(f, "bad packet type byte: {b:#04x}"),
            ChannelError::PayloadTooLarge(size) => {
                write!(f, "payload size {size} exceeds the 1 MiB limit")
            }
            ChannelError::CrcMismatch { expected, actual } => {
                write!(f, "payload crc mismatch: header {expected:#010x}, computed {actual:#010x}")
            }
            ChannelError::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Io(e)
    }
}

/// Error from a dialog operation.
#[derive(Debug)]
pub enum DialogError {
    /// Request/response/message could not be serialized.
    Encode(WireError),
    /// The connection died before the operation completed.
    ConnectionClosed,
    /// The driver task is gone.
    DriverGone,
}

impl std::fmt::Display for DialogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogError::Encode(e) => write!(f, "encode error: {e}"),
            DialogError::ConnectionClosed => write!(f, "connection closed"),
            DialogError::DriverGone => write!(f, "dialog driver stopped"),
        }
    }
}

impl std::error::Error for DialogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DialogError::Encode(e) => Some(e),
            _ => None,
        }
    }
}
