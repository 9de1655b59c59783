//! Transport core for ExtIO-over-TCP.
//!
//! - [`channel`]: the framed packet channel: header + CRC framing over any
//!   `AsyncRead + AsyncWrite` stream, with TCP connect/attach helpers.
//! - [`dialog`]: the dialog driver that correlates requests with responses
//!   over one channel and routes unsolicited traffic to the session.
//! - [`alive`]: the alive-guard primitive used by continuations that may
//!   outlive their owner.

pub mod alive;
pub mod channel;
pub mod dialog;
mod error;

pub use alive::{AliveFlag, AliveGuard};
pub use channel::{set_keep_alive, Packet, PacketChannel, PacketReader, PacketWriter};
pub use dialog::{start as start_dialog, DialogHandle, DialogReply, InboundMessage};
pub use error::{ChannelError, DialogError};
