//! Control messages and the request/response envelope.
//!
//! [`Message`] has one variant per ExtIO entry point plus protocol messages.
//! Request and response share a variant: a request leaves the result-side
//! fields unset, the response fills them in. Unset (`None`) means "no value"
//! on the wire.
//!
//! The envelope actually framed into a packet payload is
//! [`PackagedMessage`], carrying the direction tag and the dialog id that
//! pairs a request with its response. Dialog id 0 is reserved for
//! unsolicited messages such as the IQ-sample stream.
//!
//! Encoding is postcard: variant tags are the declaration indices spelled
//! out below, optional fields cost one presence byte.

use serde::{Deserialize, Serialize};

/// Version carried in the `Hello` exchange. There is no negotiation beyond
/// this field.
pub const PROTOCOL_VERSION: u32 = 1;

/// Envelope direction tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MsgKind {
    Request = 0,
    Response = 1,
}

/// Protocol-level result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    LogicError = 1,
    NotImplemented = 2,
    InvalidArgument = 3,
    DllNotLoaded = 4,
    Unexpected = 5,
}

/// One variant per ExtIO entry point, plus protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Message {
    Hello {
        version: Option<u32>,
        client_name: Option<String>,
    } = 0,
    LoadExtIoApi = 1,
    InitHw {
        result: Option<bool>,
        name: Option<String>,
        model: Option<String>,
        hw_type: Option<i32>,
    } = 2,
    OpenHw {
        result: Option<bool>,
    } = 3,
    SetHwLo {
        result: Option<i32>,
        lo_freq: Option<i32>,
    } = 4,
    SetHwLo64 {
        result: Option<i64>,
        lo_freq: Option<i64>,
    } = 5,
    GetHwSr {
        result: Option<i32>,
    } = 6,
    StartHw {
        result: Option<i32>,
        ext_lo_freq: Option<i32>,
    } = 7,
    StopHw = 8,
    VersionInfo {
        progname: Option<String>,
        ver_major: Option<i32>,
        ver_minor: Option<i32>,
    } = 9,
    GetAttenuators {
        result: Option<i32>,
        atten_idx: Option<i32>,
        attenuation: Option<f32>,
    } = 10,
    GetActualAttIdx {
        result: Option<i32>,
    } = 11,
    ExtIoShowMgc {
        result: Option<i32>,
        agc_idx: Option<i32>,
    } = 12,
    ShowGui = 13,
    HideGui = 14,
    SwitchGui = 15,
    ExtIoGetAgcs {
        result: Option<i32>,
        agc_idx: Option<i32>,
        text: Option<String>,
    } = 16,
    ExtIoGetActualAgcIdx {
        result: Option<i32>,
    } = 17,
    ExtIoGetMgcs {
        result: Option<i32>,
        mgc_idx: Option<i32>,
        gain: Option<f32>,
    } = 18,
    ExtIoGetActualMgcIdx {
        result: Option<i32>,
    } = 19,
    ExtIoGetSrates {
        result: Option<i32>,
        srate_idx: Option<i32>,
        samplerate: Option<f64>,
    } = 20,
    ExtIoGetActualSrateIdx {
        result: Option<i32>,
    } = 21,
    ExtIoSetSrate {
        result: Option<i32>,
        srate_idx: Option<i32>,
    } = 22,
    ExtIoGetBandwidth {
        result: Option<i32>,
        srate_idx: Option<i32>,
    } = 23,
    /// IQ-sample stream payload, server to client, always unsolicited.
    ///
    /// `cnt` may be zero or negative for status-only events; `iqdata` is
    /// present iff `cnt > 0` and then holds `cnt * sample_size` bytes.
    ExtIoCallback {
        cnt: Option<i32>,
        status: Option<i32>,
        iq_offs: Option<f32>,
        iqdata: Option<Vec<u8>>,
    } = 24,
    Error {
        error: ErrorCode,
    } = 25,
    Ping = 26,
}

impl Message {
    /// Error-only reply.
    pub fn error(code: ErrorCode) -> Self {
        Message::Error { error: code }
    }
}

/// Variant name of a message, for logging.
pub fn message_name(msg: &Message) -> &'static str {
    match msg {
        Message::Hello { .. } => "Hello",
        Message::LoadExtIoApi => "LoadExtIoApi",
        Message::InitHw { .. } => "InitHw",
        Message::OpenHw { .. } => "OpenHw",
        Message::SetHwLo { .. } => "SetHwLo",
        Message::SetHwLo64 { .. } => "SetHwLo64",
        Message::GetHwSr { .. } => "GetHwSr",
        Message::StartHw { .. } => "StartHw",
        Message::StopHw => "StopHw",
        Message::VersionInfo { .. } => "VersionInfo",
        Message::GetAttenuators { .. } => "GetAttenuators",
        Message::GetActualAttIdx { .. } => "GetActualAttIdx",
        Message::ExtIoShowMgc { .. } => "ExtIoShowMgc",
        Message::ShowGui => "ShowGui",
        Message::HideGui => "HideGui",
        Message::SwitchGui => "SwitchGui",
        Message::ExtIoGetAgcs { .. } => "ExtIoGetAgcs",
        Message::ExtIoGetActualAgcIdx { .. } => "ExtIoGetActualAgcIdx",
        Message::ExtIoGetMgcs { .. } => "ExtIoGetMgcs",
        Message::ExtIoGetActualMgcIdx { .. } => "ExtIoGetActualMgcIdx",
        Message::ExtIoGetSrates { .. } => "ExtIoGetSrates",
        Message::ExtIoGetActualSrateIdx { .. } => "ExtIoGetActualSrateIdx",
        Message::ExtIoSetSrate { .. } => "ExtIoSetSrate",
        Message::ExtIoGetBandwidth { .. } => "ExtIoGetBandwidth",
        Message::ExtIoCallback { .. } => "ExtIoCallback",
        Message::Error { .. } => "Error",
        Message::Ping => "Ping",
    }
}

/// The envelope framed into a `Message`-typed packet payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagedMessage {
    /// Nonzero for request/response correlation, 0 for unsolicited traffic.
    pub dialog_id: i64,
    pub kind: MsgKind,
    /// Result code for error-only replies (e.g. `LoadExtIoApi`).
    pub resultcode: Option<ErrorCode>,
    pub msg: Message,
}

/// Codec failure for a `PackagedMessage`.
#[derive(Debug)]
pub enum WireError {
    Encode(postcard::Error),
    Decode(postcard::Error),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Encode(e) => write!(f, "message encode failed: {e}"),
            WireError::Decode(e) => write!(f, "message decode failed: {e}"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Encode(e) | WireError::Decode(e) => Some(e),
        }
    }
}

/// Serialize an envelope into a packet payload.
pub fn encode_envelope(envelope: &PackagedMessage) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(envelope).map_err(WireError::Encode)
}

/// Deserialize a packet payload back into an envelope.
///
/// A payload carrying an unknown variant tag fails here; peers report it as
/// an unexpected message and keep reading rather than tearing down.
pub fn decode_envelope(payload: &[u8]) -> Result<PackagedMessage, WireError> {
    postcard::from_bytes(payload).map_err(WireError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(envelope: PackagedMessage) {
        let bytes = encode_envelope(&envelope).unwrap();
        assert_eq!(decode_envelope(&bytes).unwrap(), envelope);
    }

    #[test]
    fn envelope_roundtrips() {
        roundtrip(PackagedMessage {
            dialog_id: 1,
            kind: MsgKind::Request,
            resultcode: None,
            msg: Message::Hello {
                version: Some(PROTOCOL_VERSION),
                client_name: Some("ExtIO_TCP_client".into()),
            },
        });
        roundtrip(PackagedMessage {
            dialog_id: -7,
            kind: MsgKind::Response,
            resultcode: Some(ErrorCode::Success),
            msg: Message::LoadExtIoApi,
        });
        roundtrip(PackagedMessage {
            dialog_id: 3,
            kind: MsgKind::Response,
            resultcode: None,
            msg: Message::SetHwLo {
                result: Some(0),
                lo_freq: None,
            },
        });
        roundtrip(PackagedMessage {
            dialog_id: 0,
            kind: MsgKind::Response,
            resultcode: None,
            msg: Message::ExtIoCallback {
                cnt: Some(512),
                status: Some(0),
                iq_offs: Some(0.0),
                iqdata: Some(vec![0xAB; 2048]),
            },
        });
    }

    #[test]
    fn unset_fields_survive_roundtrip() {
        roundtrip(PackagedMessage {
            dialog_id: 2,
            kind: MsgKind::Request,
            resultcode: None,
            msg: Message::InitHw {
                result: None,
                name: None,
                model: None,
                hw_type: None,
            },
        });
    }

    #[test]
    fn wire_tags_are_stable() {
        // dialog_id 0, Request (tag 0), no resultcode, Ping (tag 26).
        let bytes = encode_envelope(&PackagedMessage {
            dialog_id: 0,
            kind: MsgKind::Request,
            resultcode: None,
            msg: Message::Ping,
        })
        .unwrap();
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 26]);
    }

    #[test]
    fn unknown_variant_tag_is_a_decode_error() {
        // Envelope whose message tag (200) matches no variant.
        let bytes = [0x00, 0x00, 0x00, 200, 1];
        assert!(matches!(
            decode_envelope(&bytes),
            Err(WireError::Decode(_))
        ));
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let bytes = encode_envelope(&PackagedMessage {
            dialog_id: 9,
            kind: MsgKind::Response,
            resultcode: None,
            msg: Message::GetHwSr { result: Some(-1) },
        })
        .unwrap();
        assert!(decode_envelope(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn message_names_match_variants() {
        assert_eq!(message_name(&Message::Ping), "Ping");
        assert_eq!(
            message_name(&Message::ExtIoCallback {
                cnt: None,
                status: None,
                iq_offs: None,
                iqdata: None,
            }),
            "ExtIoCallback"
        );
        assert_eq!(
            message_name(&Message::error(ErrorCode::NotImplemented)),
            "Error"
        );
    }
}
