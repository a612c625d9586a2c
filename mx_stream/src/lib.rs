//! Wire format of the engine's control channel.
//!
//! A frame is a 12-byte big-endian header followed by a MessagePack body:
//!
//! | bytes  | field                       |
//! |--------|-----------------------------|
//! | 0..4   | magic `MXCS`                |
//! | 4..6   | protocol version            |
//! | 6..8   | [`MessageKind`]             |
//! | 8..12  | body length, at most [`MAX_PAYLOAD`] |
//!
//! A connection opens with one [`Hello`] from the engine; after that every
//! `Request` frame from the client is answered by exactly one `Reply`.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

pub const HEADER_MAGIC: [u8; 4] = *b"MXCS";

pub const PROTOCOL_VERSION: u16 = 1;

/// Magic, version, kind and length.
pub const HEADER_LEN: usize = 12;

/// Largest body either side will allocate for. Snapshots of big runs stay
/// well below this; anything larger is a broken or hostile peer.
pub const MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Hello = 1,
    Request = 2,
    Reply = 3,
}

impl MessageKind {
    fn from_wire(raw: u16) -> Result<Self, ProtocolError> {
        match raw {
            1 => Ok(Self::Hello),
            2 => Ok(Self::Request),
            3 => Ok(Self::Reply),
            _ => Err(ProtocolError::UnknownMessageKind(raw)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub kind: MessageKind,
    /// Body length in bytes.
    pub length: u32,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut cursor = &mut out[..];
        cursor.put_slice(&HEADER_MAGIC);
        cursor.put_u16(self.version);
        cursor.put_u16(self.kind as u16);
        cursor.put_u32(self.length);
        out
    }

    /// Validates magic, version and length before anything is allocated
    /// for the body.
    pub fn decode(input: &[u8]) -> Result<Self, ProtocolError> {
        if input.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader);
        }
        let mut cursor = &input[..HEADER_LEN];
        if cursor[..4] != HEADER_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        cursor.advance(4);
        let version = cursor.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind = MessageKind::from_wire(cursor.get_u16())?;
        let length = cursor.get_u32();
        if length > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(length as usize));
        }
        Ok(Self {
            version,
            kind,
            length,
        })
    }
}

/// First frame on every connection, sent by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: String,
    pub producer: String,
    pub build: Option<String>,
}

impl Hello {
    pub fn new(producer: impl Into<String>, build: Option<String>) -> Self {
        Self {
            protocol: "MxControl".to_string(),
            producer: producer.into(),
            build,
        }
    }
}

/// Operator commands accepted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Compile `source` and append it behind everything already queued.
    RunStatement { source: String },
    Pause,
    Resume,
    Stop,
    QueryState,
    /// Keep the worker alive after the script ends (or release it).
    KeepOpen { enabled: bool },
}

/// Answer to a single [`ControlRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlReply {
    Ack,
    Rejected { error: String },
    State(StateSnapshot),
}

/// Executor mode as seen from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeLabel {
    Running,
    Paused,
    AwaitingInteraction,
    Finished,
    Failed,
}

/// Point-in-time view of a run, produced by the worker between statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub mode: ModeLabel,
    pub position: usize,
    pub length: usize,
    pub keep_open: bool,
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header smaller than {HEADER_LEN} bytes")]
    TruncatedHeader,
    #[error("not a control frame (bad magic)")]
    BadMagic,
    #[error("protocol version {0} is not supported (expected {PROTOCOL_VERSION})")]
    UnsupportedVersion(u16),
    #[error("message kind {0} is unknown")]
    UnknownMessageKind(u16),
    #[error("body of {0} bytes exceeds the {MAX_PAYLOAD}-byte limit")]
    PayloadTooLarge(usize),
    #[error("header declared a {expected}-byte body but {actual} bytes followed")]
    LengthMismatch { expected: u32, actual: usize },
    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] rmp_serde::decode::Error),
    #[error("payload encode error: {0}")]
    PayloadEncode(#[from] rmp_serde::encode::Error),
}

/// Serializes `payload` and prepends its header.
pub fn encode_message<T>(kind: MessageKind, payload: &T) -> Result<Vec<u8>, ProtocolError>
where
    T: Serialize,
{
    let body = rmp_serde::to_vec_named(payload)?;
    let length = u32::try_from(body.len())
        .ok()
        .filter(|&length| length <= MAX_PAYLOAD)
        .ok_or(ProtocolError::PayloadTooLarge(body.len()))?;
    let header = MessageHeader {
        version: PROTOCOL_VERSION,
        kind,
        length,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.put_slice(&header.encode());
    out.put_slice(&body);
    Ok(out)
}

/// Splits a complete frame into header and body.
pub fn decode_envelope(bytes: &[u8]) -> Result<(MessageHeader, &[u8]), ProtocolError> {
    let header = MessageHeader::decode(bytes)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() != header.length as usize {
        return Err(ProtocolError::LengthMismatch {
            expected: header.length,
            actual: body.len(),
        });
    }
    Ok((header, body))
}

pub fn decode_payload<T>(payload: &[u8]) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    Ok(rmp_serde::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_statement_request_survives_framing() -> Result<(), ProtocolError> {
        let request = ControlRequest::RunStatement {
            source: "alpha = 0.05".to_string(),
        };
        let bytes = encode_message(MessageKind::Request, &request)?;
        let (header, payload) = decode_envelope(&bytes)?;
        assert_eq!(header.kind, MessageKind::Request);
        assert_eq!(decode_payload::<ControlRequest>(payload)?, request);
        Ok(())
    }

    #[test]
    fn header_rejects_foreign_magic() {
        let mut header = MessageHeader {
            version: PROTOCOL_VERSION,
            kind: MessageKind::Reply,
            length: 0,
        }
        .encode();
        header[0] = b'G';
        assert!(matches!(
            MessageHeader::decode(&header),
            Err(ProtocolError::BadMagic)
        ));
    }

    #[test]
    fn header_rejects_other_protocol_versions() {
        let header = MessageHeader {
            version: PROTOCOL_VERSION + 1,
            kind: MessageKind::Request,
            length: 0,
        }
        .encode();
        assert!(matches!(
            MessageHeader::decode(&header),
            Err(ProtocolError::UnsupportedVersion(v)) if v == PROTOCOL_VERSION + 1
        ));
    }

    #[test]
    fn oversized_bodies_are_refused_from_the_header_alone() {
        let header = MessageHeader {
            version: PROTOCOL_VERSION,
            kind: MessageKind::Request,
            length: MAX_PAYLOAD + 1,
        }
        .encode();
        assert!(matches!(
            MessageHeader::decode(&header),
            Err(ProtocolError::PayloadTooLarge(_))
        ));

        let huge = ControlRequest::RunStatement {
            source: "x".repeat(MAX_PAYLOAD as usize),
        };
        assert!(matches!(
            encode_message(MessageKind::Request, &huge),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn unknown_kinds_are_named_in_the_error() {
        let mut header = MessageHeader {
            version: PROTOCOL_VERSION,
            kind: MessageKind::Hello,
            length: 0,
        }
        .encode();
        header[7] = 9;
        assert!(matches!(
            MessageHeader::decode(&header),
            Err(ProtocolError::UnknownMessageKind(9))
        ));
    }

    #[test]
    fn envelope_detects_truncated_payload() -> Result<(), ProtocolError> {
        let bytes = encode_message(MessageKind::Request, &ControlRequest::Pause)?;
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            decode_envelope(truncated),
            Err(ProtocolError::LengthMismatch { .. })
        ));
        assert!(matches!(
            decode_envelope(&bytes[..4]),
            Err(ProtocolError::TruncatedHeader)
        ));
        Ok(())
    }
}
