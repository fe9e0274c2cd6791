//! Terminal transport message definitions.
//!
//! Every frame exchanged on a terminal connection carries exactly one
//! [`Message`]. Messages are adjacently tagged (`{"type": ..., "data": ...}`)
//! so the same definitions work for the JSON and MessagePack encodings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Message {
    /// Keystrokes from the client, written verbatim to the shell.
    Input(Payload),
    /// Bytes produced by the shell, delivered verbatim to the client.
    Output(Payload),
    /// Terminal geometry change requested by the client.
    Resize(Resize),
}

impl Message {
    /// Builds an `input` message.
    pub fn input(data: impl Into<Vec<u8>>) -> Self {
        Message::Input(Payload(data.into()))
    }

    /// Builds an `output` message.
    pub fn output(data: impl Into<Vec<u8>>) -> Self {
        Message::Output(Payload(data.into()))
    }

    /// Builds a `resize` message.
    pub fn resize(cols: i32, rows: i32) -> Self {
        Message::Resize(Resize { cols, rows })
    }

    /// Returns the wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Input(_) => "input",
            Message::Output(_) => "output",
            Message::Resize(_) => "resize",
        }
    }
}

/// Terminal resize request.
///
/// Dimensions are signed so that non-positive values sent by a client reach
/// the bridge and are rejected there rather than failing to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    /// Requested terminal columns.
    pub cols: i32,
    /// Requested terminal rows.
    pub rows: i32,
}

/// Raw terminal bytes.
///
/// Serialized as a native byte string in binary encodings and as a base64
/// string in human-readable encodings, so arbitrary (non UTF-8) output
/// survives a JSON round trip unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    /// Returns the payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the payload, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload(bytes.to_vec())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let encoded = String::deserialize(deserializer)?;
            BASE64
                .decode(encoded.as_bytes())
                .map(Payload)
                .map_err(serde::de::Error::custom)
        } else {
            serde_bytes::ByteBuf::deserialize(deserializer).map(|buf| Payload(buf.into_vec()))
        }
    }
}
