//! Message encodings for the terminal transport.
//!
//! A connection negotiates one [`Encoding`] at upgrade time. JSON messages
//! travel in text frames, MessagePack messages in binary frames.

use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, Result};
use crate::messages::Message;

/// An encoded message ready to be placed in a transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

/// Encoding negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON in text frames; byte payloads are base64 strings.
    #[default]
    Json,
    /// MessagePack in binary frames; byte payloads are native binary.
    MessagePack,
}

impl Encoding {
    /// Returns the name used in the `encoding` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::MessagePack => "msgpack",
        }
    }

    /// Encodes a message into the frame type this encoding uses.
    pub fn encode(&self, message: &Message) -> Result<WireFrame> {
        match self {
            Encoding::Json => Ok(WireFrame::Text(serde_json::to_string(message)?)),
            Encoding::MessagePack => Ok(WireFrame::Binary(rmp_serde::to_vec(message)?)),
        }
    }

    /// Decodes a text frame.
    pub fn decode_text(&self, text: &str) -> Result<Message> {
        match self {
            Encoding::Json => Ok(serde_json::from_str(text)?),
            Encoding::MessagePack => Err(ProtocolError::EncodingMismatch {
                expected: self.as_str(),
                got: Encoding::Json.as_str(),
            }),
        }
    }

    /// Decodes a binary frame.
    pub fn decode_binary(&self, bytes: &[u8]) -> Result<Message> {
        match self {
            Encoding::MessagePack => Ok(rmp_serde::from_slice(bytes)?),
            Encoding::Json => Err(ProtocolError::EncodingMismatch {
                expected: self.as_str(),
                got: Encoding::MessagePack.as_str(),
            }),
        }
    }

    /// Decodes a frame of either type.
    pub fn decode(&self, frame: &WireFrame) -> Result<Message> {
        match frame {
            WireFrame::Text(text) => self.decode_text(text),
            WireFrame::Binary(bytes) => self.decode_binary(bytes),
        }
    }
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "msgpack" | "messagepack" => Ok(Encoding::MessagePack),
            other => Err(ProtocolError::UnknownEncoding(other.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
