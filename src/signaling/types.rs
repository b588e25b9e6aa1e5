use std::fmt;

use rand::Rng;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Signaling errors surfaced by the router and its handlers.
///
/// None of these are fatal to a connection except `MalformedEnvelope`,
/// which the inbound pump treats as a terminal decode failure.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("unrecognized event type: {0}")]
    UnknownEvent(String),

    #[error("bad payload for {kind}: {source}")]
    MalformedPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed event envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("client has not joined a room")]
    NotInRoom,
}

const CLIENT_ID_PREFIX: &[u8] = b"client_";
const CLIENT_ID_LEN: usize = 15;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Client ID: 15-byte fixed array ("client_" + 8 hex)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    bytes: [u8; CLIENT_ID_LEN],
}

impl ClientId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; CLIENT_ID_LEN];
        bytes[..CLIENT_ID_PREFIX.len()].copy_from_slice(CLIENT_ID_PREFIX);

        let value: u32 = rand::rng().random();
        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[CLIENT_ID_PREFIX.len() + i] = HEX_CHARS[nibble];
        }
        Self { bytes }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ClientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// An encoded event frame, cheap to clone across every recipient of a broadcast.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}
