use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ClientId, OutboundMessage, SignalingError};

pub const SEND_MESSAGE: &str = "send_message";
pub const NEW_MESSAGE: &str = "new_message";
pub const CHANGE_ROOM: &str = "change_room";
pub const JOIN_ROOM: &str = "join_room";
pub const ROOM_INFO: &str = "room_info";
pub const NEW_PEER: &str = "new_peer";
pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const ICE_CANDIDATE: &str = "ice_candidate";

/// Wire envelope: `{"type": ..., "payload": ...}`.
///
/// The type tag stays a plain string so that an unknown kind still decodes
/// and can be rejected by the router without tearing down the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl Event {
    pub fn new<T: Serialize>(kind: &str, payload: &T) -> Result<Self, SignalingError> {
        let payload = serde_json::to_value(payload).map_err(SignalingError::Encode)?;
        Ok(Self {
            kind: kind.to_string(),
            payload,
        })
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalingError> {
        serde_json::from_slice(data).map_err(SignalingError::MalformedEnvelope)
    }

    pub fn encode(&self) -> Result<OutboundMessage, SignalingError> {
        serde_json::to_string(self)
            .map(OutboundMessage::from)
            .map_err(SignalingError::Encode)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Decode the payload into the schema for this event's kind.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, SignalingError> {
        T::deserialize(&self.payload).map_err(|source| SignalingError::MalformedPayload {
            kind: self.kind.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
    pub message: String,
    #[serde(default)]
    pub from: String,
}

/// Server to client only: a chat line stamped with the time the hub relayed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub message: String,
    pub from: String,
    pub sent: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRoom {
    #[serde(alias = "name")]
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoom {
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Membership snapshot sent to every member when someone joins. `user_id`
/// names the joiner, which is how a fresh client learns its own identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomInfo {
    pub room: String,
    pub user_id: ClientId,
    pub users: Vec<ClientId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPeer {
    pub room: String,
    pub user_id: ClientId,
}

/// The only field the hub reads from `offer`, `answer` and `ice_candidate`.
/// The rest of the payload is forwarded as the sender wrote it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelayTarget {
    pub to: String,
}
