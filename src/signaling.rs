//! WebSocket signaling hub: rooms, chat and WebRTC relay between peers

mod client;
mod handlers;
mod messages;
mod registry;
mod router;
mod types;

pub use client::{Client, Mailbox, serve};
pub use messages::{
    ANSWER, CHANGE_ROOM, ChangeRoom, Event, ICE_CANDIDATE, JOIN_ROOM, JoinRoom, NEW_MESSAGE,
    NEW_PEER, NewMessage, NewPeer, OFFER, ROOM_INFO, RelayTarget, RoomInfo, SEND_MESSAGE,
    SendMessage,
};
pub use registry::Registry;
pub use router::{DEFAULT_SEND_TIMEOUT, Hub};
pub use types::{ClientId, OutboundMessage, SignalingError};
