//! Parley: a WebSocket signaling hub for browser chat rooms and WebRTC calls

pub mod config;
pub mod otp;
pub mod server;
pub mod signaling;
