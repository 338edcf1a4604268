//! Remote live endpoint: wire messages and the duplex transport.
//!
//! The transport is split into `LiveSender`/`LiveReceiver` halves so the
//! session can transmit audio and read events concurrently.

pub mod client;
pub mod messages;

pub use client::{LiveConnection, LiveConnector, LiveReceiver, LiveSender, WebSocketConnector};
pub use messages::{
    ClientMessage, FunctionDeclaration, FunctionResponse, Inbound, ServerMessage, Setup, ToolCall,
};
