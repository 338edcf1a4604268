//! Live conversation sessions
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - The duplex connection to the remote voice endpoint
//! - Batching microphone audio into transmit frames
//! - Demultiplexing transcript, speech and tool calls
//! - Tool dispatch and acknowledgement
//! - Session state, statistics and teardown

mod config;
mod events;
mod manager;
mod session;
mod state;
mod stats;
pub mod tools;

pub use config::SessionConfig;
pub use events::{SessionEvent, ToolCommand};
pub use manager::SessionManager;
pub use session::{LiveSession, SessionIo};
pub use state::{SessionState, SessionStateMachine};
pub use stats::SessionStats;
pub use tools::{DispatchOutcome, ToolDispatcher};
