//! Atomic session state machine.
//!
//! `CONNECTING -> READY -> ACTIVE -> STOPPING -> CLOSED`, shared between the
//! session handle, its tasks and whoever polls `is_live`.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Transport handshake in progress
    Connecting = 0,
    /// Connected and primed, tasks not yet running
    Ready = 1,
    /// Sender and receiver running
    Active = 2,
    /// Stop requested; tasks exit at their next check point
    Stopping = 3,
    /// Both tasks exited
    Closed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Ready,
            2 => Self::Active,
            3 => Self::Stopping,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug)]
pub struct SessionStateMachine {
    state: AtomicU8,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    pub fn current(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Connecting -> Ready
    pub fn connected(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Ready)
    }

    /// Ready -> Active
    pub fn activate(&self) -> bool {
        self.transition(SessionState::Ready, SessionState::Active)
    }

    /// Any live state -> Stopping. Returns `false` if already stopping or closed.
    pub fn begin_stop(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Stopping as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Terminal. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::AcqRel) != SessionState::Closed as u8
    }

    /// Connecting, ready or active
    pub fn is_live(&self) -> bool {
        self.current() < SessionState::Stopping
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let sm = SessionStateMachine::new();
        assert_eq!(sm.current(), SessionState::Connecting);
        assert!(sm.connected());
        assert!(sm.activate());
        assert!(sm.is_live());
        assert!(sm.begin_stop());
        assert!(!sm.is_live());
        assert!(sm.close());
        assert_eq!(sm.current(), SessionState::Closed);
    }

    #[test]
    fn stop_and_close_are_single_shot() {
        let sm = SessionStateMachine::new();
        assert!(sm.begin_stop());
        assert!(!sm.begin_stop());
        assert!(!sm.activate());
        assert!(sm.close());
        assert!(!sm.close());
        assert!(!sm.begin_stop());
    }
}
