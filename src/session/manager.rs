use std::sync::{Arc, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::config::SessionConfig;
use super::session::{LiveSession, SessionIo};
use super::state::SessionState;
use super::stats::SessionStats;
use crate::live::LiveConnector;
use crate::player::ConversationActivity;

/// Keeps at most one live session.
///
/// Starting a new session signals the previous one to stop and hands its
/// teardown to a task tracker; `start` never waits for the old tasks, but
/// `wait_retired` can.
pub struct SessionManager {
    connector: Arc<dyn LiveConnector>,
    current: Mutex<Option<Arc<LiveSession>>>,
    retired: TaskTracker,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn LiveConnector>) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
            retired: TaskTracker::new(),
        }
    }

    /// Start a session, retiring whichever one was active.
    pub fn start(&self, config: SessionConfig, io: SessionIo) -> Arc<LiveSession> {
        let session = Arc::new(LiveSession::start(config, Arc::clone(&self.connector), io));

        let previous = match self.current.lock() {
            Ok(mut current) => current.replace(Arc::clone(&session)),
            Err(poisoned) => poisoned.into_inner().replace(Arc::clone(&session)),
        };
        if let Some(old) = previous {
            self.retire(old);
        }

        session
    }

    /// Stop the active session, if any. Safe to call repeatedly.
    pub fn stop(&self) {
        let previous = match self.current.lock() {
            Ok(mut current) => current.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match previous {
            Some(old) => self.retire(old),
            None => info!("No active session to stop"),
        }
    }

    fn retire(&self, session: Arc<LiveSession>) {
        info!("Retiring session {} ({})", session.id(), session.state());
        session.stop();
        self.retired.spawn(async move {
            session.join().await;
            if session.state() != SessionState::Closed {
                warn!("Session {} exited in state {}", session.id(), session.state());
            }
        });
    }

    /// Wait for every retired session to finish tearing down.
    pub async fn wait_retired(&self) {
        self.retired.close();
        self.retired.wait().await;
        self.retired.reopen();
    }

    pub fn current(&self) -> Option<Arc<LiveSession>> {
        match self.current.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn stats(&self) -> Option<SessionStats> {
        self.current().map(|s| s.stats())
    }

    /// Whether a conversation is in progress
    pub fn is_live(&self) -> bool {
        self.current().map(|s| s.is_live()).unwrap_or(false)
    }
}

impl ConversationActivity for SessionManager {
    fn in_conversation(&self) -> bool {
        self.is_live()
    }
}
