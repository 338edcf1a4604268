use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::control::PlayerControl;
use super::favorites::FavoritesStore;

/// Tells the supervisor whether a voice conversation is in progress
pub trait ConversationActivity: Send + Sync {
    fn in_conversation(&self) -> bool;
}

impl ConversationActivity for AtomicBool {
    fn in_conversation(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The loaded media changed; `path` is `None` when nothing is loaded
    FavoriteState {
        path: Option<String>,
        is_favorite: bool,
    },
    /// Idle player was given a random favorite
    Autoplay { url: String },
}

/// Periodic player poll: publishes favorites state for the loaded media and
/// starts a random favorite when the player goes idle outside a conversation.
pub struct AutoplaySupervisor {
    control: PlayerControl,
    favorites: FavoritesStore,
    activity: Arc<dyn ConversationActivity>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    interval: Duration,
    rng: StdRng,
    last_path: Option<Option<String>>,
    autoplaying: bool,
}

impl AutoplaySupervisor {
    pub fn new(
        control: PlayerControl,
        favorites: FavoritesStore,
        activity: Arc<dyn ConversationActivity>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
        interval: Duration,
    ) -> Self {
        Self {
            control,
            favorites,
            activity,
            events,
            interval,
            rng: StdRng::from_entropy(),
            last_path: None,
            autoplaying: false,
        }
    }

    /// Replace the random source (deterministic picks in tests)
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn is_autoplaying(&self) -> bool {
        self.autoplaying
    }

    /// One poll cycle.
    pub async fn tick(&mut self) {
        let path = self.control.get_property("path").await.string();
        if self.last_path.as_ref() != Some(&path) {
            let is_favorite = match &path {
                Some(p) => self.favorites.contains(p).unwrap_or_else(|e| {
                    warn!("Favorites lookup failed: {:#}", e);
                    false
                }),
                None => false,
            };
            debug!("Loaded media changed: {:?} (favorite: {})", path, is_favorite);
            let _ = self.events.send(SupervisorEvent::FavoriteState {
                path: path.clone(),
                is_favorite,
            });
            self.last_path = Some(path);
        }

        let idle = self.control.get_property("idle-active").await.bool_or(false);
        if !idle {
            if self.autoplaying {
                debug!("Player busy, autoplay latch released");
            }
            self.autoplaying = false;
            return;
        }

        if self.autoplaying || self.activity.in_conversation() {
            return;
        }
        self.autoplaying = true;

        let url = match self.favorites.random(&mut self.rng) {
            Ok(Some(url)) => url,
            Ok(None) => {
                warn!("Player idle but favorites list is empty");
                return;
            }
            Err(e) => {
                warn!("Failed to read favorites: {:#}", e);
                self.autoplaying = false;
                return;
            }
        };

        info!("Player idle, autoplaying {}", url);
        if self.control.load(&url).await {
            let _ = self.events.send(SupervisorEvent::Autoplay { url });
        } else {
            // retry on a later tick
            self.autoplaying = false;
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Autoplay supervisor started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        info!("Autoplay supervisor stopped");
    }
}
