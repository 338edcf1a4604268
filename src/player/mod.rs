//! External media player control
//!
//! Commands and property queries over the player's local control socket,
//! the favorites file, the autoplay supervisor and the remote command
//! listener.

mod control;
mod favorites;
mod listener;
mod supervisor;

pub use control::{PlayerCommand, PlayerControl, Property};
pub use favorites::{Favorite, FavoritesStore};
pub use listener::CommandListener;
pub use supervisor::{AutoplaySupervisor, ConversationActivity, SupervisorEvent};
