use std::fmt;

/// External command produced by a tool call, consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCommand {
    /// Find and load a background scene for this keyword
    ChangeScene(String),
    /// Search for the keyword as-is and load the first result
    DirectSearch(String),
    /// Set background player volume (already clamped to 0-100)
    SetVolume(u8),
    /// End the conversation
    QuitTalk,
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChangeScene(keyword) => write!(f, "change_scene:[[{}]]", keyword),
            Self::DirectSearch(keyword) => write!(f, "direct_youtube_search:[[{}]]", keyword),
            Self::SetVolume(volume) => write!(f, "set_volume:[[{}]]", volume),
            Self::QuitTalk => write!(f, "quit_talk"),
        }
    }
}

/// Everything a session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Human-readable status line (connecting, connected, disconnected)
    Status(String),
    /// Handshake done and priming instruction sent
    Connected,
    /// Incremental transcript fragment
    Transcript(String),
    /// First audio payload of an assistant turn arrived
    AssistantAudioStarted,
    /// The assistant finished its turn
    TurnComplete,
    /// Side effect requested by a tool call
    Command(ToolCommand),
    /// A session task failed; the session needs restarting
    Error(String),
    /// Both tasks exited. Sent exactly once per session.
    Finished,
}
