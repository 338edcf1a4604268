// Tool-call dispatch
//
// The remote service invokes four local capabilities. Each call is turned
// into a `ToolCommand` event for the orchestrator and answered with exactly
// one `FunctionResponse` carrying the call's id. Calls with a missing or
// unusable argument get an error response and cause no side effect. Calls to
// unknown tools are acknowledged as ok and otherwise ignored.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::events::{SessionEvent, ToolCommand};
use crate::live::{FunctionDeclaration, FunctionResponse, ToolCall};

pub const CHANGE_SCENE: &str = "change_scene";
pub const DIRECT_YOUTUBE_SEARCH: &str = "direct_youtube_search";
pub const SET_VOLUME: &str = "set_volume";
pub const QUIT_TALK: &str = "quit_talk";

/// Result of dispatching one receive cycle's batch of tool calls
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// One response per call, in call order
    pub responses: Vec<FunctionResponse>,
    /// A `quit_talk` call was part of the batch
    pub quit: bool,
}

pub struct ToolDispatcher {
    volume: Arc<AtomicU8>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ToolDispatcher {
    pub fn new(volume: Arc<AtomicU8>, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { volume, events }
    }

    pub fn current_volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    /// Dispatch every call in arrival order.
    pub fn dispatch_batch(&self, calls: &[ToolCall]) -> DispatchOutcome {
        let mut quit = false;
        let responses = calls
            .iter()
            .map(|call| {
                let (response, is_quit) = self.dispatch(call);
                quit |= is_quit;
                response
            })
            .collect();

        DispatchOutcome { responses, quit }
    }

    /// Dispatch one call. The flag is `true` for a successful `quit_talk`.
    pub fn dispatch(&self, call: &ToolCall) -> (FunctionResponse, bool) {
        info!("Tool call {} ({}) args={:?}", call.name, call.id, call.args);

        let command = match call.name.as_str() {
            CHANGE_SCENE => string_arg(call, "keyword").map(ToolCommand::ChangeScene),
            DIRECT_YOUTUBE_SEARCH => string_arg(call, "keyword").map(ToolCommand::DirectSearch),
            SET_VOLUME => volume_arg(call).map(|v| {
                self.volume.store(v, Ordering::SeqCst);
                ToolCommand::SetVolume(v)
            }),
            QUIT_TALK => Ok(ToolCommand::QuitTalk),
            other => {
                warn!("Ignoring unknown tool `{}` ({})", other, call.id);
                return (respond(call, json!({ "result": "ok" })), false);
            }
        };

        match command {
            Ok(command) => {
                let quit = command == ToolCommand::QuitTalk;
                let _ = self.events.send(SessionEvent::Command(command));
                (respond(call, json!({ "result": "ok" })), quit)
            }
            Err(reason) => {
                warn!("Rejecting tool call {} ({}): {}", call.name, call.id, reason);
                (respond(call, json!({ "error": reason })), false)
            }
        }
    }
}

fn respond(call: &ToolCall, response: Value) -> FunctionResponse {
    FunctionResponse {
        id: call.id.clone(),
        name: call.name.clone(),
        response,
    }
}

fn string_arg(call: &ToolCall, name: &str) -> Result<String, String> {
    match call.args.get(name).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(format!("missing argument `{}`", name)),
    }
}

/// Accepts a number or numeric string, clamped to 0-100.
fn volume_arg(call: &ToolCall) -> Result<u8, String> {
    let raw = match call.args.get("volume") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => Ok(v.round().clamp(0.0, 100.0) as u8),
        _ => Err("missing argument `volume`".to_string()),
    }
}

/// Function declarations advertised in the setup message
pub fn function_declarations() -> Vec<FunctionDeclaration> {
    let keyword_schema = |what: &str| {
        json!({
            "type": "OBJECT",
            "properties": {
                "keyword": { "type": "STRING", "description": what }
            },
            "required": ["keyword"]
        })
    };

    vec![
        FunctionDeclaration {
            name: CHANGE_SCENE.to_string(),
            description: "Change the background scenery video shown in the window.".to_string(),
            parameters: Some(keyword_schema(
                "Short scenery description to search for, e.g. 'Kyoto rain' or 'Swiss Alps snow'.",
            )),
        },
        FunctionDeclaration {
            name: DIRECT_YOUTUBE_SEARCH.to_string(),
            description: "Search YouTube for exactly what the user asked for (music, a channel, a specific video) and play the first result.".to_string(),
            parameters: Some(keyword_schema("Search query.")),
        },
        FunctionDeclaration {
            name: SET_VOLUME.to_string(),
            description: "Set the background video volume.".to_string(),
            parameters: Some(json!({
                "type": "OBJECT",
                "properties": {
                    "volume": { "type": "INTEGER", "description": "Volume from 0 to 100." }
                },
                "required": ["volume"]
            })),
        },
        FunctionDeclaration {
            name: QUIT_TALK.to_string(),
            description: "End the voice conversation when the user says goodbye or asks to stop talking.".to_string(),
            parameters: None,
        },
    ]
}

/// Priming turn sent once after connecting, before any user audio.
pub fn build_instructions(current_volume: u8) -> String {
    format!(
        "You are the assistant living inside a smart window that shows relaxing \
         scenery videos from around the world. Speak warmly and briefly.\n\
         Tools:\n\
         - {change}(keyword): when the user wants to travel, see somewhere else, or change the view.\n\
         - {search}(keyword): when the user asks for a specific video, song or channel.\n\
         - {volume}(volume): when the user wants the background louder or quieter. \
         The current background volume is {current}; adjust relative requests from it.\n\
         - {quit}(): when the user says goodbye or wants to stop talking.\n\
         Always say a short sentence about what you are doing when you use a tool.",
        change = CHANGE_SCENE,
        search = DIRECT_YOUTUBE_SEARCH,
        volume = SET_VOLUME,
        quit = QUIT_TALK,
        current = current_volume,
    )
}
