use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

// ============================================================================
// Client -> server
// ============================================================================

/// Messages sent to the remote duplex endpoint.
///
/// Serialized externally tagged, e.g. `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// One complete user text turn (used for the priming instruction)
    pub fn text_turn(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::user_text(text)],
            turn_complete: true,
        })
    }

    /// One transmit frame of raw PCM
    pub fn audio(pcm: &[u8], mime_type: impl Into<String>) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: mime_type.into(),
                data: base64::engine::general_purpose::STANDARD.encode(pcm),
            }],
        })
    }

    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        ClientMessage::ToolResponse(ToolResponse { function_responses })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

impl GenerationConfig {
    pub fn audio(voice_name: impl Into<String>) -> Self {
        Self {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice_name.into(),
                    },
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Acknowledgement for one tool call, matched by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl FunctionResponse {
    pub fn is_success(&self) -> bool {
        self.response.get("error").is_none()
    }
}

// ============================================================================
// Shared content types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload tagged with its MIME type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

// ============================================================================
// Server -> client
// ============================================================================

/// One inbound message; every field is optional and unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallBatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    #[serde(default)]
    pub function_calls: Vec<ToolCall>,
}

/// A request from the remote service to invoke a local capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// What the receiver acts on, decoded from one `ServerMessage`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SetupComplete,
    /// Incremental transcript fragment; never assumed to be a complete sentence
    Text(String),
    /// Decoded PCM bytes for the playback sink
    Audio(Vec<u8>),
    ToolCalls(Vec<ToolCall>),
    TurnComplete,
    Interrupted,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Demultiplex into receiver events, in the order they should be handled.
    ///
    /// Text parts are joined into one fragment and audio parts into one
    /// payload. Audio that fails to decode is dropped with a warning.
    pub fn into_inbound(self) -> Vec<Inbound> {
        let mut out = Vec::new();

        if self.setup_complete.is_some() {
            out.push(Inbound::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                out.push(Inbound::Interrupted);
            }

            if let Some(turn) = content.model_turn {
                let mut text = String::new();
                let mut audio = Vec::new();

                for part in turn.parts {
                    if let Some(t) = part.text {
                        text.push_str(&t);
                    }
                    if let Some(blob) = part.inline_data {
                        if !blob.mime_type.starts_with("audio/") {
                            continue;
                        }
                        match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                            Ok(bytes) => audio.extend_from_slice(&bytes),
                            Err(e) => warn!("Dropping undecodable audio part: {}", e),
                        }
                    }
                }

                if !text.is_empty() {
                    out.push(Inbound::Text(text));
                }
                if !audio.is_empty() {
                    out.push(Inbound::Audio(audio));
                }
            }

            if content.turn_complete {
                out.push(Inbound::TurnComplete);
            }
        }

        if let Some(batch) = self.tool_call {
            if !batch.function_calls.is_empty() {
                out.push(Inbound::ToolCalls(batch.function_calls));
            }
        }

        out
    }
}
