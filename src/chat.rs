//! One-shot text chat.
//!
//! A single prompt goes to a request/response model endpoint together with
//! the scenery catalogue. The reply may end with a `[[CHANGE_VIDEO:<url>]]`
//! marker, which is split off and handed back as the scenery to load.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ChatConfig, SceneryEntry};
use crate::live::messages::Content;

const MARKER_OPEN: &str = "[[CHANGE_VIDEO:";
const MARKER_CLOSE: &str = "]]";

/// Request/response text model
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// `generateContent` over HTTPS.
pub struct GeminiTextClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: &'a [Content],
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateResponse {
    /// Text of the first candidate, parts joined
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl GeminiTextClient {
    pub fn new(config: &ChatConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.trim_start_matches("models/").to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TextModel for GeminiTextClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        info!(model = %self.model, prompt_len = prompt.len(), "Text chat request");

        let contents = [Content::user_text(prompt)];
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&GenerateRequest { contents: &contents })
            .send()
            .await
            .context("Text chat request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Text chat API error {}: {}", status, body);
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .context("Failed to decode text chat response")?;

        match body.text() {
            Some(text) => Ok(text),
            None => bail!("Text chat response had no text"),
        }
    }
}

/// A parsed assistant reply
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    /// What to show the user, marker removed
    pub message: String,
    /// Scenery to switch to, if the assistant asked for one
    pub video_url: Option<String>,
}

/// Split a reply into its message and optional `[[CHANGE_VIDEO:<url>]]` URL.
///
/// Text before the first marker is the message. A marker that is never
/// closed, or whose URL is empty or contains whitespace, switches nothing.
pub fn parse_reply(text: &str) -> ChatReply {
    let Some(start) = text.find(MARKER_OPEN) else {
        return ChatReply {
            message: text.trim().to_string(),
            video_url: None,
        };
    };

    let message = text[..start].trim().to_string();
    let rest = &text[start + MARKER_OPEN.len()..];

    let video_url = match rest.find(MARKER_CLOSE) {
        Some(end) => {
            let url = rest[..end].trim();
            if url.is_empty() || url.chars().any(char::is_whitespace) {
                warn!("Ignoring unusable scenery marker: {:?}", url);
                None
            } else {
                Some(url.to_string())
            }
        }
        None => {
            warn!("Ignoring unterminated scenery marker");
            None
        }
    };

    ChatReply { message, video_url }
}

/// Build the one-shot prompt for `user_text`.
pub fn build_prompt(user_text: &str, scenery: &[SceneryEntry]) -> String {
    let catalogue: Vec<String> = scenery
        .iter()
        .map(|entry| format!("- {}: {}", entry.keyword, entry.url))
        .collect();

    format!(
        "You are the assistant living inside a smart window. The user says: \"{user}\"\n\
         \n\
         1. Reply warmly and descriptively.\n\
         2. If the user wants different scenery, to travel or to see another part of the world, \
         pick the best match from the scenery list below.\n\
         3. To change the scenery, end your reply with a last line of exactly {open}<url>{close}\n\
         \n\
         Scenery:\n\
         {catalogue}\n\
         \n\
         Use the plain YouTube URL from the list, never a resolved stream URL.",
        user = user_text,
        open = MARKER_OPEN,
        close = MARKER_CLOSE,
        catalogue = catalogue.join("\n"),
    )
}

/// Text assistant bound to one scenery catalogue
pub struct ChatAssistant {
    model: Arc<dyn TextModel>,
    scenery: Vec<SceneryEntry>,
}

impl ChatAssistant {
    pub fn new(model: Arc<dyn TextModel>, scenery: Vec<SceneryEntry>) -> Self {
        Self { model, scenery }
    }

    pub async fn ask(&self, user_text: &str) -> Result<ChatReply> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            bail!("Nothing to ask");
        }

        let prompt = build_prompt(user_text, &self.scenery);
        let raw = self.model.generate(&prompt).await?;
        debug!("Text chat reply: {:?}", raw);

        let reply = parse_reply(&raw);
        if let Some(url) = &reply.video_url {
            info!("Assistant picked scenery {}", url);
        }
        Ok(reply)
    }
}
