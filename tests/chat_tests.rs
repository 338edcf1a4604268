// Integration tests for the one-shot text chat
//
// The model is either a scripted `TextModel` or a minimal HTTP server on a
// loopback port standing in for the generateContent endpoint.

use anyhow::{bail, Result};
use async_trait::async_trait;
use scenic_window::chat::{ChatAssistant, GeminiTextClient, TextModel};
use scenic_window::config::{ChatConfig, SceneryEntry};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

struct ScriptedModel {
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(reason.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(reason) => bail!("{}", reason),
        }
    }
}

fn catalogue() -> Vec<SceneryEntry> {
    vec![SceneryEntry {
        keyword: "Swiss Alps snow".to_string(),
        url: "https://www.youtube.com/watch?v=B9VRvOKKwfs".to_string(),
    }]
}

#[tokio::test]
async fn test_ask_returns_message_and_scenery() -> Result<()> {
    let model = ScriptedModel::replying(
        "Fresh snow is falling in the Alps.\n[[CHANGE_VIDEO:https://www.youtube.com/watch?v=B9VRvOKKwfs]]",
    );
    let assistant = ChatAssistant::new(model.clone(), catalogue());

    let reply = assistant.ask("  I want to see snow  ").await?;
    assert_eq!(reply.message, "Fresh snow is falling in the Alps.");
    assert_eq!(
        reply.video_url.as_deref(),
        Some("https://www.youtube.com/watch?v=B9VRvOKKwfs")
    );

    let prompts = model.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("\"I want to see snow\""));
    assert!(prompts[0].contains("Swiss Alps snow"));
    Ok(())
}

#[tokio::test]
async fn test_model_failure_is_an_error() -> Result<()> {
    let assistant = ChatAssistant::new(ScriptedModel::failing("quota exceeded"), catalogue());
    let err = assistant.ask("hello").await.unwrap_err();
    assert!(format!("{:#}", err).contains("quota exceeded"));
    Ok(())
}

#[tokio::test]
async fn test_blank_question_is_not_sent() -> Result<()> {
    let model = ScriptedModel::replying("unused");
    let assistant = ChatAssistant::new(model.clone(), catalogue());
    assert!(assistant.ask("   ").await.is_err());
    assert!(model.prompts.lock().unwrap().is_empty());
    Ok(())
}

/// Serve one HTTP request, returning its request line, headers and JSON body.
async fn serve_once(listener: TcpListener, status: &str, body: Value) -> Result<(String, Vec<String>, Value)> {
    let (stream, _) = listener.accept().await?;
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end().to_string();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse()?;
            }
        }
        headers.push(line.to_ascii_lowercase());
    }

    let mut raw = vec![0u8; content_length];
    reader.read_exact(&mut raw).await?;
    let request: Value = serde_json::from_slice(&raw)?;

    let payload = body.to_string();
    let response = format!(
        "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        payload.len(),
        payload
    );
    reader.get_mut().write_all(response.as_bytes()).await?;
    reader.get_mut().shutdown().await?;

    Ok((request_line.trim_end().to_string(), headers, request))
}

fn local_config(port: u16) -> ChatConfig {
    ChatConfig {
        endpoint: format!("http://127.0.0.1:{}/v1beta/", port),
        model: "models/text-model".to_string(),
        ..ChatConfig::default()
    }
}

#[tokio::test]
async fn test_http_client_posts_generate_content() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let server = tokio::spawn(serve_once(
        listener,
        "200 OK",
        json!({ "candidates": [{ "content": { "role": "model", "parts": [
            { "text": "Here is Kyoto." }
        ]}}]}),
    ));

    let client = GeminiTextClient::new(&local_config(port), "test-key")?;
    let text = client.generate("take me to Kyoto").await?;
    assert_eq!(text, "Here is Kyoto.");

    let (request_line, headers, body) = server.await??;
    assert_eq!(request_line, "POST /v1beta/models/text-model:generateContent HTTP/1.1");
    assert!(headers.iter().any(|h| h == "x-goog-api-key: test-key"));
    assert_eq!(body["contents"][0]["role"], "user");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "take me to Kyoto");
    Ok(())
}

#[tokio::test]
async fn test_http_error_status_is_reported() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let server = tokio::spawn(serve_once(
        listener,
        "403 Forbidden",
        json!({ "error": { "message": "API key not valid" } }),
    ));

    let client = GeminiTextClient::new(&local_config(port), "bad-key")?;
    let err = client.generate("hello").await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("403"));
    assert!(message.contains("API key not valid"));

    server.await??;
    Ok(())
}
