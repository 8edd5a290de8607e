use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::{apply_tuning, finish_stream, stream_sse_frames};
use crate::config::ModelConfig;
use crate::types::{Content, ContentPart, EventSender, ExecutionHandle, ImageSource, Message, Role};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::ops::ControlFlow;
use tokio_util::sync::CancellationToken;

/// Chat-history streaming against the Generative Language API. The wire has
/// no system role: the system prompt is folded onto the front of the first
/// user turn.
pub(crate) fn dispatch(messages: Vec<Message>, config: &ModelConfig) -> ExecutionHandle {
    let (mut tx, handle) = ExecutionHandle::channel();
    let cancel = handle.cancel_token();
    let config = config.clone();

    tokio::spawn(async move {
        let result = stream_generate(&messages, &config, &mut tx, &cancel).await;
        finish_stream(result, &mut tx);
    });

    handle
}

fn request_url(config: &ModelConfig) -> String {
    config.url.clone().unwrap_or_else(|| {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:streamGenerateContent?alt=sse",
            config.model
        )
    })
}

pub(crate) fn build_contents(messages: &[Message]) -> Vec<Value> {
    let mut system_text = String::new();
    let mut contents = Vec::new();
    let mut system_pending = false;

    for message in messages {
        match message.role {
            Role::System => {
                let text = message.content.joined_text();
                if !text.is_empty() {
                    system_text = text;
                    system_pending = true;
                }
            }
            Role::User => {
                let mut parts = wire_parts(&message.content);
                if system_pending {
                    parts.insert(0, json!({ "text": format!("{system_text}\n\n") }));
                    system_pending = false;
                }
                contents.push(json!({ "role": "user", "parts": parts }));
            }
            Role::Assistant => {
                contents.push(json!({
                    "role": "model",
                    "parts": wire_parts(&message.content),
                }));
            }
        }
    }

    contents
}

fn wire_parts(content: &Content) -> Vec<Value> {
    match content {
        Content::Text(text) => vec![json!({ "text": text })],
        Content::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => json!({ "text": text }),
                ContentPart::Image { source } => match source {
                    ImageSource::Data { mime, base64 } => json!({
                        "inline_data": { "mime_type": mime, "data": base64 }
                    }),
                    // This wire only accepts embedded bytes; a still-remote
                    // reference degrades to its URL as text.
                    ImageSource::Url(url) => json!({ "text": url }),
                },
            })
            .collect(),
    }
}

async fn stream_generate(
    messages: &[Message],
    config: &ModelConfig,
    tx: &mut EventSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let request_url = request_url(config);

    let mut payload = Map::new();
    payload.insert("contents".to_string(), json!(build_contents(messages)));
    apply_tuning(&mut payload, config);

    if debug_payload_enabled() {
        emit_debug_payload(&request_url, &Value::Object(payload.clone()));
    }

    let request = reqwest::Client::new()
        .post(&request_url)
        .header("content-type", "application/json")
        .header("x-goog-api-key", &config.api_key)
        .json(&payload);

    stream_sse_frames(request, &request_url, cancel, |frame| {
        if let Some(generated) = frame.decode::<GenerateChunk>() {
            let text = generated.joined_text();
            if !text.is_empty() {
                tx.text(text);
            }
        }
        ControlFlow::Continue(())
    })
    .await
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateChunk {
    fn joined_text(self) -> String {
        let mut joined = String::new();
        for candidate in self.candidates.into_iter().take(1) {
            let Some(content) = candidate.content else {
                continue;
            };
            for part in content.parts {
                if let Some(text) = part.text {
                    joined.push_str(&text);
                }
            }
        }
        joined
    }
}
