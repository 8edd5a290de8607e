use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::{apply_tuning, finish_stream, stream_sse_frames};
use crate::config::{Api, ModelConfig};
use crate::types::{Content, ContentPart, EventSender, ExecutionHandle, ImageSource, Message};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::ops::ControlFlow;
use tokio_util::sync::CancellationToken;

const DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat-completions streaming for the `openai` and `azure` APIs; the two
/// differ only in endpoint resolution and auth header.
pub(crate) fn dispatch(messages: Vec<Message>, config: &ModelConfig) -> ExecutionHandle {
    let (mut tx, handle) = ExecutionHandle::channel();
    let cancel = handle.cancel_token();
    let config = config.clone();

    tokio::spawn(async move {
        let result = stream_chat(&messages, &config, &mut tx, &cancel).await;
        finish_stream(result, &mut tx);
    });

    handle
}

async fn stream_chat(
    messages: &[Message],
    config: &ModelConfig,
    tx: &mut EventSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let request_url = config.url.clone().unwrap_or_else(|| DEFAULT_URL.to_string());
    let payload = build_payload(messages, config);

    if debug_payload_enabled() {
        emit_debug_payload(&request_url, &Value::Object(payload.clone()));
    }

    let mut request = reqwest::Client::new()
        .post(&request_url)
        .header("content-type", "application/json")
        .json(&payload);
    request = match config.api {
        Api::Azure => request.header("api-key", &config.api_key),
        _ => request.header("authorization", format!("Bearer {}", config.api_key)),
    };

    stream_sse_frames(request, &request_url, cancel, |frame| {
        if frame.is_done() {
            return ControlFlow::Break(());
        }
        if let Some(chunk) = frame.decode::<ChatChunk>() {
            if let Some(delta) = chunk.delta_content() {
                tx.text(delta);
            }
        }
        ControlFlow::Continue(())
    })
    .await
}

fn build_payload(messages: &[Message], config: &ModelConfig) -> Map<String, Value> {
    let mut payload = Map::new();
    if !config.model.is_empty() {
        // Azure routes by deployment URL; the body-level model is optional.
        payload.insert("model".to_string(), json!(config.model));
    }
    payload.insert("stream".to_string(), json!(true));
    payload.insert("messages".to_string(), json!(wire_messages(messages)));
    apply_tuning(&mut payload, config);
    payload
}

fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match &message.content {
            Content::Text(text) => json!({
                "role": message.role.as_str(),
                "content": text,
            }),
            Content::Parts(parts) => json!({
                "role": message.role.as_str(),
                "content": parts.iter().map(wire_part).collect::<Vec<_>>(),
            }),
        })
        .collect()
}

fn wire_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text(text) => json!({ "type": "text", "text": text }),
        ContentPart::Image { source } => {
            let url = match source {
                ImageSource::Url(url) => url.clone(),
                ImageSource::Data { mime, base64 } => format!("data:{mime};base64,{base64}"),
            };
            json!({ "type": "image_url", "image_url": { "url": url } })
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChatChunk {
    fn delta_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
    }
}
