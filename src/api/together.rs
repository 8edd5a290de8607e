use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::{apply_tuning, finish_stream, stream_sse_frames};
use crate::config::ModelConfig;
use crate::types::{Content, EventSender, ExecutionHandle, Message, Role};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::ops::ControlFlow;
use tokio_util::sync::CancellationToken;

const DEFAULT_URL: &str = "https://api.together.xyz/v1/completions";

/// Completion-style streaming: the chat transcript is flattened into a
/// Llama-instruction-tagged prompt string because the wire has no chat
/// history shape of its own.
pub(crate) fn dispatch(messages: Vec<Message>, config: &ModelConfig) -> ExecutionHandle {
    let (mut tx, handle) = ExecutionHandle::channel();
    let cancel = handle.cancel_token();
    let config = config.clone();

    tokio::spawn(async move {
        let result = stream_completion(&messages, &config, &mut tx, &cancel).await;
        finish_stream(result, &mut tx);
    });

    handle
}

/// system → `<s>[INST] <<SYS>>…<</SYS>>\n\n`; user → `[INST]…[/INST]`, with
/// the `<s>[INST]` opener only when the previous turn was not the system
/// prompt; assistant → `…</s>`.
pub(crate) fn build_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for (index, message) in messages.iter().enumerate() {
        let content = match &message.content {
            Content::Text(text) => text.clone(),
            Content::Parts(_) => message.content.joined_text(),
        };
        match message.role {
            Role::System => {
                prompt.push_str("<s>[INST] <<SYS>>");
                prompt.push_str(&content);
                prompt.push_str("<</SYS>>\n\n");
            }
            Role::User => {
                let previous_was_system =
                    index > 0 && messages[index - 1].role == Role::System;
                if !previous_was_system {
                    prompt.push_str("<s>[INST]");
                }
                prompt.push_str(&content);
                prompt.push_str("[/INST]");
            }
            Role::Assistant => {
                prompt.push_str(&content);
                prompt.push_str("</s>");
            }
        }
    }
    prompt
}

async fn stream_completion(
    messages: &[Message],
    config: &ModelConfig,
    tx: &mut EventSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let request_url = config.url.clone().unwrap_or_else(|| DEFAULT_URL.to_string());

    let mut payload = Map::new();
    payload.insert("prompt".to_string(), json!(build_prompt(messages)));
    payload.insert("stream".to_string(), json!(true));
    if !config.model.is_empty() {
        payload.insert("model".to_string(), json!(config.model));
    }
    apply_tuning(&mut payload, config);

    if debug_payload_enabled() {
        emit_debug_payload(&request_url, &Value::Object(payload.clone()));
    }

    let request = reqwest::Client::new()
        .post(&request_url)
        .header("accept", "application/json")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", config.api_key))
        .json(&payload);

    stream_sse_frames(request, &request_url, cancel, |frame| {
        if frame.is_done() {
            return ControlFlow::Break(());
        }
        if let Some(completion) = frame.decode::<CompletionChunk>() {
            if let Some(text) = completion.delta_text() {
                // The stop token leaks through as a final literal on some
                // models; it is markup, not output.
                if text != "</s>" {
                    tx.text(text);
                }
            }
        }
        ControlFlow::Continue(())
    })
    .await
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: Option<String>,
}

impl CompletionChunk {
    fn delta_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.text)
            .filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_tags_full_conversation() {
        let prompt = build_prompt(&[
            Message::text(Role::System, "be terse"),
            Message::text(Role::User, "2+2?"),
            Message::text(Role::Assistant, "4"),
            Message::text(Role::User, "times 10?"),
        ]);
        assert_eq!(
            prompt,
            "<s>[INST] <<SYS>>be terse<</SYS>>\n\n2+2?[/INST]4</s><s>[INST]times 10?[/INST]"
        );
    }

    #[test]
    fn test_user_after_system_omits_opening_tag() {
        let prompt = build_prompt(&[
            Message::text(Role::System, "s"),
            Message::text(Role::User, "u"),
        ]);
        assert!(prompt.contains("<</SYS>>\n\nu[/INST]"));
        assert!(!prompt.contains("\n\n<s>[INST]u"));
    }

    #[test]
    fn test_user_without_system_gets_opening_tag() {
        let prompt = build_prompt(&[Message::text(Role::User, "hello")]);
        assert_eq!(prompt, "<s>[INST]hello[/INST]");
    }

    #[test]
    fn test_completion_chunk_text_extraction() {
        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"choices":[{"text":"lo"}]}"#).unwrap();
        assert_eq!(chunk.delta_text().as_deref(), Some("lo"));
    }
}
