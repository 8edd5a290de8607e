use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::{apply_tuning, finish_stream, map_api_request_error};
use crate::config::{Api, ModelConfig};
use crate::types::{EventSender, ExecutionHandle, Message, Role};
use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

const DEFAULT_URL: &str = "https://api.openai.com/v1/images/generations";

/// Image generation is single-shot on the wire but still surfaces as a
/// stream: one `ImageChunk`, an optional caption `TextDelta`, then `Done`,
/// so the multiplexer needs no special case.
pub(crate) fn dispatch(messages: Vec<Message>, config: &ModelConfig) -> ExecutionHandle {
    let (mut tx, handle) = ExecutionHandle::channel();
    let cancel = handle.cancel_token();
    let config = config.clone();

    tokio::spawn(async move {
        let result = generate(&messages, &config, &mut tx, &cancel).await;
        finish_stream(result, &mut tx);
    });

    handle
}

/// The generation prompt is the most recent user turn; earlier turns do not
/// participate.
pub(crate) fn generation_prompt(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message| message.content.joined_text())
}

async fn generate(
    messages: &[Message],
    config: &ModelConfig,
    tx: &mut EventSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(prompt) = generation_prompt(messages) else {
        bail!("No user prompt to generate an image from");
    };
    let request_url = config.url.clone().unwrap_or_else(|| DEFAULT_URL.to_string());

    let mut payload = Map::new();
    if !config.model.is_empty() {
        payload.insert("model".to_string(), json!(config.model));
    }
    payload.insert("prompt".to_string(), json!(prompt));
    payload.insert("n".to_string(), json!(1));
    payload.insert("response_format".to_string(), json!("b64_json"));
    apply_tuning(&mut payload, config);

    if debug_payload_enabled() {
        emit_debug_payload(&request_url, &Value::Object(payload.clone()));
    }

    let mut request = reqwest::Client::new()
        .post(&request_url)
        .header("content-type", "application/json")
        .json(&payload);
    request = match config.api {
        Api::AzureImagegen => request.header("api-key", &config.api_key),
        _ => request.header("authorization", format!("Bearer {}", config.api_key)),
    };

    let response = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        response = request.send() => {
            response.map_err(|error| map_api_request_error(error, &request_url))?
        }
    };
    let response = response
        .error_for_status()
        .map_err(|error| map_api_request_error(error, &request_url))?;

    let generated = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        body = response.json::<ImagesResponse>() => {
            body.map_err(|error| map_api_request_error(error, &request_url))?
        }
    };

    let Some(image) = generated.data.into_iter().next() else {
        bail!("Image API returned no images");
    };
    let Some(encoded) = image.b64_json else {
        bail!("Image API returned no b64_json payload");
    };
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .map_err(|error| anyhow::anyhow!("cannot decode generated image: {error}"))?;

    if cancel.is_cancelled() {
        return Ok(());
    }
    tx.image("image/png", bytes);
    if let Some(caption) = image.revised_prompt {
        if !caption.is_empty() {
            tx.text(caption);
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}
