pub mod google;
pub mod imagegen;
pub mod logging;
pub mod openai;
pub mod sse;
pub mod together;

use crate::config::{Api, ModelConfig};
use crate::types::{EventSender, ExecutionHandle, Message};
use crate::util::is_local_endpoint_url;
use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use sse::{SseFrame, SseParser};
use std::ops::ControlFlow;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Route one prepared transcript to the back-end named by the model config.
/// Every returned handle terminates on its own: adapters catch their errors
/// and close the stream with `Error` + `Done` instead of propagating.
pub fn dispatch(messages: Vec<Message>, config: &ModelConfig) -> Result<ExecutionHandle> {
    match config.api {
        Api::Openai | Api::Azure => Ok(openai::dispatch(messages, config)),
        Api::Together => Ok(together::dispatch(messages, config)),
        Api::Google => Ok(google::dispatch(messages, config)),
        Api::OpenaiImagegen | Api::AzureImagegen => Ok(imagegen::dispatch(messages, config)),
        Api::None => bail!("No valid model specified"),
    }
}

/// Adapter epilogue: a failed run closes the stream with one surfaced
/// `Error`, a clean or cancelled run closes it with `Done`.
pub(crate) fn finish_stream(result: Result<()>, tx: &mut EventSender) {
    if let Err(error) = result {
        tx.error(format!("{error:#}"));
    }
    tx.done();
}

/// Merge the config's non-reserved tuning fields into an outbound payload,
/// verbatim. Reserved keys never reach `extra` (serde strips them at parse
/// time), so no filtering is needed here.
pub(crate) fn apply_tuning(payload: &mut Map<String, Value>, config: &ModelConfig) {
    for (key, value) in &config.extra {
        payload.insert(key.clone(), value.clone());
    }
}

/// Shared pump for the SSE-streaming back-ends: send the request, then feed
/// each parsed frame to `on_frame` until the stream ends, the callback
/// breaks, or the cancel token fires. Cancellation is checked at every yield
/// point, so abort latency is bounded by one network chunk.
pub(crate) async fn stream_sse_frames<F>(
    request: reqwest::RequestBuilder,
    request_url: &str,
    cancel: &CancellationToken,
    mut on_frame: F,
) -> Result<()>
where
    F: FnMut(SseFrame) -> ControlFlow<()>,
{
    let response = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        response = request.send() => {
            response.map_err(|error| map_api_request_error(error, request_url))?
        }
    };
    let response = response
        .error_for_status()
        .map_err(|error| map_api_request_error(error, request_url))?;

    let mut stream: ByteStream = Box::pin(response.bytes_stream());
    let mut parser = SseParser::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = stream.next() => match chunk {
                None => return Ok(()),
                Some(chunk) => chunk.map_err(|error| map_api_request_error(error, request_url))?,
            }
        };

        for frame in parser.process(&chunk) {
            if let ControlFlow::Break(()) = on_frame(frame) {
                return Ok(());
            }
        }
    }
}

pub(crate) fn map_api_request_error(error: reqwest::Error, request_url: &str) -> anyhow::Error {
    if error.is_connect() && is_local_endpoint_url(request_url) {
        return anyhow!(
            "cannot reach local API endpoint '{}': {}. Start your local server or update the model's url.",
            request_url,
            error
        );
    }
    if error.is_connect() {
        return anyhow!("cannot reach API endpoint '{}': {}", request_url, error);
    }
    if error.is_timeout() {
        return anyhow!("API request to '{}' timed out: {}", request_url, error);
    }
    if let Some(status) = error.status() {
        return anyhow!(
            "API endpoint '{}' returned HTTP {}: {}",
            request_url,
            status,
            error
        );
    }
    anyhow!("API request to '{}' failed: {}", request_url, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamEvent;

    #[test]
    fn test_dispatch_refuses_none_sentinel() {
        let config = ModelConfig::none();
        let error = dispatch(Vec::new(), &config).unwrap_err();
        assert!(error.to_string().contains("No valid model"));
    }

    #[tokio::test]
    async fn test_finish_stream_surfaces_error_and_closes() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        finish_stream(Err(anyhow!("auth failed")), &mut tx);
        drop(tx);

        match handle.next_event().await {
            StreamEvent::Error(message) => assert!(message.contains("auth failed")),
            other => panic!("unexpected event: {other:?}"),
        }
        // Error is terminal; nothing but the closed-channel Done follows.
        assert_eq!(handle.next_event().await, StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_finish_stream_closes_clean_runs_with_done() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        finish_stream(Ok(()), &mut tx);
        assert_eq!(handle.next_event().await, StreamEvent::Done);
    }

    #[test]
    fn test_apply_tuning_copies_extra_fields() {
        let mut config = ModelConfig::none();
        config
            .extra
            .insert("temperature".to_string(), serde_json::json!(0.7));
        let mut payload = Map::new();
        apply_tuning(&mut payload, &config);
        assert_eq!(payload.get("temperature"), Some(&serde_json::json!(0.7)));
    }
}
