use crate::cell::OutputItem;
use crate::sink::DisplaySink;
use crate::types::{ExecutionHandle, StreamEvent};
use crate::util::env_override_usize;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const DEFAULT_POLL_INTERVAL_MS: usize = 50;
const POLL_INTERVAL_ENV: &str = "CHATCELL_POLL_INTERVAL_MS";

/// Terminal state of one cell execution. All three finalize identically;
/// `Failed` means a provider warning was surfaced along the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Cancelled,
    Failed,
}

fn poll_interval() -> Duration {
    let millis = env_override_usize(POLL_INTERVAL_ENV, DEFAULT_POLL_INTERVAL_MS, 10, 1000);
    Duration::from_millis(millis as u64)
}

/// Pull events until the stream closes or the host cancels, re-rendering the
/// entire accumulated output on every event. Image content renders before
/// text. The pull is bounded by a short poll interval so a cancellation
/// request never waits on the next provider-pushed event.
pub async fn drive_to_sink(
    handle: &mut ExecutionHandle,
    sink: &mut dyn DisplaySink,
    cancel: &CancellationToken,
) -> ExecutionStatus {
    let interval = poll_interval();
    let mut text = String::new();
    let mut images: Vec<(String, Vec<u8>)> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            handle.abort();
            return ExecutionStatus::Cancelled;
        }

        let event = match timeout(interval, handle.next_event()).await {
            Ok(event) => event,
            Err(_) => continue,
        };

        match event {
            StreamEvent::TextDelta(delta) => {
                text.push_str(&delta);
                render(sink, &images, &text);
            }
            StreamEvent::ImageChunk { mime, data } => {
                upsert_image(&mut images, mime, data);
                render(sink, &images, &text);
            }
            StreamEvent::Error(message) => {
                // Terminal: whatever partial output was rendered stays.
                sink.warn(&message);
                return ExecutionStatus::Failed;
            }
            StreamEvent::Done => return ExecutionStatus::Completed,
        }
    }
}

/// Latest image wins per mime type; first-seen order is preserved so a
/// caption stream cannot reorder the document.
fn upsert_image(images: &mut Vec<(String, Vec<u8>)>, mime: String, data: Vec<u8>) {
    if let Some(slot) = images.iter_mut().find(|(existing, _)| *existing == mime) {
        slot.1 = data;
    } else {
        images.push((mime, data));
    }
}

fn render(sink: &mut dyn DisplaySink, images: &[(String, Vec<u8>)], text: &str) {
    let mut parts = Vec::with_capacity(images.len() + 1);
    for (mime, data) in images {
        parts.push(OutputItem {
            mime: mime.clone(),
            data: data.clone(),
        });
    }
    if !text.is_empty() {
        parts.push(OutputItem::markdown(text));
    }
    sink.replace_output(&parts);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        snapshots: Vec<Vec<OutputItem>>,
        warnings: Vec<String>,
    }

    impl DisplaySink for RecordingSink {
        fn replace_output(&mut self, parts: &[OutputItem]) {
            self.snapshots.push(parts.to_vec());
        }

        fn warn(&mut self, message: &str) {
            self.warnings.push(message.to_string());
        }
    }

    #[tokio::test]
    async fn test_text_deltas_accumulate_into_replace_snapshots() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        tx.text("Hel");
        tx.text("lo");
        tx.done();

        let mut sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let status = drive_to_sink(&mut handle, &mut sink, &cancel).await;

        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(sink.snapshots.len(), 2);
        assert_eq!(sink.snapshots[0][0].text(), "Hel");
        assert_eq!(sink.snapshots[1][0].text(), "Hello");
    }

    #[tokio::test]
    async fn test_images_render_before_text() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        tx.text("caption below");
        tx.image("image/png", vec![1, 2]);
        tx.done();

        let mut sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        drive_to_sink(&mut handle, &mut sink, &cancel).await;

        let last = sink.snapshots.last().unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].mime, "image/png");
        assert_eq!(last[1].mime, "text/markdown");
    }

    #[tokio::test]
    async fn test_error_warns_and_marks_failed() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        tx.text("partial");
        tx.error("auth failed");
        tx.done();

        let mut sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let status = drive_to_sink(&mut handle, &mut sink, &cancel).await;

        assert_eq!(status, ExecutionStatus::Failed);
        assert_eq!(sink.warnings, vec!["auth failed".to_string()]);
        // Partial output already rendered stays rendered.
        assert_eq!(sink.snapshots.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_before_any_event_terminates() {
        let (_tx, mut handle) = ExecutionHandle::channel();
        let mut sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let status = drive_to_sink(&mut handle, &mut sink, &cancel).await;
        assert_eq!(status, ExecutionStatus::Cancelled);
        assert!(sink.snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_producer_reads_as_completion() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        tx.text("Hel");
        tx.text("lo");

        let mut sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let adapter_cancel = handle.cancel_token();

        let driver = tokio::spawn(async move {
            let status = drive_to_sink(&mut handle, &mut sink, &cancel).await;
            (status, sink)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(tx);
        let (status, sink) = driver.await.unwrap();

        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(sink.snapshots.len(), 2);
        assert_eq!(sink.snapshots[1][0].text(), "Hello");
        assert!(!adapter_cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_external_cancel_propagates_to_adapter_abort() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        tx.text("Hel");
        tx.text("lo");

        let adapter_cancel = handle.cancel_token();
        let cancel = CancellationToken::new();
        let external = cancel.clone();

        let driver = tokio::spawn(async move {
            let mut sink = RecordingSink::default();
            let status = drive_to_sink(&mut handle, &mut sink, &cancel).await;
            (status, sink)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        external.cancel();
        let (status, sink) = driver.await.unwrap();

        assert_eq!(status, ExecutionStatus::Cancelled);
        assert!(adapter_cancel.is_cancelled());
        // Both deltas rendered before cancellation, nothing after.
        assert_eq!(sink.snapshots.len(), 2);
        assert_eq!(sink.snapshots[1][0].text(), "Hello");
    }
}
