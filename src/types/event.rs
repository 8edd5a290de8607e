use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One incremental unit of model output, as republished by a provider
/// adapter. `Done` and `Error` are terminal: no further events arrive after
/// either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    ImageChunk { mime: String, data: Vec<u8> },
    Done,
    Error(String),
}

/// Producer half of an execution stream. Adapters push provider-native units
/// through this into the unbounded queue, decoupling network arrival from
/// consumption. Sends after a terminal event are dropped.
pub struct EventSender {
    tx: mpsc::UnboundedSender<StreamEvent>,
    finished: bool,
}

impl EventSender {
    pub fn text(&mut self, delta: impl Into<String>) {
        self.send(StreamEvent::TextDelta(delta.into()));
    }

    pub fn image(&mut self, mime: impl Into<String>, data: Vec<u8>) {
        self.send(StreamEvent::ImageChunk {
            mime: mime.into(),
            data,
        });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.send(StreamEvent::Error(message.into()));
        self.finished = true;
    }

    pub fn done(&mut self) {
        self.send(StreamEvent::Done);
        self.finished = true;
    }

    fn send(&mut self, event: StreamEvent) {
        if self.finished {
            return;
        }
        // The receiver dropping mid-stream is normal on cancellation.
        let _ = self.tx.send(event);
    }
}

/// Consumer handle for one cell execution: a pull-based event stream plus a
/// cancellation hook. Owned by the multiplexer for the execution's lifetime.
#[derive(Debug)]
pub struct ExecutionHandle {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
}

impl ExecutionHandle {
    pub fn channel() -> (EventSender, ExecutionHandle) {
        let (tx, events) = mpsc::unbounded_channel();
        let sender = EventSender {
            tx,
            finished: false,
        };
        let handle = ExecutionHandle {
            events,
            cancel: CancellationToken::new(),
        };
        (sender, handle)
    }

    /// Token the producing adapter watches at each yield point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `Done` if the producer went away without one. Never
    /// yields anything after the first `Done`.
    pub async fn next_event(&mut self) -> StreamEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => StreamEvent::Done,
        }
    }

    /// Request cancellation of the in-flight network operation. Safe to call
    /// after the stream completed; repeat calls are no-ops.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        tx.text("a");
        tx.text("b");
        tx.done();
        assert_eq!(handle.next_event().await, StreamEvent::TextDelta("a".into()));
        assert_eq!(handle.next_event().await, StreamEvent::TextDelta("b".into()));
        assert_eq!(handle.next_event().await, StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_sends_after_done_are_dropped() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        tx.done();
        tx.text("late");
        drop(tx);
        assert_eq!(handle.next_event().await, StreamEvent::Done);
        // A stray post-Done event would surface here instead of the
        // closed-channel Done.
        assert_eq!(handle.next_event().await, StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let (mut tx, mut handle) = ExecutionHandle::channel();
        tx.error("boom");
        tx.text("late");
        tx.done();
        drop(tx);
        assert_eq!(handle.next_event().await, StreamEvent::Error("boom".into()));
        assert_eq!(handle.next_event().await, StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_dropped_sender_reads_as_done() {
        let (tx, mut handle) = ExecutionHandle::channel();
        drop(tx);
        assert_eq!(handle.next_event().await, StreamEvent::Done);
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let (_tx, handle) = ExecutionHandle::channel();
        let token = handle.cancel_token();
        handle.abort();
        handle.abort();
        assert!(token.is_cancelled());
    }
}
