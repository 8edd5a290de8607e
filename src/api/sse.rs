use super::logging::emit_sse_parse_error;
use serde::de::DeserializeOwned;

/// One server-sent event frame: optional `event:` name plus the joined
/// `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Terminal sentinel shared by the chat-completion and completion APIs.
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }

    /// Decode the data payload, logging (not failing) on mismatch so one
    /// malformed frame never kills a live stream.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        match serde_json::from_str(&self.data) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                emit_sse_parse_error(self.event.as_deref(), &self.data, &error);
                None
            }
        }
    }
}

/// Incremental SSE frame splitter. Network chunks arrive at arbitrary
/// boundaries; frames are complete only at a blank line.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(end) = self.buffer[start..].find("\n\n") {
            let frame_end = start + end + 2;
            let frame_text = &self.buffer[start..frame_end];

            let mut event = None;
            let mut data_lines: Vec<&str> = Vec::new();

            for line in frame_text.lines() {
                let line = line.strip_suffix('\r').unwrap_or(line);
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
                }
            }

            if !data_lines.is_empty() {
                frames.push(SseFrame {
                    event,
                    data: data_lines.join("\n").trim().to_string(),
                });
            }

            start = frame_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        frames
    }
}
