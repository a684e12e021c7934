use tokio::sync::mpsc;

use super::{ApiError, types::StreamMessage};

/*
    Owner event subscription

    Wraps the server-sent-event stream delivered by the indexer's owner
    endpoint. The transport task parses raw chunks into messages and feeds a
    channel; consumers pull with `next` and drop or `close` to cancel.
*/

pub struct OwnerEventStream {
    rx: mpsc::Receiver<Result<StreamMessage, ApiError>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl OwnerEventStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<StreamMessage, ApiError>>,
        task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Build a subscription directly from a channel, with no transport task
    /// behind it. Used by in-process test doubles.
    pub fn from_channel(rx: mpsc::Receiver<Result<StreamMessage, ApiError>>) -> Self {
        Self { rx, task: None }
    }

    /// Next message, or `None` once the transport has closed.
    pub async fn next(&mut self) -> Option<Result<StreamMessage, ApiError>> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();

        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for OwnerEventStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// One wire-level server-sent event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE frame parser. Push raw transport chunks in, get completed
/// events out; partial frames are buffered until their terminating blank line
/// arrives.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = vec![];

        while let Some(boundary) = self.find_boundary() {
            let frame: String = self.buffer.drain(..boundary.0).collect();
            self.buffer.drain(..boundary.1 - boundary.0);

            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }

        events
    }

    // (frame end, boundary end) for the first complete frame in the buffer
    fn find_boundary(&self) -> Option<(usize, usize)> {
        let lf = self.buffer.find("\n\n").map(|i| (i, i + 2));
        let crlf = self.buffer.find("\r\n\r\n").map(|i| (i, i + 4));

        match (lf, crlf) {
            (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines = vec![];

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event.event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // comment lines (":keepalive") and unknown fields are ignored
    }

    if event.event.is_none() && data_lines.is_empty() {
        return None;
    }

    event.data = data_lines.join("\n");
    Some(event)
}

/// Map a wire event to a stream message. Unknown event names yield `None`.
pub fn to_stream_message(event: &SseEvent) -> Option<Result<StreamMessage, ApiError>> {
    match event.event.as_deref() {
        Some("done") => Some(Ok(StreamMessage::Done)),
        Some("error") => Some(Err(ApiError::Transport(event.data.clone()))),
        None | Some("message") => {
            let parsed = serde_json::from_str(&event.data)
                .map(StreamMessage::Output)
                .map_err(|e| ApiError::Transport(format!("bad stream payload: {e}")));
            Some(parsed)
        }
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_split_frames() {
        let mut parser = SseParser::new();

        assert!(parser.push(b"data: {\"score\":").is_empty());

        let events = parser.push(b"1.0}\n\ndata: second\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"score\":1.0}");
        assert_eq!(events[1].data, "second");
    }

    #[test]
    fn parses_named_done_event() {
        let mut parser = SseParser::new();

        let events = parser.push(b"event: done\ndata:\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("done"));

        assert!(matches!(
            to_stream_message(&events[0]),
            Some(Ok(StreamMessage::Done))
        ));
    }

    #[test]
    fn ignores_comment_keepalives() {
        let mut parser = SseParser::new();
        assert!(parser.push(b":keepalive\n\n").is_empty());
    }

    #[test]
    fn handles_crlf_frames() {
        let mut parser = SseParser::new();

        let events = parser.push(b"data: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }
}
