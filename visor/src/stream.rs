//! Server-sent-event consumption for streamed build output.
//!
//! The server reports build progress as an SSE stream with two event types:
//! `log` (a JSON-encoded string to print verbatim) and `error` (a JSON
//! string to print, marking the run failed). Log output that arrives before
//! a later `error` is still printed, so users see partial progress before a
//! failure. The outcome is returned as a value; mapping it to a process exit
//! code is the CLI's job.

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use std::io::Write;

/// Terminal state of a consumed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
}

impl StreamOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed => 1,
        }
    }
}

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental SSE parser: feed it byte chunks, collect completed events.
#[derive(Debug, Default)]
struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    events.push(event);
                }
            } else if line.starts_with(':') {
                // Comment / keep-alive.
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(value.trim_start().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // id: and retry: fields are irrelevant here.
        }
        events
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Consume a streamed response to completion, printing log output as it
/// arrives.
pub async fn consume(response: reqwest::Response) -> Result<StreamOutcome> {
    let mut outcome = StreamOutcome::Completed;
    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();
    let mut stdout = std::io::stdout();

    while let Some(chunk) = body.next().await {
        let bytes = chunk.context("build stream interrupted")?;
        for event in parser.push(&bytes) {
            match event.event.as_str() {
                "log" => {
                    let text: String = serde_json::from_str(&event.data)
                        .context("malformed log event payload")?;
                    print!("{text}");
                    stdout.flush().ok();
                }
                "error" => {
                    let text: String = serde_json::from_str(&event.data)
                        .context("malformed error event payload")?;
                    println!("{text}");
                    outcome = StreamOutcome::Failed;
                }
                other => bail!("unknown event type {other}"),
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: log\ndata: \"hello\"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "log");
        assert_eq!(events[0].data, "\"hello\"");
    }

    #[test]
    fn test_parse_across_chunk_boundaries() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: lo").is_empty());
        assert!(parser.push(b"g\ndata: \"par").is_empty());
        let events = parser.push(b"tial\"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "\"partial\"");
    }

    #[test]
    fn test_parse_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events =
            parser.push(b"event: log\ndata: \"a\"\n\nevent: error\ndata: \"broke\"\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "log");
        assert_eq!(events[1].event, "error");
    }

    #[test]
    fn test_multi_line_data_joined_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: log\ndata: first\ndata: second\n\n");
        assert_eq!(events[0].data, "first\nsecond");
    }

    #[test]
    fn test_crlf_lines_accepted() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: log\r\ndata: \"x\"\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "\"x\"");
    }

    #[test]
    fn test_comment_lines_ignored() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keep-alive\n\nevent: log\ndata: \"x\"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "log");
    }

    #[test]
    fn test_event_without_name_defaults_to_message() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: \"x\"\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_blank_lines_without_fields_produce_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"\n\n\n").is_empty());
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(StreamOutcome::Completed.exit_code(), 0);
        assert_eq!(StreamOutcome::Failed.exit_code(), 1);
    }
}
