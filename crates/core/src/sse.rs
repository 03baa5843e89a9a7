//! Client side of the answer stream.
//!
//! Bytes from the chat endpoint are framed into Server-Sent Events, each
//! event's data is read as provider chunks (`[DONE]` or a JSON object with
//! `choices[0].delta.content`), and the resulting text deltas are handed to
//! the caller through a channel. The stream always ends with exactly one
//! [`StreamEnd`], so a clean finish and a dropped connection look different.

use crate::error::StreamError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

pub const CHAT_STREAM_PATH: &str = "/api/chat-stream";
pub const DONE_SENTINEL: &str = "[DONE]";

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The `[DONE]` terminator arrived.
    Completed,
    /// The body ended or the connection failed before the terminator.
    Disconnected,
    /// The consumer aborted the stream.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    Delta(String),
    End(StreamEnd),
}

/// What one provider line meant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderMessage {
    Delta(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental SSE framer: feed raw bytes, get complete event data back.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the data of every event completed by `chunk`, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline).collect::<Vec<u8>>();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = self.take_line(line) {
                events.push(data);
            }
        }

        events
    }

    fn take_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let data = self.data.join("\n");
            self.data.clear();
            return Some(data);
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

/// Reads the provider lines inside one event's data.
///
/// Each non-blank line may still carry its own `data: ` prefix. Parsing stops
/// at `[DONE]`. A line that is not valid JSON becomes an error entry and the
/// following lines are still read.
pub fn parse_event_data(data: &str) -> Vec<Result<ProviderMessage, StreamError>> {
    let mut messages = Vec::new();

    for line in data.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let message = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
        if message == DONE_SENTINEL {
            messages.push(Ok(ProviderMessage::Done));
            break;
        }

        match serde_json::from_str::<CompletionChunk>(message) {
            Ok(chunk) => {
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty());
                if let Some(content) = content {
                    messages.push(Ok(ProviderMessage::Delta(content)));
                }
            }
            Err(error) => messages.push(Err(StreamError::Parse {
                message: message.to_string(),
                details: error.to_string(),
            })),
        }
    }

    messages
}

/// A live answer. Dropping it or calling [`AnswerStream::cancel`] stops the
/// reader task, which closes the connection.
pub struct AnswerStream {
    events: mpsc::Receiver<AnswerEvent>,
    reader: JoinHandle<()>,
    cancelled: bool,
    ended: bool,
}

impl AnswerStream {
    pub fn from_bytes<S, E>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (sender, events) = mpsc::channel(CHANNEL_CAPACITY);
        let reader = tokio::spawn(pump(body, sender));
        Self {
            events,
            reader,
            cancelled: false,
            ended: false,
        }
    }

    /// Next delta, then exactly one [`AnswerEvent::End`], then `None`.
    pub async fn next(&mut self) -> Option<AnswerEvent> {
        if self.ended {
            return None;
        }
        if self.cancelled {
            self.ended = true;
            return Some(AnswerEvent::End(StreamEnd::Cancelled));
        }

        let event = self
            .events
            .recv()
            .await
            .unwrap_or(AnswerEvent::End(StreamEnd::Disconnected));
        if matches!(event, AnswerEvent::End(_)) {
            self.ended = true;
        }
        Some(event)
    }

    pub fn cancel(&mut self) {
        if !self.ended {
            self.cancelled = true;
            self.reader.abort();
            self.events.close();
        }
    }

    /// Drains the stream into the full answer text and how it ended.
    pub async fn collect_text(mut self) -> (String, StreamEnd) {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                AnswerEvent::Delta(delta) => text.push_str(&delta),
                AnswerEvent::End(end) => return (text, end),
            }
        }
        (text, StreamEnd::Disconnected)
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn pump<S, E>(body: S, sender: mpsc::Sender<AnswerEvent>)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    let mut body = Box::pin(body);
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                warn!(%error, "answer stream transport failed");
                let _ = sender.send(AnswerEvent::End(StreamEnd::Disconnected)).await;
                return;
            }
        };

        for data in decoder.push(&chunk) {
            for message in parse_event_data(&data) {
                match message {
                    Ok(ProviderMessage::Delta(delta)) => {
                        if sender.send(AnswerEvent::Delta(delta)).await.is_err() {
                            return;
                        }
                    }
                    Ok(ProviderMessage::Done) => {
                        debug!("answer stream completed");
                        let _ = sender.send(AnswerEvent::End(StreamEnd::Completed)).await;
                        return;
                    }
                    Err(error) => warn!(%error, "skipping stream message"),
                }
            }
        }
    }

    debug!("answer stream ended without terminator");
    let _ = sender.send(AnswerEvent::End(StreamEnd::Disconnected)).await;
}

pub fn chat_stream_url(server: &str, question: &str, doc_id: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(server)?.join(CHAT_STREAM_PATH)?;
    url.query_pairs_mut()
        .append_pair("q", question)
        .append_pair("doc", doc_id);
    Ok(url)
}

/// Opens the chat endpoint. A non-2xx answer is an error; after that every
/// failure shows up as the stream's [`StreamEnd`].
pub async fn consume_stream(client: &Client, url: Url) -> Result<AnswerStream, StreamError> {
    let response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StreamError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(AnswerStream::from_bytes(response.bytes_stream()))
}
