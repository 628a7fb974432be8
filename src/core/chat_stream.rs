use std::fmt;

use futures_util::{Stream, StreamExt};
use memchr::memchr;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{ChatMessage, ChatRequest, ChatResponse, API_KEY_HEADER};
use crate::utils::url::construct_api_url;

/// Payload that marks the logical end of a stream. The transport may stay
/// open after it; nothing past the sentinel is decoded.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Failures of one chat-stream invocation.
#[derive(Debug, PartialEq)]
pub enum StreamError {
    /// HTTP 403: the shared secret was rejected. Carries the response body.
    Auth(String),
    /// HTTP 404 on the chat endpoint: nothing is serving the expected path.
    EndpointNotFound,
    /// Any other non-2xx response.
    Http { status: u16, body: String },
    /// A stream frame carried an `error` field with this message.
    Upstream(String),
    /// The response ended before yielding a single byte.
    EmptyStream,
    /// Transport-level failure (connect, reset, abort).
    Network(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Auth(detail) => {
                write!(f, "Authentication failed (HTTP 403): {detail}")
            }
            StreamError::EndpointNotFound => write!(
                f,
                "Chat endpoint not found (HTTP 404): the server may not be running at the configured URL"
            ),
            StreamError::Http { status, body } => {
                write!(f, "Server error (HTTP {status}): {body}")
            }
            StreamError::Upstream(message) => write!(f, "{message}"),
            StreamError::EmptyStream => write!(f, "Response contained no readable stream"),
            StreamError::Network(detail) => write!(f, "Network error: {detail}"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Events produced by the decoder, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A visible fragment of assistant text.
    Delta(String),
    /// The `[DONE]` sentinel was seen.
    Done,
}

/// Incremental decoder for `data:`-framed event streams.
///
/// Bytes go in, complete frames come out through a callback. A trailing
/// partial line is held in the buffer until the next chunk; because frames
/// are only decoded as text once a `\n` is found, multi-byte UTF-8
/// sequences split across chunk boundaries reassemble correctly (0x0A never
/// occurs inside a multi-byte sequence).
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

fn extract_error_message(value: &serde_json::Value) -> Option<String> {
    let error = value.get("error")?;
    match error {
        serde_json::Value::String(message) => Some(message.clone()),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|message| message.as_str().map(str::to_owned))
            .or_else(|| Some(error.to_string())),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel has been seen; further input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of bytes, invoking `emit` for each decoded event.
    ///
    /// Frames with unparseable JSON are skipped: the proxy re-chunks the
    /// upstream body, so a frame can arrive split mid-payload, and dropping
    /// one frame beats aborting the whole response. A frame carrying an
    /// `error` field fails the decode with [`StreamError::Upstream`].
    pub fn feed(
        &mut self,
        chunk: &[u8],
        emit: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), StreamError> {
        if self.done {
            return Ok(());
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line = match std::str::from_utf8(&self.buffer[..newline_pos]) {
                Ok(line) => line.trim().to_string(),
                Err(err) => {
                    warn!("skipping stream line with invalid UTF-8: {err}");
                    self.buffer.drain(..=newline_pos);
                    continue;
                }
            };
            self.buffer.drain(..=newline_pos);

            self.handle_line(&line, emit)?;
            if self.done {
                return Ok(());
            }
        }
        Ok(())
    }

    fn handle_line(
        &mut self,
        line: &str,
        emit: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), StreamError> {
        if line.is_empty() {
            return Ok(());
        }
        let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
            return Ok(());
        };

        if payload == DONE_SENTINEL {
            self.done = true;
            emit(StreamEvent::Done);
            return Ok(());
        }

        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(err) => {
                debug!("skipping unparseable stream frame: {err}");
                return Ok(());
            }
        };

        if let Some(message) = extract_error_message(&value) {
            return Err(StreamError::Upstream(message));
        }

        match serde_json::from_value::<ChatResponse>(value) {
            Ok(response) => {
                let content = response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.as_deref());
                if let Some(content) = content {
                    if !content.is_empty() {
                        emit(StreamEvent::Delta(content.to_string()));
                    }
                }
            }
            Err(err) => debug!("skipping stream frame with unexpected shape: {err}"),
        }
        Ok(())
    }
}

/// Drive a [`SseDecoder`] over a fallible byte stream, calling `on_delta`
/// for each visible text fragment, strictly in arrival order and
/// synchronously with the decode loop.
///
/// Returns once the sentinel is seen or the stream ends; a trailing partial
/// line is discarded without error. A body that yields no chunks at all is
/// [`StreamError::EmptyStream`].
pub async fn decode_stream<S, B, E, F>(mut body: S, mut on_delta: F) -> Result<(), StreamError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
    F: FnMut(&str),
{
    let mut decoder = SseDecoder::new();
    let mut saw_bytes = false;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| StreamError::Network(err.to_string()))?;
        saw_bytes = true;

        decoder.feed(chunk.as_ref(), &mut |event| {
            if let StreamEvent::Delta(text) = event {
                on_delta(&text);
            }
        })?;
        if decoder.is_done() {
            return Ok(());
        }
    }

    if !saw_bytes {
        return Err(StreamError::EmptyStream);
    }
    Ok(())
}

async fn run_stream(
    client: &reqwest::Client,
    server_url: &str,
    api_key: &str,
    request: &ChatRequest,
    on_delta: impl FnMut(&str),
) -> Result<(), StreamError> {
    let chat_url = construct_api_url(server_url, "chat");
    debug!(url = %chat_url, model = %request.model, "starting chat stream");

    let response = client
        .post(chat_url)
        .header("Content-Type", "application/json")
        .header(API_KEY_HEADER, api_key)
        .json(request)
        .send()
        .await
        .map_err(|err| StreamError::Network(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        return Err(if status == StatusCode::FORBIDDEN {
            StreamError::Auth(body)
        } else if status == StatusCode::NOT_FOUND {
            StreamError::EndpointNotFound
        } else {
            StreamError::Http {
                status: status.as_u16(),
                body,
            }
        });
    }

    decode_stream(response.bytes_stream(), on_delta).await
}

/// Messages published by [`ChatStreamService`], tagged with a stream id so
/// the consumer can discard output from superseded streams.
#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    Error(String),
    End,
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub server_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub api_messages: Vec<ChatMessage>,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub stream_id: u64,
}

/// Spawns chat streams on the runtime and publishes their output over a
/// channel. The host drains the receiver on its own loop and applies chunks
/// to the pending assistant message.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                server_url,
                api_key,
                model,
                temperature,
                max_tokens,
                api_messages,
                cancel_token,
                stream_id,
            } = params;

            let request = ChatRequest {
                model,
                messages: api_messages,
                temperature,
                max_tokens,
                stream: true,
            };

            tokio::select! {
                _ = async {
                    let on_delta = |delta: &str| {
                        let _ = tx.send((StreamMessage::Chunk(delta.to_string()), stream_id));
                    };
                    if let Err(err) =
                        run_stream(&client, &server_url, &api_key, &request, on_delta).await
                    {
                        warn!(stream_id, "chat stream failed: {err}");
                        let _ = tx.send((StreamMessage::Error(err.to_string()), stream_id));
                    }
                    let _ = tx.send((StreamMessage::End, stream_id));
                } => {}
                _ = cancel_token.cancelled() => {}
            }
        });
    }
}
