use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ChatMessage;
use crate::core::chat_stream::{StreamMessage, StreamParams};
use crate::core::config::Settings;
use crate::core::message::{Message, Role};

/// Coordinates handed to the host when a stream starts. The token aborts
/// the in-flight request; the id lets stale output be recognized.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub message_id: String,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Single-writer container for the transcript and the active stream.
///
/// All mutation goes through `&mut self`, so delta application is atomic
/// with respect to anything else the host does between channel drains;
/// there is no way to observe a half-applied append.
#[derive(Default)]
pub struct Conversation {
    messages: Vec<Message>,
    current_stream_id: u64,
    stream_cancel_token: Option<CancellationToken>,
    streaming_message_id: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True while an assistant placeholder is still accumulating. Hosts
    /// gate the send action on this; the container itself also cancels any
    /// previous stream before starting a new one.
    pub fn is_streaming(&self) -> bool {
        self.streaming_message_id.is_some()
    }

    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.current_stream_id == stream_id
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &Message {
        self.messages.push(Message::user(content));
        self.messages.last().expect("just pushed")
    }

    /// Append the pending assistant placeholder and hand out the stream
    /// coordinates. Cancels any previous stream first, so no two streams
    /// ever target the same message.
    pub fn begin_assistant(&mut self) -> StreamHandle {
        self.cancel_current_stream();

        let placeholder = Message::assistant_placeholder();
        let message_id = placeholder.id.clone();
        self.messages.push(placeholder);

        self.current_stream_id += 1;
        let cancel_token = CancellationToken::new();
        self.stream_cancel_token = Some(cancel_token.clone());
        self.streaming_message_id = Some(message_id.clone());

        StreamHandle {
            message_id,
            cancel_token,
            stream_id: self.current_stream_id,
        }
    }

    pub fn cancel_current_stream(&mut self) {
        if let Some(token) = self.stream_cancel_token.take() {
            token.cancel();
        }
        self.streaming_message_id = None;
    }

    /// Everything the dispatcher needs for one request, captured from the
    /// settings at invocation time.
    pub fn build_stream_params(
        &self,
        client: &reqwest::Client,
        settings: &Settings,
        handle: &StreamHandle,
    ) -> StreamParams {
        StreamParams {
            client: client.clone(),
            server_url: settings.server_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            api_messages: self.api_messages(&settings.system_prompt),
            cancel_token: handle.cancel_token.clone(),
            stream_id: handle.stream_id,
        }
    }

    /// Apply one dispatcher message. Output tagged with a superseded stream
    /// id is dropped.
    pub fn apply(&mut self, message: StreamMessage, stream_id: u64) {
        if !self.is_current_stream(stream_id) {
            debug!(stream_id, "dropping output from superseded stream");
            return;
        }
        match message {
            StreamMessage::Chunk(delta) => self.append_delta(&delta),
            StreamMessage::Error(text) => self.append_error_annotation(&text),
            StreamMessage::End => self.finalize_stream(),
        }
    }

    fn streaming_message_mut(&mut self) -> Option<&mut Message> {
        let target = self.streaming_message_id.as_deref()?;
        let index = self
            .messages
            .iter()
            .position(|message| message.id == target)?;
        self.messages.get_mut(index)
    }

    fn append_delta(&mut self, delta: &str) {
        if let Some(message) = self.streaming_message_mut() {
            message.content.push_str(delta);
        }
    }

    /// Leaves any partial content in place and annotates the failure where
    /// the rest of the answer would have gone.
    fn append_error_annotation(&mut self, text: &str) {
        if let Some(message) = self.streaming_message_mut() {
            if !message.content.is_empty() {
                message.content.push_str("\n\n");
            }
            message.content.push_str("[error] ");
            message.content.push_str(text);
        }
    }

    fn finalize_stream(&mut self) {
        self.stream_cancel_token = None;
        self.streaming_message_id = None;
    }

    /// The wire view of the transcript: optional system prompt first, then
    /// every non-empty message in order. The pending placeholder is empty
    /// until the first delta lands, so it never leaks into a request.
    pub fn api_messages(&self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut wire = Vec::new();
        if !system_prompt.is_empty() {
            wire.push(ChatMessage {
                role: Role::System.as_str().to_string(),
                content: system_prompt.to_string(),
            });
        }
        wire.extend(
            self.messages
                .iter()
                .filter(|message| !message.content.is_empty())
                .map(Message::to_api_message),
        );
        wire
    }

    /// Bulk clear; messages are never deleted individually.
    pub fn clear(&mut self) {
        self.cancel_current_stream();
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_accumulate_in_arrival_order() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let handle = conversation.begin_assistant();

        conversation.apply(StreamMessage::Chunk("Hel".into()), handle.stream_id);
        conversation.apply(StreamMessage::Chunk("lo".into()), handle.stream_id);
        conversation.apply(StreamMessage::End, handle.stream_id);

        let assistant = conversation.messages().last().unwrap();
        assert_eq!(assistant.content, "Hello");
        assert!(!conversation.is_streaming());
    }

    #[test]
    fn superseded_stream_output_is_dropped() {
        let mut conversation = Conversation::new();
        conversation.push_user("first");
        let old = conversation.begin_assistant();
        conversation.apply(StreamMessage::Chunk("old ".into()), old.stream_id);

        conversation.push_user("second");
        let new = conversation.begin_assistant();
        assert!(old.cancel_token.is_cancelled());

        // Late output from the first stream must not land anywhere.
        conversation.apply(StreamMessage::Chunk("ghost".into()), old.stream_id);
        conversation.apply(StreamMessage::Chunk("fresh".into()), new.stream_id);

        let contents: Vec<&str> = conversation
            .messages()
            .iter()
            .map(|message| message.content.as_str())
            .collect();
        assert_eq!(contents, vec!["first", "old ", "second", "fresh"]);
    }

    #[test]
    fn error_annotation_keeps_partial_content() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let handle = conversation.begin_assistant();

        conversation.apply(StreamMessage::Chunk("partial answer".into()), handle.stream_id);
        conversation.apply(
            StreamMessage::Error("model not loaded".into()),
            handle.stream_id,
        );
        conversation.apply(StreamMessage::End, handle.stream_id);

        let assistant = conversation.messages().last().unwrap();
        assert_eq!(assistant.content, "partial answer\n\n[error] model not loaded");
        assert!(!conversation.is_streaming());
    }

    #[test]
    fn wire_messages_lead_with_the_system_prompt() {
        let mut conversation = Conversation::new();
        conversation.push_user("question");
        conversation.begin_assistant();

        let wire = conversation.api_messages("Be brief.");
        assert_eq!(wire.len(), 2, "placeholder must not leak into the request");
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[0].content, "Be brief.");
        assert_eq!(wire[1].role, "user");

        let without_prompt = conversation.api_messages("");
        assert_eq!(without_prompt.len(), 1);
        assert_eq!(without_prompt[0].role, "user");
    }

    #[test]
    fn clear_empties_the_transcript_and_cancels() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let handle = conversation.begin_assistant();

        conversation.clear();
        assert!(conversation.messages().is_empty());
        assert!(!conversation.is_streaming());
        assert!(handle.cancel_token.is_cancelled());
    }

    #[test]
    fn stream_params_capture_settings_at_invocation() {
        let mut settings = Settings::default();
        settings.server_url = "http://192.168.1.109:6969".to_string();
        settings.api_key = "home-link-secret".to_string();
        settings.system_prompt = "Be brief.".to_string();

        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let handle = conversation.begin_assistant();
        let params =
            conversation.build_stream_params(&reqwest::Client::new(), &settings, &handle);

        assert_eq!(params.server_url, settings.server_url);
        assert_eq!(params.api_key, settings.api_key);
        assert_eq!(params.stream_id, handle.stream_id);
        assert_eq!(params.api_messages[0].role, "system");
    }
}
