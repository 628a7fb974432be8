use serde::{Deserialize, Serialize};

/// Header carrying the shared secret on every request to the proxy.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// One entry of the `messages` array sent to the proxy's chat endpoint.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST {base}/chat`. The proxy forwards this to the model server
/// verbatim, so the field names follow the OpenAI chat-completions shape.
#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    pub delta: ChatResponseDelta,
}

/// One streamed frame: `{"choices":[{"delta":{"content":"..."}}]}`.
#[derive(Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}

/// One entry of the `data` array returned by `GET {base}/models`.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub object: Option<String>,
    pub owned_by: Option<String>,
}

#[derive(Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelInfo>,
}
