use serde::{Deserialize, Serialize};

/// User-editable connection and sampling preferences.
///
/// The whole struct round-trips through one JSON blob at a fixed path.
/// `#[serde(default)]` merges a stale blob over the defaults field by
/// field: fields added in a newer release fall back to their default,
/// unknown fields are ignored, and nothing is validated on load.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the proxy. Trailing slash insignificant.
    pub server_url: String,
    /// Shared secret sent as the `X-API-Key` header.
    pub api_key: String,
    pub model: String,
    /// Sampling temperature, expected in [0, 2].
    pub temperature: f64,
    /// Upper bound on generated tokens, expected > 0.
    pub max_tokens: u32,
    /// Prepended to the wire messages as a system message when non-empty.
    pub system_prompt: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:6969".to_string(),
            api_key: String::new(),
            model: "default".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            system_prompt: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_every_field() {
        let settings = Settings {
            server_url: "http://192.168.1.109:6969".to_string(),
            api_key: "home-link-secret".to_string(),
            model: "kimi-vl-a3b-thinking-2506".to_string(),
            temperature: 1.3,
            max_tokens: 512,
            system_prompt: "You are terse.".to_string(),
        };
        let blob = serde_json::to_string(&settings).unwrap();
        let restored: Settings = serde_json::from_str(&blob).unwrap();
        assert_eq!(restored, settings);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        // A blob written before system_prompt and max_tokens existed.
        let restored: Settings =
            serde_json::from_str(r#"{"server_url":"http://10.0.0.5:6969","api_key":"s"}"#).unwrap();
        assert_eq!(restored.server_url, "http://10.0.0.5:6969");
        assert_eq!(restored.api_key, "s");
        assert_eq!(restored.model, Settings::default().model);
        assert_eq!(restored.max_tokens, Settings::default().max_tokens);
        assert_eq!(restored.system_prompt, "");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let restored: Settings =
            serde_json::from_str(r#"{"model":"default","dark_mode":true}"#).unwrap();
        assert_eq!(restored.model, "default");
    }

    #[test]
    fn empty_blob_is_all_defaults() {
        let restored: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(restored, Settings::default());
    }
}
