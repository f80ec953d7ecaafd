//! Stable error codes and the error body every endpoint shares.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

pub const ERR_INTERNAL: &str = "INTERNAL";
pub const ERR_CONFLICT: &str = "CONFLICT";
pub const ERR_VALIDATION: &str = "VALIDATION";
pub const ERR_NOT_FOUND: &str = "NOT_FOUND";

/// Where `details` links point: a playground that renders the error.
pub const TROUBLESHOOT_URL: &str = "https://play.numscript.org/?payload=";

/// Error fields of a response. Empty fields are omitted. The snake_case
/// pair mirrors the camelCase pair for older clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "errorCode", default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(rename = "errorMessage", default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(rename = "error_code", default, skip_serializing_if = "String::is_empty")]
    pub error_code_deprecated: String,
    #[serde(rename = "error_message", default, skip_serializing_if = "String::is_empty")]
    pub error_message_deprecated: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        let details = encode_link(&message);

        Self {
            error_code: code.clone(),
            error_message: message.clone(),
            error_code_deprecated: code,
            error_message_deprecated: message,
            details,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error_code.is_empty()
    }
}

/// Deterministic troubleshooting link for `message`; empty for an empty
/// message.
pub fn encode_link(message: &str) -> String {
    if message.is_empty() {
        return String::new();
    }

    let payload = serde_json::json!({ "error": message.replace('\n', "\r\n") });
    format!("{}{}", TROUBLESHOOT_URL, STANDARD.encode(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_encode_link_is_deterministic() {
        let a = encode_link("account had insufficient funds");
        let b = encode_link("account had insufficient funds");
        assert_eq!(a, b);
        assert!(a.starts_with(TROUBLESHOOT_URL));
        assert_ne!(a, encode_link("another message"));
    }

    #[test]
    fn test_encode_link_payload() {
        let link = encode_link("line one\nline two");
        let encoded = link.trim_start_matches(TROUBLESHOOT_URL);
        let decoded = STANDARD.decode(encoded).unwrap();
        let payload: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(payload["error"], "line one\r\nline two");
    }

    #[test]
    fn test_encode_link_empty() {
        assert_eq!(encode_link(""), "");
    }

    #[test]
    fn test_error_response_mirrors_fields() {
        let response = ErrorResponse::new(ERR_CONFLICT, "conflict error on reference");
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["errorCode"], "CONFLICT");
        assert_eq!(value["error_code"], "CONFLICT");
        assert_eq!(value["errorMessage"], "conflict error on reference");
        assert_eq!(value["error_message"], "conflict error on reference");
        assert_eq!(value["details"], encode_link("conflict error on reference"));
    }

    #[test]
    fn test_error_response_without_message() {
        let response = ErrorResponse::new(ERR_INTERNAL, "");
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["errorCode"], "INTERNAL");
        assert!(value.get("errorMessage").is_none());
        assert!(value.get("details").is_none());
        assert!(response.is_error());
        assert!(!ErrorResponse::default().is_error());
    }
}
