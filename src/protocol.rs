//! Wire-level data model (spec §3): tagged request/response types, modeled as
//! serde enums rather than an inheritance hierarchy (Design Note §9).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ASCII identifier. `access_key`, when present, is exactly
/// [`ACCESS_KEY_LENGTH`] characters.
pub type Identifier = String;

pub const ACCESS_KEY_LENGTH: usize = 32;
pub const MESSAGE_LENGTH_LIMIT: usize = 10_000;
pub const MAX_EVENT_COUNT: usize = 1_000;
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    #[serde(rename = "text/markdown")]
    TextMarkdown,
    #[serde(rename = "text/plain")]
    TextPlain,
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::TextMarkdown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Like,
    Dislike,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFeedback {
    #[serde(rename = "type")]
    pub feedback_type: FeedbackType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub content_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    pub timestamp: i64,
    pub message_id: Identifier,
    #[serde(default)]
    pub feedback: Vec<MessageFeedback>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// The tagged union of spec §3's `Request`. `type` drives the dispatch table
/// in §4.4; each variant carries `version` directly (not hoisted to a shared
/// wrapper struct) so that serde's externally tagged enum matches the wire
/// shape exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Query(QueryRequest),
    Settings(BaseRequest),
    ReportFeedback(ReportFeedbackRequest),
    ReportError(ReportErrorRequest),
}

impl Request {
    pub fn version(&self) -> &str {
        match self {
            Request::Query(q) => &q.version,
            Request::Settings(b) => &b.version,
            Request::ReportFeedback(r) => &r.version,
            Request::ReportError(r) => &r.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseRequest {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub version: String,
    pub query: Vec<ProtocolMessage>,
    pub user_id: String,
    pub conversation_id: String,
    pub message_id: Identifier,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub skip_system_prompt: bool,
    #[serde(default)]
    pub logit_bias: HashMap<String, f32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFeedbackRequest {
    pub version: String,
    pub message_id: Identifier,
    pub user_id: String,
    pub conversation_id: String,
    pub feedback_type: FeedbackType,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportErrorRequest {
    pub version: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsResponse {
    #[serde(default)]
    pub server_bot_dependencies: HashMap<String, i32>,
    #[serde(default)]
    pub allow_attachments: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction_message: Option<String>,
    #[serde(default = "default_true")]
    pub expand_text_attachments: bool,
    #[serde(default)]
    pub enable_image_comprehension: bool,
    #[serde(default)]
    pub enforce_author_role_alternation: bool,
    #[serde(default)]
    pub enable_multi_bot_chat_prompting: bool,

    /// Deprecated: accepted but ignored.
    #[serde(default, skip_serializing)]
    #[allow(dead_code)]
    pub context_clear_window_secs: Option<i64>,
    /// Deprecated: accepted but ignored.
    #[serde(default, skip_serializing)]
    #[allow(dead_code)]
    pub allow_user_context_clear: Option<bool>,
}

fn default_true() -> bool {
    true
}

impl Default for SettingsResponse {
    fn default() -> Self {
        Self {
            server_bot_dependencies: HashMap::new(),
            allow_attachments: false,
            introduction_message: None,
            expand_text_attachments: true,
            enable_image_comprehension: false,
            enforce_author_role_alternation: false,
            enable_multi_bot_chat_prompting: false,
            context_clear_window_secs: None,
            allow_user_context_clear: None,
        }
    }
}

impl SettingsResponse {
    /// Reject a settings response spec §7 wouldn't accept: a negative
    /// dependency call count, or an explicit-but-empty introduction message.
    pub fn validate(&self) -> Result<(), crate::error::InvalidBotSettings> {
        for (name, count) in &self.server_bot_dependencies {
            if *count < 0 {
                return Err(crate::error::InvalidBotSettings(format!(
                    "server_bot_dependencies[{name}] must be non-negative, got {count}"
                )));
            }
        }
        if let Some(message) = &self.introduction_message {
            if message.is_empty() {
                return Err(crate::error::InvalidBotSettings(
                    "introduction_message must not be empty when present".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One tagged variant per spec §3's PartialResponse/MetaResponse/ErrorResponse
/// family (Design Note §9: a discriminated union, not an inheritance chain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BotResponse {
    Partial(PartialResponse),
    Meta(MetaResponse),
    Error(ErrorResponseData),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub is_suggested_reply: bool,
    #[serde(default)]
    pub is_replace_response: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaResponse {
    #[serde(flatten)]
    pub base: PartialResponse,
    pub linkify: bool,
    pub suggested_replies: bool,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refetch_settings: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponseData {
    #[serde(flatten)]
    pub base: PartialResponse,
    #[serde(default = "default_true")]
    pub allow_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

/// OpenAI-function-calling-shaped tool types (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A fully assembled tool call, after delta aggregation (spec §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunctionCall,
    /// Ordering key from the stream; not serialized to the wire on round 2.
    #[serde(skip)]
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultDefinition {
    pub role: String,
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_defaults() {
        let json = serde_json::json!({
            "type": "query",
            "version": "1.0",
            "query": [],
            "user_id": "u1",
            "conversation_id": "c1",
            "message_id": "m1",
        });
        let req: Request = serde_json::from_value(json).unwrap();
        match req {
            Request::Query(q) => {
                assert_eq!(q.temperature, 0.7);
                assert!(!q.skip_system_prompt);
                assert!(q.stop_sequences.is_empty());
            }
            _ => panic!("expected Query"),
        }
    }

    #[test]
    fn settings_response_deprecated_fields_round_trip_ignored() {
        let json = serde_json::json!({
            "context_clear_window_secs": 30,
            "allow_user_context_clear": true,
        });
        let settings: SettingsResponse = serde_json::from_value(json).unwrap();
        assert!(settings.expand_text_attachments);
        let serialized = serde_json::to_value(&settings).unwrap();
        assert!(serialized.get("context_clear_window_secs").is_none());
    }

    #[test]
    fn unsupported_request_type_fails_to_deserialize() {
        let json = serde_json::json!({"type": "unknown", "version": "1.0"});
        assert!(serde_json::from_value::<Request>(json).is_err());
    }
}
