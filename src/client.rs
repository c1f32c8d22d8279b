//! Bot Client (C2): outbound query to a remote bot endpoint over HTTP+SSE,
//! with the client state machine, back-channel error reporting, and the
//! retry policy (spec §4.2).
//!
//! Built the way the teacher turns an HTTP+SSE response into a typed event
//! stream (`llm::openai::OpenAIProvider::chat`): `async_stream::stream!`
//! pinned over `response.bytes_stream()`. The SSE parsing itself is this
//! crate's own [`crate::sse`] codec rather than the teacher's
//! `eventsource_stream::Eventsource` extension trait, since decoding SSE is
//! the very component being built here.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::orchestrator::{execute_all, ExecutableRegistry, ToolCallAssembler};
use crate::protocol::{
    ContentType, ErrorResponseData, MetaResponse, PartialResponse, QueryRequest, ToolCallDefinition,
    ToolDefinition, ToolResultDefinition,
};
use crate::protocol::{BotResponse, PROTOCOL_VERSION};
use crate::sse::{feed_lines, SseDecoder};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// The outbound wire body for a query (spec §4.2's "Outbound payload").
#[derive(Debug, Clone, Serialize)]
pub struct QueryPayload {
    #[serde(flatten)]
    pub request: QueryRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultDefinition>>,
}

impl QueryPayload {
    pub fn new(request: QueryRequest) -> Self {
        Self {
            request,
            tools: None,
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_round_two(
        mut self,
        tool_calls: Vec<ToolCallDefinition>,
        tool_results: Vec<ToolResultDefinition>,
    ) -> Self {
        self.tool_calls = Some(tool_calls);
        self.tool_results = Some(tool_results);
        self
    }

    fn has_tools(&self) -> bool {
        self.tools.is_some() || self.tool_calls.is_some()
    }
}

#[derive(Debug, Deserialize, Default)]
struct TextEventPayload {
    text: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    raw_response: Option<Value>,
    #[serde(default)]
    full_prompt: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaEventPayload {
    linkify: bool,
    suggested_replies: bool,
    #[serde(default = "default_content_type")]
    content_type: String,
}

fn default_content_type() -> String {
    "text/markdown".to_string()
}

#[derive(Debug, Deserialize)]
struct ErrorEventPayload {
    #[serde(default)]
    text: String,
    #[serde(default = "default_true")]
    allow_retry: bool,
    #[serde(default)]
    error_type: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Outbound client for the bot protocol (spec §4.2).
pub struct BotClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl BotClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, bot_name: &str) -> String {
        format!("{}{}", self.config.base_url, bot_name)
    }

    /// Single HTTP attempt: POST, open the stream, validate Content-Type,
    /// and return a lazily-decoded event stream. The outer `Result` models
    /// connect-time failure (before any event was yielded); the inner
    /// stream's `Result` items model mid-stream failure.
    async fn perform_query(
        &self,
        bot_name: &str,
        payload: &QueryPayload,
    ) -> Result<BoxStream<'static, Result<BotResponse, ClientError>>, ClientError> {
        let mut req = self
            .http
            .post(self.endpoint(bot_name))
            .header("Accept", "application/json")
            .json(payload);

        if let Some(api_key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req.send().await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.starts_with("text/event-stream") {
            return Err(ClientError::InvalidContentType(content_type));
        }

        let has_tools = payload.has_tools();
        let mut byte_stream = response.bytes_stream();
        let http = self.http.clone();
        let config = self.config.clone();
        let bot_name = bot_name.to_string();

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut carry = String::new();
            let mut chunks: Vec<String> = Vec::new();
            let mut produced_text = false;
            let mut saw_meta = false;
            let mut saw_error = false;
            let mut saw_done = false;
            let mut event_position: u32 = 0;

            'outer: while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(ClientError::Network(e));
                        return;
                    }
                };
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let events = feed_lines(&mut decoder, &mut carry, &text);

                for event in events {
                    let is_first_event = event_position == 0;
                    event_position += 1;
                    let name = event.event_name().to_string();
                    let data = event.data.unwrap_or_default();

                    match name.as_str() {
                        "text" => {
                            match serde_json::from_str::<TextEventPayload>(&data) {
                                Ok(parsed) => {
                                    chunks.push(parsed.text.clone());
                                    produced_text = true;
                                    yield Ok(BotResponse::Partial(PartialResponse {
                                        text: parsed.text,
                                        data: parsed.data,
                                        raw_response: parsed.raw_response,
                                        full_prompt: parsed.full_prompt,
                                        request_id: parsed.request_id,
                                        is_suggested_reply: false,
                                        is_replace_response: false,
                                    }));
                                }
                                Err(e) => {
                                    yield Err(ClientError::Json(e));
                                    return;
                                }
                            }
                        }
                        "replace_response" => {
                            match serde_json::from_str::<TextEventPayload>(&data) {
                                Ok(parsed) => {
                                    chunks.clear();
                                    chunks.push(parsed.text.clone());
                                    produced_text = true;
                                    yield Ok(BotResponse::Partial(PartialResponse {
                                        text: parsed.text,
                                        data: parsed.data,
                                        raw_response: parsed.raw_response,
                                        full_prompt: parsed.full_prompt,
                                        request_id: parsed.request_id,
                                        is_suggested_reply: false,
                                        is_replace_response: true,
                                    }));
                                }
                                Err(e) => {
                                    yield Err(ClientError::Json(e));
                                    return;
                                }
                            }
                        }
                        "suggested_reply" => {
                            match serde_json::from_str::<TextEventPayload>(&data) {
                                Ok(parsed) => {
                                    yield Ok(BotResponse::Partial(PartialResponse {
                                        text: parsed.text,
                                        data: parsed.data,
                                        raw_response: parsed.raw_response,
                                        full_prompt: parsed.full_prompt,
                                        request_id: parsed.request_id,
                                        is_suggested_reply: true,
                                        is_replace_response: false,
                                    }));
                                }
                                Err(e) => {
                                    yield Err(ClientError::Json(e));
                                    return;
                                }
                            }
                        }
                        "json" => {
                            match serde_json::from_str::<Value>(&data) {
                                Ok(parsed) => {
                                    yield Ok(BotResponse::Partial(PartialResponse {
                                        text: String::new(),
                                        data: Some(parsed),
                                        ..Default::default()
                                    }));
                                }
                                Err(e) => {
                                    yield Err(ClientError::Json(e));
                                    return;
                                }
                            }
                        }
                        "meta" => {
                            if !is_first_event || saw_meta {
                                continue;
                            }
                            match serde_json::from_str::<MetaEventPayload>(&data) {
                                Ok(parsed) => {
                                    let content_type = match parsed.content_type.as_str() {
                                        "text/markdown" => ContentType::TextMarkdown,
                                        "text/plain" => ContentType::TextPlain,
                                        _ => {
                                            report_error_best_effort(
                                                &http,
                                                &config,
                                                &bot_name,
                                                &format!("Invalid content_type in meta event: {}", parsed.content_type),
                                            ).await;
                                            continue;
                                        }
                                    };
                                    saw_meta = true;
                                    yield Ok(BotResponse::Meta(MetaResponse {
                                        base: PartialResponse::default(),
                                        linkify: parsed.linkify,
                                        suggested_replies: parsed.suggested_replies,
                                        content_type,
                                        refetch_settings: None,
                                    }));
                                }
                                Err(e) => {
                                    yield Err(ClientError::Json(e));
                                    return;
                                }
                            }
                        }
                        "error" => {
                            saw_error = true;
                            match serde_json::from_str::<ErrorEventPayload>(&data) {
                                Ok(parsed) => {
                                    yield Ok(BotResponse::Error(ErrorResponseData {
                                        base: PartialResponse {
                                            text: parsed.text.clone(),
                                            ..Default::default()
                                        },
                                        allow_retry: parsed.allow_retry,
                                        error_type: parsed.error_type.clone(),
                                    }));
                                    if parsed.allow_retry {
                                        yield Err(ClientError::BotError(parsed.text));
                                    } else {
                                        yield Err(ClientError::BotErrorNoRetry(parsed.text));
                                    }
                                    return;
                                }
                                Err(e) => {
                                    yield Err(ClientError::Json(e));
                                    return;
                                }
                            }
                        }
                        "ping" => {
                            // Not counted toward the "no text" check; no yield.
                        }
                        "done" => {
                            saw_done = true;
                            if !produced_text && !saw_error && !has_tools {
                                report_error_best_effort(
                                    &http,
                                    &config,
                                    &bot_name,
                                    "Bot returned no text in response",
                                ).await;
                            }
                            break 'outer;
                        }
                        other => {
                            let truncated_name: String = other.chars().take(100).collect();
                            let truncated_data: String = data.chars().take(500).collect();
                            report_error_best_effort(
                                &http,
                                &config,
                                &bot_name,
                                &format!("Unknown event type: {} {}", truncated_name, truncated_data),
                            ).await;
                        }
                    }
                }
            }

            if !saw_done {
                report_error_best_effort(
                    &http,
                    &config,
                    &bot_name,
                    "Bot exited without sending 'done' event",
                ).await;
            }
        };

        Ok(Box::pin(stream))
    }

    /// Wraps [`Self::perform_query`] with the retry policy (spec §4.2):
    /// `BotErrorNoRetry` never retries; any other error retries only if no
    /// bytes were yielded on this attempt, or the transport error looks like
    /// a connection-abort/read-timeout.
    pub fn stream_request(
        self: Arc<Self>,
        bot_name: String,
        payload: QueryPayload,
    ) -> BoxStream<'static, Result<BotResponse, ClientError>> {
        Box::pin(async_stream::stream! {
            let num_tries = self.config.num_tries.max(1);
            let mut last_err: Option<ClientError> = None;

            for attempt in 1..=num_tries {
                let mut yielded_any = false;
                let mut connection_abort = false;
                let mut fatal: Option<ClientError> = None;

                match self.perform_query(&bot_name, &payload).await {
                    Ok(mut inner) => {
                        while let Some(item) = inner.next().await {
                            match item {
                                Ok(response) => {
                                    yielded_any = true;
                                    yield Ok(response);
                                }
                                Err(err) => {
                                    connection_abort = err.is_connection_abort_like();
                                    fatal = Some(err);
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        connection_abort = err.is_connection_abort_like();
                        fatal = Some(err);
                    }
                }

                match fatal {
                    None => return,
                    Some(err) => {
                        let no_retry = matches!(err, ClientError::BotErrorNoRetry(_));
                        let retryable = !no_retry && (!yielded_any || connection_abort);
                        last_err = Some(err);

                        if attempt == num_tries || !retryable {
                            break;
                        }
                        tokio::time::sleep(self.config.retry_sleep_time).await;
                    }
                }
            }

            if let Some(err) = last_err {
                if matches!(err, ClientError::BotErrorNoRetry(_)) {
                    yield Err(err);
                } else {
                    yield Err(ClientError::BotError(format!(
                        "Error communicating with bot {}",
                        bot_name
                    )));
                }
            }
        })
    }

    /// Drives the full tool-using flow (spec §4.3): round 1 with `tools`
    /// attached, assembling any streamed tool-call deltas; if the bot made
    /// calls, executes them against `registry` and issues round 2 with the
    /// results, yielding both rounds' events as one stream. A round 1 with
    /// no tool calls yields only round 1.
    pub fn stream_with_tools(
        self: Arc<Self>,
        bot_name: String,
        request: QueryRequest,
        tools: Vec<ToolDefinition>,
        registry: ExecutableRegistry,
    ) -> BoxStream<'static, Result<BotResponse, ClientError>> {
        Box::pin(async_stream::stream! {
            let round_one = QueryPayload::new(request.clone()).with_tools(tools);
            let mut assembler = ToolCallAssembler::new();
            let mut inner = self.clone().stream_request(bot_name.clone(), round_one);

            while let Some(item) = inner.next().await {
                match item {
                    Ok(response) => {
                        if let BotResponse::Partial(partial) = &response {
                            assembler.ingest_partial_response(partial);
                        }
                        yield Ok(response);
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }

            if assembler.is_empty() {
                return;
            }

            let tool_calls = match assembler.into_tool_calls() {
                Ok(calls) => calls,
                Err(e) => {
                    yield Err(ClientError::BotErrorNoRetry(e.to_string()));
                    return;
                }
            };

            let tool_results = match execute_all(&registry, &tool_calls).await {
                Ok(results) => results,
                Err(e) => {
                    yield Err(ClientError::BotErrorNoRetry(e.to_string()));
                    return;
                }
            };

            let round_two = QueryPayload::new(request).with_round_two(tool_calls, tool_results);
            let mut inner = self.stream_request(bot_name, round_two);
            while let Some(item) = inner.next().await {
                yield item;
            }
        })
    }
}

/// Back-channel: POSTs a `report_error` request to the same endpoint (spec
/// §4.2). Failures are logged, never raised — they must not mask the
/// primary failure that triggered the report.
async fn report_error_best_effort(
    http: &reqwest::Client,
    config: &ClientConfig,
    bot_name: &str,
    message: &str,
) {
    let request = crate::protocol::ReportErrorRequest {
        version: PROTOCOL_VERSION.to_string(),
        message: message.to_string(),
        metadata: None,
    };

    let mut req = http
        .post(format!("{}{}", config.base_url, bot_name))
        .header("Accept", "application/json")
        .json(&request);

    if let Some(api_key) = &config.api_key {
        req = req.header("Authorization", format!("Bearer {}", api_key));
    }

    if let Err(e) = req.send().await {
        log::warn!("back-channel report_error to {} failed: {}", bot_name, e);
    }
}

/// Reconstructs the final accumulated text from a sequence of yielded
/// responses, honoring `replace_response` resets (spec §8 scenario S4).
pub fn accumulate_text(responses: &[BotResponse]) -> String {
    let mut chunks: Vec<String> = Vec::new();
    for response in responses {
        if let BotResponse::Partial(partial) = response {
            if partial.is_suggested_reply {
                continue;
            }
            if partial.is_replace_response {
                chunks.clear();
            }
            chunks.push(partial.text.clone());
        }
    }
    chunks.join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_text_handles_replace_response() {
        let responses = vec![
            BotResponse::Partial(PartialResponse {
                text: "A".to_string(),
                ..Default::default()
            }),
            BotResponse::Partial(PartialResponse {
                text: "B".to_string(),
                is_replace_response: true,
                ..Default::default()
            }),
        ];
        assert_eq!(accumulate_text(&responses), "B");
    }

    #[test]
    fn accumulate_text_skips_suggested_replies() {
        let responses = vec![
            BotResponse::Partial(PartialResponse {
                text: "main".to_string(),
                ..Default::default()
            }),
            BotResponse::Partial(PartialResponse {
                text: "suggestion".to_string(),
                is_suggested_reply: true,
                ..Default::default()
            }),
        ];
        assert_eq!(accumulate_text(&responses), "main");
    }

    #[test]
    fn query_payload_serializes_flattened_request() {
        let request = QueryRequest {
            version: PROTOCOL_VERSION.to_string(),
            query: vec![],
            user_id: "u1".to_string(),
            conversation_id: "c1".to_string(),
            message_id: "m1".to_string(),
            temperature: 0.7,
            skip_system_prompt: false,
            logit_bias: Default::default(),
            stop_sequences: vec![],
            metadata: None,
            api_key: None,
            access_key: None,
        };
        let payload = QueryPayload::new(request);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert!(json.get("tools").is_none());
    }
}
