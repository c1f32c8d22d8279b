//! Bot Server Dispatcher (C4): routes incoming requests by `type` to the
//! correct handler, authenticates, and hands `query` off to the streaming
//! driver (spec §4.4).

use crate::config::ServerConfig;
use crate::driver::DriverItem;
use crate::error::{DriverError, ServerError};
use crate::protocol::{
    BaseRequest, QueryRequest, ReportErrorRequest, ReportFeedbackRequest, Request,
    SettingsResponse,
};
use futures::stream::BoxStream;
use std::collections::HashSet;

pub const LANDING_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html><head><title>Bot</title></head>
<body><p>This endpoint implements the bot protocol. POST a JSON request body to interact with it.</p></body>
</html>"#;

/// What the dispatcher decided to do with a request (spec §4.4's routing
/// table), for the thin HTTP glue to translate into a real response.
pub enum DispatchOutcome {
    /// `query`: drive `stream` through the C5 driver as an SSE response.
    Stream(BoxStream<'static, Result<DriverItem, DriverError>>),
    /// `settings`/`report_feedback`/`report_error`: a JSON body.
    Json(serde_json::Value),
}

/// One bot's handler implementation. `handle_query` returns a lazy sequence
/// driven by C5; the others are single awaited calls (spec §4.4's table).
#[async_trait::async_trait]
pub trait BotHandler: Send + Sync {
    async fn handle_query(
        &self,
        request: QueryRequest,
    ) -> BoxStream<'static, Result<DriverItem, DriverError>>;

    async fn handle_settings(&self, request: &BaseRequest) -> Result<SettingsResponse, ServerError>;

    async fn handle_report_feedback(
        &self,
        request: &ReportFeedbackRequest,
    ) -> Result<(), ServerError>;

    async fn handle_report_error(&self, request: &ReportErrorRequest) -> Result<(), ServerError>;
}

/// One registered bot: its route config plus the handler it dispatches to.
pub struct BotHandle {
    pub config: ServerConfig,
    pub handler: std::sync::Arc<dyn BotHandler>,
}

impl BotHandle {
    pub fn new(config: ServerConfig, handler: std::sync::Arc<dyn BotHandler>) -> Self {
        Self { config, handler }
    }
}

/// Routes requests to the bot registered at a given path, enforcing path
/// uniqueness and per-bot authentication (spec §4.4).
pub struct BotDispatcher {
    bots: Vec<BotHandle>,
}

impl BotDispatcher {
    /// Fails with `InvalidParameter` if two bots share a path, if a
    /// top-level access key was supplied alongside more than one bot (each
    /// must carry its own key in that case), or if a bot resolved no access
    /// key and did not opt into `allow_without_key` (spec §4.4).
    pub fn new(bots: Vec<BotHandle>, top_level_key: Option<&str>) -> Result<Self, ServerError> {
        let mut seen_paths = HashSet::new();
        for bot in &bots {
            if !seen_paths.insert(bot.config.path.clone()) {
                return Err(ServerError::InvalidParameter(format!(
                    "duplicate bot path: {}",
                    bot.config.path
                )));
            }
        }

        if bots.len() > 1 && top_level_key.is_some() {
            return Err(ServerError::InvalidParameter(
                "a top-level access key is rejected when multiple bots are registered; each bot must carry its own".to_string(),
            ));
        }

        for bot in &bots {
            if bot.config.access_key.is_none() && !bot.config.allow_without_key {
                return Err(ServerError::InvalidParameter(format!(
                    "bot at {} has no access key; set one or call with_allow_without_key(true)",
                    bot.config.path
                )));
            }
        }

        Ok(Self { bots })
    }

    pub fn find(&self, path: &str) -> Option<&BotHandle> {
        self.bots.iter().find(|b| b.config.path == path)
    }

    /// Validate the `Authorization` header against the bot's resolved key.
    /// `None` means authenticated; `Some` is the rejection. A bot with no
    /// access key is only reachable here when `allow_without_key` was set,
    /// since `new` rejects the keyless+disallowed combination at
    /// construction time.
    pub fn authenticate(
        &self,
        bot: &BotHandle,
        authorization_header: Option<&str>,
    ) -> Result<(), ServerError> {
        let Some(expected) = &bot.config.access_key else {
            return Ok(());
        };

        let Some(header) = authorization_header else {
            return Err(ServerError::http(403, "Not authenticated"));
        };

        let Some(token) = header.strip_prefix("Bearer ") else {
            return Err(ServerError::http(403, "Not authenticated"));
        };

        if token != expected {
            return Err(ServerError::http_with_headers(
                401,
                "Invalid access key",
                vec![("WWW-Authenticate".to_string(), "Bearer".to_string())],
            ));
        }

        Ok(())
    }

    /// Request types this dispatcher knows how to route; anything else is
    /// `UnsupportedRequestType` rather than a generic parse failure.
    const KNOWN_REQUEST_TYPES: [&'static str; 4] =
        ["query", "settings", "report_feedback", "report_error"];

    /// Dispatch a decoded request body to the matching bot's handler.
    pub async fn dispatch(
        &self,
        bot: &BotHandle,
        body: serde_json::Value,
    ) -> Result<DispatchOutcome, ServerError> {
        if let Some(kind) = body.get("type").and_then(|v| v.as_str()) {
            if !Self::KNOWN_REQUEST_TYPES.contains(&kind) {
                return Err(ServerError::UnsupportedRequestType(kind.to_string()));
            }
        }

        let request: Request = serde_json::from_value(body)
            .map_err(|e| ServerError::InvalidParameter(e.to_string()))?;

        match request {
            Request::Query(query) => {
                let stream = bot.handler.handle_query(query).await;
                Ok(DispatchOutcome::Stream(stream))
            }
            Request::Settings(base) => {
                let settings = bot.handler.handle_settings(&base).await?;
                settings.validate()?;
                Ok(DispatchOutcome::Json(serde_json::to_value(settings).unwrap()))
            }
            Request::ReportFeedback(feedback) => {
                bot.handler.handle_report_feedback(&feedback).await?;
                Ok(DispatchOutcome::Json(serde_json::json!({})))
            }
            Request::ReportError(report) => {
                bot.handler.handle_report_error(&report).await?;
                Ok(DispatchOutcome::Json(serde_json::json!({})))
            }
        }
    }
}
