//! Streaming Response Driver (C5): pumps a handler's lazy event sequence onto
//! an open SSE response while running a heartbeat and watching for peer
//! disconnect or shutdown (spec §4.5).
//!
//! Grounded on the same "first task to finish wins" shape the teacher uses in
//! `llm::provider::ChatLoopHandle` (an mpsc-channel-driven background task),
//! generalized to three cooperative tasks joined with `tokio::select!` rather
//! than one.

use crate::attachments::PendingAttachmentTable;
use crate::config::DriverOptions;
use crate::error::{AttachmentUploadError, DriverError};
use crate::protocol::{BotResponse, ErrorResponseData, Identifier, PartialResponse};
use crate::sse::{encode_event, ServerSentEvent};
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, watch};

/// One item a `handle_query` implementation may yield: either a typed
/// protocol response translated per spec §4.5's table, or a raw event passed
/// through verbatim (its `event` field is already set).
pub enum DriverItem {
    Response(BotResponse),
    Raw(ServerSentEvent),
}

/// A single write of encoded SSE bytes to the peer. Boxed and async so a
/// real backpressured transport (a bounded channel, a socket write) can be
/// wrapped in [`DriverOptions::send_timeout`].
pub type WriteFuture = Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send>>;

/// Why [`StreamingResponseDriver::emit_loop`] stopped. Only `HandlerDone`
/// gets a terminal `done` event written — a disconnect must produce no
/// further writes at all (spec §8 S6).
enum StopReason {
    HandlerDone,
    Disconnected,
}

/// Drives one SSE response to completion, writing encoded bytes through
/// `write`. `close_watch` fires when the peer disconnects or the process is
/// shutting down.
pub struct StreamingResponseDriver {
    options: DriverOptions,
}

impl StreamingResponseDriver {
    pub fn new(options: DriverOptions) -> Self {
        Self { options }
    }

    /// Run the driver loop to completion. `handler` is the bot's lazy event
    /// sequence; `attachments`/`message_id` identify the table entry to drain
    /// once the handler stops; `write` is the only writer of response bytes,
    /// matching Design Note §9's "avoid a shared lock" rule.
    pub async fn run(
        &self,
        mut handler: BoxStream<'static, Result<DriverItem, DriverError>>,
        attachments: &PendingAttachmentTable,
        message_id: Identifier,
        mut write: impl FnMut(String) -> WriteFuture,
        mut close_watch: watch::Receiver<bool>,
    ) -> Result<(), DriverError> {
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<String>(1);
        let ping_period = self.options.ping;
        let ping_factory = self.options.ping_message_factory.clone();
        let sep = self.options.sep;

        let heartbeat_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(ping_period).await;
                let encoded = match &ping_factory {
                    Some(factory) => encode_event(&factory(), None, sep),
                    None => encode_event(&ServerSentEvent::default(), Some(&ping_comment()), sep),
                };
                let Ok(encoded) = encoded else { continue };
                if heartbeat_tx.send(encoded).await.is_err() {
                    return;
                }
            }
        });

        let outcome = self
            .emit_loop(&mut handler, &mut heartbeat_rx, &mut write, &mut close_watch)
            .await;
        heartbeat_task.abort();

        let drain_errors = attachments.drain(&message_id).await;

        match outcome {
            // A disconnected peer gets no further writes at all, not even `done`.
            Ok(StopReason::Disconnected) => Ok(()),
            Ok(StopReason::HandlerDone) => match drain_errors.first() {
                None => self.write_event(&mut write, done_event()).await,
                Some(_) => {
                    self.write_event(&mut write, error_event("attachment upload failed", false, None))
                        .await?;
                    self.write_event(&mut write, done_event()).await
                }
            },
            Err(DriverError::Handler(msg)) => {
                self.write_event(&mut write, error_event(&msg, false, None)).await?;
                self.write_event(&mut write, done_event()).await
            }
            Err(DriverError::SendTimeout) => {
                let _ = self
                    .write_event(&mut write, error_event("error sse write timeout", false, None))
                    .await;
                Ok(())
            }
            Err(DriverError::Attachment(AttachmentUploadError(msg))) => {
                self.write_event(&mut write, error_event(&msg, false, None)).await?;
                self.write_event(&mut write, done_event()).await
            }
        }
    }

    async fn emit_loop(
        &self,
        handler: &mut BoxStream<'static, Result<DriverItem, DriverError>>,
        heartbeat_rx: &mut mpsc::Receiver<String>,
        write: &mut impl FnMut(String) -> WriteFuture,
        close_watch: &mut watch::Receiver<bool>,
    ) -> Result<StopReason, DriverError> {
        loop {
            tokio::select! {
                biased;

                changed = close_watch.changed() => {
                    if changed.is_err() || *close_watch.borrow() {
                        return Ok(StopReason::Disconnected);
                    }
                }

                item = handler.next() => {
                    match item {
                        None => return Ok(StopReason::HandlerDone),
                        Some(Ok(item)) => {
                            let event = translate(item);
                            self.write_event(write, event).await?;
                        }
                        Some(Err(DriverError::SendTimeout)) => return Err(DriverError::SendTimeout),
                        Some(Err(e)) => return Err(e),
                    }
                }

                Some(ping) = heartbeat_rx.recv() => {
                    self.timed_write(write, ping).await?;
                }
            }
        }
    }

    async fn write_event(
        &self,
        write: &mut impl FnMut(String) -> WriteFuture,
        event: ServerSentEvent,
    ) -> Result<(), DriverError> {
        let encoded = encode_event(&event, None, self.options.sep)
            .unwrap_or_else(|_| String::new());
        self.timed_write(write, encoded).await
    }

    /// Arms [`DriverOptions::send_timeout`] (if set) around one write,
    /// turning a stuck peer into [`DriverError::SendTimeout`] instead of
    /// hanging the whole response forever.
    async fn timed_write(
        &self,
        write: &mut impl FnMut(String) -> WriteFuture,
        chunk: String,
    ) -> Result<(), DriverError> {
        let fut = write(chunk);
        match self.options.send_timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| DriverError::SendTimeout)?,
            None => fut.await,
        }
    }
}

fn ping_comment() -> String {
    format!("ping - {}", Utc::now().to_rfc3339())
}

fn done_event() -> ServerSentEvent {
    ServerSentEvent {
        event: Some("done".to_string()),
        data: Some("{}".to_string()),
        id: None,
        retry: None,
    }
}

fn error_event(text: &str, allow_retry: bool, error_type: Option<&str>) -> ServerSentEvent {
    let mut data = serde_json::json!({
        "text": text,
        "allowRetry": allow_retry,
    });
    if let Some(error_type) = error_type {
        data["errorType"] = serde_json::Value::String(error_type.to_string());
    }
    ServerSentEvent {
        event: Some("error".to_string()),
        data: Some(data.to_string()),
        id: None,
        retry: None,
    }
}

/// Handler -> event translation (spec §4.5's table).
fn translate(item: DriverItem) -> ServerSentEvent {
    match item {
        DriverItem::Raw(event) => event,
        DriverItem::Response(BotResponse::Error(ErrorResponseData {
            base,
            allow_retry,
            error_type,
        })) => error_event(&base.text, allow_retry, error_type.as_deref()),
        DriverItem::Response(BotResponse::Meta(meta)) => {
            let data = serde_json::json!({
                "linkify": meta.linkify,
                "suggested_replies": meta.suggested_replies,
                "content_type": match meta.content_type {
                    crate::protocol::ContentType::TextMarkdown => "text/markdown",
                    crate::protocol::ContentType::TextPlain => "text/plain",
                },
            });
            ServerSentEvent {
                event: Some("meta".to_string()),
                data: Some(data.to_string()),
                id: None,
                retry: None,
            }
        }
        DriverItem::Response(BotResponse::Partial(partial)) => {
            let event_name = if partial.is_suggested_reply {
                "suggested_reply"
            } else if partial.is_replace_response {
                "replace_response"
            } else {
                "text"
            };
            let data = partial_response_data(&partial);
            ServerSentEvent {
                event: Some(event_name.to_string()),
                data: Some(data.to_string()),
                id: None,
                retry: None,
            }
        }
    }
}

fn partial_response_data(partial: &PartialResponse) -> serde_json::Value {
    let mut data = serde_json::json!({ "text": partial.text });
    if let Some(extra) = &partial.data {
        data["data"] = extra.clone();
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::{feed_lines, SseDecoder};

    #[test]
    fn done_event_encodes_per_scenario_s1() {
        let event = done_event();
        let encoded = encode_event(&event, None, crate::sse::Separator::CrLf).unwrap();
        assert_eq!(encoded, "event: done\r\ndata: {}\r\n\r\n");
    }

    #[test]
    fn translate_partial_response_yields_text_event() {
        let item = DriverItem::Response(BotResponse::Partial(PartialResponse {
            text: "hi".to_string(),
            ..Default::default()
        }));
        let event = translate(item);
        assert_eq!(event.event.as_deref(), Some("text"));
        assert!(event.data.unwrap().contains("\"text\":\"hi\""));
    }

    #[test]
    fn translate_error_response_includes_allow_retry_per_scenario_s2() {
        let item = DriverItem::Response(BotResponse::Error(ErrorResponseData {
            base: PartialResponse {
                text: "boom".to_string(),
                ..Default::default()
            },
            allow_retry: false,
            error_type: None,
        }));
        let event = translate(item);
        assert_eq!(event.event.as_deref(), Some("error"));
        let data = event.data.unwrap();
        let mut decoder = SseDecoder::new();
        let mut carry = String::new();
        let encoded = encode_event(
            &ServerSentEvent { event: None, data: Some(data.clone()), id: None, retry: None },
            None,
            crate::sse::Separator::Lf,
        ).unwrap();
        feed_lines(&mut decoder, &mut carry, &encoded);
        let parsed: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(parsed["allowRetry"], false);
        assert_eq!(parsed["text"], "boom");
    }

    #[test]
    fn ping_comment_contains_prefix() {
        let comment = ping_comment();
        assert!(comment.starts_with("ping - "));
    }
}
