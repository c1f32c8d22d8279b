//! Thin axum glue (spec §6): translates real HTTP requests into
//! [`BotDispatcher`] calls and [`DriverItem`] streams into an SSE body. No
//! protocol logic lives here — it all stays in `server`/`driver`.

use crate::attachments::PendingAttachmentTable;
use crate::config::DriverOptions;
use crate::driver::StreamingResponseDriver;
use crate::server::{BotDispatcher, DispatchOutcome};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub struct AppState {
    pub dispatcher: BotDispatcher,
    pub attachments: PendingAttachmentTable,
    pub driver_options: DriverOptions,
    /// Fires when the process begins a graceful shutdown (spec §6); cloned
    /// per in-flight response so the driver's close-watch branch can stop
    /// writing without waiting for the handler to finish on its own.
    pub shutdown: watch::Receiver<bool>,
}

/// Build the router: one GET (landing page) and one POST (protocol body) per
/// registered bot path, both read from `state.dispatcher` at request time.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/*path", get(landing_page))
        .route("/*path", post(handle_post))
        .with_state(state)
}

async fn landing_page(Path(path): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let path = format!("/{path}");
    if state.dispatcher.find(&path).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    axum::response::Html(crate::server::LANDING_PAGE_HTML).into_response()
}

async fn handle_post(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let path = format!("/{path}");
    let Some(bot) = state.dispatcher.find(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if let Err(err) = state.dispatcher.authenticate(bot, auth_header) {
        return server_error_response(err);
    }

    let body: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.dispatcher.dispatch(bot, body).await {
        Ok(DispatchOutcome::Json(value)) => axum::Json(value).into_response(),
        Ok(DispatchOutcome::Stream(stream)) => stream_response(state, stream).await,
        Err(err) => server_error_response(err),
    }
}

fn server_error_response(err: crate::error::ServerError) -> Response {
    match err {
        crate::error::ServerError::Http {
            status,
            message,
            headers,
        } => {
            let mut response = (
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                message,
            )
                .into_response();
            for (name, value) in headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::try_from(name),
                    axum::http::HeaderValue::from_str(&value),
                ) {
                    response.headers_mut().insert(name, value);
                }
            }
            response
        }
        crate::error::ServerError::UnsupportedRequestType(kind) => (
            StatusCode::NOT_IMPLEMENTED,
            format!("unsupported request type: {kind}"),
        )
            .into_response(),
        other @ crate::error::ServerError::InvalidParameter(_) => {
            (StatusCode::BAD_REQUEST, other.to_string()).into_response()
        }
        crate::error::ServerError::InvalidSettings(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn stream_response(
    state: Arc<AppState>,
    handler: futures::stream::BoxStream<
        'static,
        Result<crate::driver::DriverItem, crate::error::DriverError>,
    >,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let close_rx = state.shutdown.clone();
    let message_id = uuid_like_id();
    let driver = StreamingResponseDriver::new(state.driver_options.clone());

    tokio::spawn(async move {
        let write = move |chunk: String| -> crate::driver::WriteFuture {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(chunk)
                    .map_err(|_| crate::error::DriverError::SendTimeout)
            })
        };
        let _ = driver
            .run(handler, &state.attachments, message_id, write, close_rx)
            .await;
    });

    let body_stream =
        tokio_stream::wrappers::UnboundedReceiverStream::new(rx).map(|chunk| Ok::<_, std::io::Error>(chunk));
    let body = Body::from_stream(body_stream);

    let mut response = Response::new(body);
    for (name, value) in state.driver_options.response_headers() {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::try_from(name),
            axum::http::HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

fn uuid_like_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("msg-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
