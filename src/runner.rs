//! Process entry point for serving bots over real HTTP (spec §6). Wires a
//! [`crate::server::BotDispatcher`] into the axum glue, then waits for
//! SIGTERM/SIGINT to begin a graceful shutdown with a forced-exit grace
//! period.
//!
//! The interrupt-notification shape (a background task that waits on the
//! signal and fans it out) is the same one the `zyzhang1130-codex` example
//! pack uses for its own Ctrl-C handling (`core/src/util.rs`), generalized
//! here to a `watch` channel since the driver already consumes one to learn
//! a response should stop.

use crate::attachments::PendingAttachmentTable;
use crate::config::DriverOptions;
use crate::http::{router, AppState};
use crate::server::BotDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct RunnerOptions {
    pub bind_addr: std::net::SocketAddr,
    pub driver_options: DriverOptions,
}

/// Serve `dispatcher` until a termination signal arrives, then drain
/// in-flight responses for up to [`SHUTDOWN_GRACE`] before exiting.
/// Returns the process exit code: 0 for a clean shutdown, 1 if the grace
/// period elapsed and the server was forced down.
pub async fn serve(dispatcher: BotDispatcher, options: RunnerOptions) -> i32 {
    let (close_tx, close_rx) = watch::channel(false);

    let state = Arc::new(AppState {
        dispatcher,
        attachments: PendingAttachmentTable::new(),
        driver_options: options.driver_options,
        shutdown: close_rx.clone(),
    });

    let app = router(state);
    let listener = match tokio::net::TcpListener::bind(options.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {}", options.bind_addr, e);
            return 1;
        }
    };

    tokio::spawn(wait_for_shutdown_signal(close_tx));

    log::info!("listening on {}", options.bind_addr);

    let serve_result = axum::serve(listener, app).with_graceful_shutdown(async move {
        let mut close_rx = close_rx;
        let _ = close_rx.changed().await;
    });

    match tokio::time::timeout(SHUTDOWN_GRACE, serve_result).await {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            log::error!("server error: {}", e);
            1
        }
        Err(_) => {
            log::warn!(
                "graceful shutdown exceeded {:?}, forcing exit",
                SHUTDOWN_GRACE
            );
            1
        }
    }
}

async fn wait_for_shutdown_signal(close_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            std::future::pending::<()>().await;
            return;
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    log::info!("shutdown signal received, draining in-flight responses");
    let _ = close_tx.send(true);
}
