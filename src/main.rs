use botstream::config::{DriverOptions, ServerConfig};
use botstream::runner::{serve, RunnerOptions};
use botstream::server::{BotDispatcher, BotHandle};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "botstream-runner")]
#[command(author, version, about = "Serves a bot over the chat-completion protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Address to bind, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,

        /// Path the bot is mounted at.
        #[arg(long, default_value = "/")]
        path: String,

        /// Require callers to present this bearer token. Falls back to
        /// POE_ACCESS_KEY if unset.
        #[arg(long)]
        access_key: Option<String>,

        /// Deprecated: use --access-key or POE_ACCESS_KEY instead.
        #[arg(long)]
        api_key: Option<String>,

        /// Serve without requiring any bearer token.
        #[arg(long, default_value_t = false)]
        allow_without_key: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            path,
            access_key,
            api_key,
            allow_without_key,
        } => {
            let base_config = ServerConfig::new(path)
                .with_allow_without_key(allow_without_key);
            let base_config = match access_key {
                Some(key) => base_config.with_access_key(key),
                None => base_config,
            };
            let config = match base_config.resolve_access_key(api_key.as_deref(), &botstream::config::read_env) {
                Some(key) => base_config.with_access_key(key),
                None => base_config,
            };

            let bot = BotHandle::new(config, std::sync::Arc::new(EchoBot));
            let dispatcher = match BotDispatcher::new(vec![bot], None) {
                Ok(dispatcher) => dispatcher,
                Err(e) => {
                    eprintln!("failed to start server: {e}");
                    std::process::exit(1);
                }
            };

            let code = serve(
                dispatcher,
                RunnerOptions {
                    bind_addr: bind,
                    driver_options: DriverOptions::default(),
                },
            )
            .await;
            std::process::exit(code);
        }
    }
}

fn env_logger_init() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}

/// Placeholder bot that echoes the last user message, wired up so
/// `botstream-runner serve` has something to run out of the box.
struct EchoBot;

#[async_trait::async_trait]
impl botstream::server::BotHandler for EchoBot {
    async fn handle_query(
        &self,
        request: botstream::protocol::QueryRequest,
    ) -> futures::stream::BoxStream<'static, Result<botstream::driver::DriverItem, botstream::error::DriverError>> {
        let text = request
            .query
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Box::pin(futures::stream::once(async move {
            Ok(botstream::driver::DriverItem::Response(
                botstream::protocol::BotResponse::Partial(botstream::protocol::PartialResponse {
                    text,
                    ..Default::default()
                }),
            ))
        }))
    }

    async fn handle_settings(
        &self,
        _request: &botstream::protocol::BaseRequest,
    ) -> Result<botstream::protocol::SettingsResponse, botstream::error::ServerError> {
        Ok(botstream::protocol::SettingsResponse {
            server_bot_dependencies: Default::default(),
            allow_attachments: false,
            introduction_message: None,
            expand_text_attachments: true,
            enable_image_comprehension: false,
            enforce_author_role_alternation: false,
            enable_multi_bot_chat_prompting: false,
            context_clear_window_secs: None,
            allow_user_context_clear: None,
        })
    }

    async fn handle_report_feedback(
        &self,
        _request: &botstream::protocol::ReportFeedbackRequest,
    ) -> Result<(), botstream::error::ServerError> {
        Ok(())
    }

    async fn handle_report_error(
        &self,
        _request: &botstream::protocol::ReportErrorRequest,
    ) -> Result<(), botstream::error::ServerError> {
        Ok(())
    }
}
