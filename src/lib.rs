pub mod attachments;
pub mod case;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod logger;
pub mod orchestrator;
pub mod protocol;
pub mod server;
pub mod sse;
pub mod tools;

#[cfg(feature = "axum")]
pub mod http;
#[cfg(feature = "axum")]
pub mod runner;

pub use client::BotClient;
pub use driver::StreamingResponseDriver;
pub use logger::log;
pub use server::{BotDispatcher, BotHandle, BotHandler};
