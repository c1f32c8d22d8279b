//! Local tool executables dispatched by the tool orchestrator (C3).
//!
//! `ToolExecutable` generalizes the teacher's `ToolProvider` trait
//! (`llm/registry.rs`): a tool advertises its OpenAI-function-calling shape
//! via [`ToolExecutable::definition`] and executes a call via
//! [`ToolExecutable::execute`], yielding a lazy sequence whose items are
//! either a live-status [`crate::protocol::PartialResponse`] or a terminal
//! [`AsyncResult`], exactly per spec §4.3.

pub mod bash;
pub mod editor_edit;

pub use bash::BashTool;
pub use editor_edit::EditorEditTool;

use crate::protocol::{PartialResponse, ToolFunctionDefinition};
use futures::stream::BoxStream;
use serde_json::Value;

pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// One item of a tool executable's lazy output sequence.
pub enum ToolExecutionEvent {
    /// Live status text, forwarded upstream immediately.
    Status(PartialResponse),
    /// Terminal result; stringified (JSON) into the ToolResultDefinition.
    Done(AsyncResult),
}

/// The terminal item of a tool executable's output: an opaque JSON result.
pub struct AsyncResult {
    pub result: Value,
}

#[async_trait::async_trait]
pub trait ToolExecutable: Send + Sync {
    /// Name used for camelCase<->snake_case lookup (spec §4.3).
    fn name(&self) -> &str;

    fn definition(&self) -> ToolFunctionDefinition;

    /// Execute one call, given its already-parsed JSON arguments. Returns a
    /// boxed stream so multi-step tools can emit status updates before their
    /// terminal [`AsyncResult`].
    async fn execute(&self, arguments: Value) -> BoxStream<'static, ToolExecutionEvent>;
}

/// All built-in tools, for convenience registration.
pub fn all_tools() -> Vec<std::sync::Arc<dyn ToolExecutable>> {
    vec![
        std::sync::Arc::new(BashTool::new()),
        std::sync::Arc::new(EditorEditTool::new()),
    ]
}
