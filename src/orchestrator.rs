//! Tool Orchestrator (C3): aggregates streamed tool-call deltas into complete
//! calls, dispatches them to a [`ToolExecutable`] registry, and produces the
//! round-2 `ToolResultDefinition`s (spec §4.3).
//!
//! `ToolCallAssembler` generalizes the teacher's `llm::provider::ToolCallAssembler`
//! (id-keyed delta concatenation) to spec §4.3's explicit ordering invariant:
//! calls are keyed by their stream `index`, not by id, since a provider may not
//! assign an id until the first delta for that call.

use crate::case::{camel_to_snake, snake_to_camel};
use crate::error::ToolError;
use crate::protocol::{ToolCallDefinition, ToolFunctionCall, ToolResultDefinition};
use crate::tools::{ToolExecutable, ToolExecutionEvent};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: String,
    kind: String,
    name: Option<String>,
    arguments: String,
}

/// Accumulates streamed tool-call deltas, keyed by `index` so completion order
/// matches the order calls first appeared on the wire (spec §4.3).
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one delta. `id`/`kind`/`name` are only present on the first
    /// delta for a given index; `arguments_delta` may arrive across many.
    pub fn process_delta(
        &mut self,
        index: u32,
        id: Option<String>,
        kind: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    ) {
        let call = self.calls.entry(index).or_default();

        if let Some(id) = id {
            call.id = id;
        }
        if let Some(kind) = kind {
            call.kind = kind;
        }
        if let Some(name) = name {
            call.name = Some(name);
        }
        if let Some(delta) = arguments_delta {
            call.arguments.push_str(&delta);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Pull tool-call deltas out of one round-1 `PartialResponse.data`
    /// payload (shape `{choices: [{delta: {tool_calls: [...]}}]}`). Per
    /// Design Note §9, the upstream shape is opaque JSON: anything that
    /// doesn't match is skipped, never a hard error.
    pub fn ingest_partial_response(&mut self, response: &crate::protocol::PartialResponse) {
        let Some(data) = &response.data else { return };
        let Some(deltas) = data
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("tool_calls"))
            .and_then(|t| t.as_array())
        else {
            return;
        };

        for delta in deltas {
            let Some(index) = delta.get("index").and_then(|i| i.as_u64()) else {
                continue;
            };
            let id = delta
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let kind = delta
                .get("type")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let function = delta.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let arguments = function
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            self.process_delta(index as u32, id, kind, name, arguments);
        }
    }

    /// Finalize every accumulated call, in ascending index order.
    pub fn into_tool_calls(self) -> Result<Vec<ToolCallDefinition>, ToolError> {
        self.calls
            .into_iter()
            .map(|(index, partial)| {
                // validate the accumulated arguments parse as JSON without
                // discarding the raw string the wire format expects.
                serde_json::from_str::<serde_json::Value>(&partial.arguments)?;
                Ok(ToolCallDefinition {
                    id: partial.id,
                    kind: if partial.kind.is_empty() {
                        "function".to_string()
                    } else {
                        partial.kind
                    },
                    function: ToolFunctionCall {
                        name: partial.name.unwrap_or_default(),
                        arguments: partial.arguments,
                    },
                    index,
                })
            })
            .collect()
    }
}

/// Looks up a [`ToolExecutable`] by either its declared name or its
/// camelCase/snake_case counterpart (spec §4.4's Name normalisation rule
/// applies to tool dispatch too: a call may name the tool either way).
#[derive(Default, Clone)]
pub struct ExecutableRegistry {
    tools: Vec<Arc<dyn ToolExecutable>>,
}

impl ExecutableRegistry {
    pub fn new(tools: Vec<Arc<dyn ToolExecutable>>) -> Self {
        Self { tools }
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn ToolExecutable>> {
        let camel = snake_to_camel(name);
        let snake = camel_to_snake(name);
        self.tools
            .iter()
            .find(|t| t.name() == name || t.name() == camel || t.name() == snake)
    }
}

/// Execute one already-assembled tool call, draining any intermediate
/// [`ToolExecutionEvent::Status`] updates through `on_status` and returning
/// the final [`ToolResultDefinition`] for round 2. A call naming a tool not
/// in `registry` is skipped silently (`Ok(None)`) rather than synthesizing
/// an error result — spec §4.3 has no wire shape for "unknown tool".
pub async fn execute_tool_call(
    registry: &ExecutableRegistry,
    call: &ToolCallDefinition,
    mut on_status: impl FnMut(crate::protocol::PartialResponse),
) -> Result<Option<ToolResultDefinition>, ToolError> {
    use futures::StreamExt;

    let Some(tool) = registry.lookup(&call.function.name) else {
        return Ok(None);
    };

    let arguments: serde_json::Value = serde_json::from_str(&call.function.arguments)?;

    let mut stream = tool.execute(arguments).await;
    let mut final_result = None;
    while let Some(event) = stream.next().await {
        match event {
            ToolExecutionEvent::Status(status) => on_status(status),
            ToolExecutionEvent::Done(result) => final_result = Some(result.result),
        }
    }
    let content = match final_result {
        Some(value) => value.to_string(),
        None => serde_json::json!({"error": "tool produced no result"}).to_string(),
    };

    Ok(Some(ToolResultDefinition {
        role: "tool".to_string(),
        tool_call_id: call.id.clone(),
        name: call.function.name.clone(),
        content,
    }))
}

/// Execute every assembled call, preserving the assembler's ascending-index
/// order in the returned result vector (spec §4.3). Calls naming an unknown
/// tool are dropped from the result rather than failing the whole round.
pub async fn execute_all(
    registry: &ExecutableRegistry,
    calls: &[ToolCallDefinition],
) -> Result<Vec<ToolResultDefinition>, ToolError> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        if let Some(result) = execute_tool_call(registry, call, |_status| {}).await? {
            results.push(result);
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolFunctionDefinition;
    use crate::tools::AsyncResult;
    use futures::stream::{self, BoxStream};
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait::async_trait]
    impl ToolExecutable for EchoTool {
        fn name(&self) -> &str {
            "echo_tool"
        }

        fn definition(&self) -> ToolFunctionDefinition {
            ToolFunctionDefinition {
                name: "echo_tool".to_string(),
                description: "echoes input".to_string(),
                parameters: json!({}),
            }
        }

        async fn execute(&self, arguments: Value) -> BoxStream<'static, ToolExecutionEvent> {
            Box::pin(stream::once(async move {
                ToolExecutionEvent::Done(AsyncResult { result: arguments })
            }))
        }
    }

    #[test]
    fn assembler_ingests_deltas_out_of_order_per_index() {
        use crate::protocol::PartialResponse;

        let mut assembler = ToolCallAssembler::new();
        let deltas = [
            json!({"index": 1, "function": {"arguments": "b"}}),
            json!({"index": 0, "id": "call_a", "function": {"name": "add", "arguments": "a"}}),
            json!({"index": 1, "function": {"arguments": "c"}}),
        ];
        for delta in deltas {
            let response = PartialResponse {
                data: Some(json!({"choices": [{"delta": {"tool_calls": [delta]}}]})),
                ..Default::default()
            };
            assembler.ingest_partial_response(&response);
        }

        let calls = assembler.into_tool_calls().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[0].function.arguments, "a");
        assert_eq!(calls[1].index, 1);
        assert_eq!(calls[1].function.arguments, "bc");
    }

    #[test]
    fn assembler_orders_by_index_not_arrival() {
        let mut assembler = ToolCallAssembler::new();
        assembler.process_delta(1, Some("call_b".to_string()), Some("function".to_string()), Some("toolB".to_string()), Some("{}".to_string()));
        assembler.process_delta(0, Some("call_a".to_string()), Some("function".to_string()), Some("toolA".to_string()), Some("{}".to_string()));

        let calls = assembler.into_tool_calls().unwrap();
        assert_eq!(calls[0].function.name, "toolA");
        assert_eq!(calls[1].function.name, "toolB");
    }

    #[test]
    fn assembler_concatenates_argument_fragments() {
        let mut assembler = ToolCallAssembler::new();
        assembler.process_delta(0, Some("call_a".to_string()), None, Some("toolA".to_string()), Some("{\"x\":".to_string()));
        assembler.process_delta(0, None, None, None, Some("1}".to_string()));

        let calls = assembler.into_tool_calls().unwrap();
        assert_eq!(calls[0].function.arguments, "{\"x\":1}");
    }

    #[test]
    fn registry_looks_up_by_camel_or_snake_case() {
        let registry = ExecutableRegistry::new(vec![Arc::new(EchoTool)]);
        assert!(registry.lookup("echo_tool").is_some());
        assert!(registry.lookup("echoTool").is_some());
        assert!(registry.lookup("nonexistent").is_none());
    }

    #[tokio::test]
    async fn execute_tool_call_returns_result_definition() {
        let registry = ExecutableRegistry::new(vec![Arc::new(EchoTool)]);
        let call = ToolCallDefinition {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: ToolFunctionCall {
                name: "echo_tool".to_string(),
                arguments: "{\"ping\":true}".to_string(),
            },
            index: 0,
        };

        let result = execute_tool_call(&registry, &call, |_| {})
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.tool_call_id, "call_1");
        assert!(result.content.contains("ping"));
    }

    #[tokio::test]
    async fn execute_tool_call_unknown_tool_is_skipped() {
        let registry = ExecutableRegistry::new(vec![]);
        let call = ToolCallDefinition {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: ToolFunctionCall {
                name: "missing".to_string(),
                arguments: "{}".to_string(),
            },
            index: 0,
        };

        let result = execute_tool_call(&registry, &call, |_| {}).await.unwrap();
        assert!(result.is_none());
    }
}
