//! Built-in tools. Each result is a single text content block containing the
//! JSON-encoded payload.

use crate::mcp::protocol::{ToolCallResult, ToolDef};
use crate::server::registry::{RegistryError, ToolError, ToolHandler, ToolRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, arguments: Value) -> Result<ToolCallResult, ToolError> {
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        debug!(message, "Echo tool called");
        Ok(ToolCallResult::text(&json!({ "message": message })))
    }
}

pub struct AddTool;

#[async_trait]
impl ToolHandler for AddTool {
    async fn call(&self, arguments: Value) -> Result<ToolCallResult, ToolError> {
        let a = arguments.get("a").and_then(Value::as_f64).unwrap_or(0.0);
        let b = arguments.get("b").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(ToolCallResult::text(&json!({ "result": format_sum(a + b) })))
    }
}

// Integral sums render without a fractional part.
fn format_sum(sum: f64) -> String {
    if sum.is_finite() && sum.fract() == 0.0 {
        format!("{}", sum as i64)
    } else {
        sum.to_string()
    }
}

/// The registry served by `mcpterm serve`.
pub fn builtin_registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolDef {
            name: "echo".to_string(),
            description: Some("Echoes back the provided message".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"],
            }),
        },
        Arc::new(EchoTool),
    )?;
    registry.register(
        ToolDef {
            name: "add".to_string(),
            description: Some("Adds two numbers".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" },
                },
                "required": ["a", "b"],
            }),
        },
        Arc::new(AddTool),
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_wraps_the_message_as_json_text() {
        let registry = builtin_registry().expect("registry");
        let result = registry
            .invoke("echo", json!({ "message": "hello" }))
            .await
            .expect("echo result");
        assert_eq!(result.first_text(), Some(r#"{"message":"hello"}"#));
    }

    #[tokio::test]
    async fn add_stringifies_the_sum() {
        let registry = builtin_registry().expect("registry");
        let result = registry
            .invoke("add", json!({ "a": 2, "b": 3 }))
            .await
            .expect("add result");
        assert_eq!(result.first_text(), Some(r#"{"result":"5"}"#));
    }

    #[tokio::test]
    async fn add_keeps_fractional_sums() {
        let registry = builtin_registry().expect("registry");
        let result = registry
            .invoke("add", json!({ "a": 2.5, "b": 3 }))
            .await
            .expect("add result");
        assert_eq!(result.first_text(), Some(r#"{"result":"5.5"}"#));
    }

    #[tokio::test]
    async fn add_rejects_non_numeric_arguments() {
        let registry = builtin_registry().expect("registry");
        let err = registry
            .invoke("add", json!({ "a": "2", "b": 3 }))
            .await
            .expect_err("expected Validation");
        assert!(matches!(err, RegistryError::Validation { .. }));
    }

    #[tokio::test]
    async fn echo_requires_a_message() {
        let registry = builtin_registry().expect("registry");
        let err = registry
            .invoke("echo", json!({}))
            .await
            .expect_err("expected Validation");
        assert!(matches!(err, RegistryError::Validation { .. }));
    }
}
