//! Tool registry: maps a tool name to a compiled input-schema validator and
//! an async handler. Registered once at startup, immutable afterwards.

use crate::mcp::protocol::{ToolCallResult, ToolDef};
use async_trait::async_trait;
use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// A handler failure, decoupled from JSON-RPC numeric codes until the
/// dispatcher maps it onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    pub code: i64,
    pub message: String,
}

impl ToolError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tool error {}: {}", self.code, self.message)
    }
}

impl StdError for ToolError {}

#[derive(Debug)]
pub enum RegistryError {
    DuplicateTool(String),
    InvalidSchema { tool: String, message: String },
    UnknownTool(String),
    Validation { tool: String, messages: Vec<String> },
    Tool(ToolError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateTool(name) => {
                write!(f, "tool '{name}' is already registered")
            }
            RegistryError::InvalidSchema { tool, message } => {
                write!(f, "tool '{tool}' has an invalid input schema: {message}")
            }
            RegistryError::UnknownTool(name) => write!(f, "unknown tool '{name}'"),
            RegistryError::Validation { tool, messages } => {
                write!(f, "invalid arguments for '{tool}': {}", messages.join("; "))
            }
            RegistryError::Tool(err) => write!(f, "{err}"),
        }
    }
}

impl StdError for RegistryError {}

/// Implemented by each tool. Arguments arrive already validated against the
/// tool's input schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<ToolCallResult, ToolError>;
}

struct RegisteredTool {
    def: ToolDef,
    validator: Validator,
    handler: Arc<dyn ToolHandler>,
}

/// Name-indexed tool table; `order` preserves registration order for listing.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        def: ToolDef,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&def.name) {
            return Err(RegistryError::DuplicateTool(def.name.clone()));
        }
        let validator = compile_schema(&def.input_schema).map_err(|message| {
            RegistryError::InvalidSchema {
                tool: def.name.clone(),
                message,
            }
        })?;
        self.order.push(def.name.clone());
        self.tools.insert(
            def.name.clone(),
            RegisteredTool {
                def,
                validator,
                handler,
            },
        );
        Ok(())
    }

    pub fn definitions(&self) -> Vec<ToolDef> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.def.clone())
            .collect()
    }

    /// Validates `arguments` against the tool's schema, then awaits the
    /// handler. The handler is never called for an unknown tool or failed
    /// validation.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, RegistryError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;
        let messages: Vec<String> = tool
            .validator
            .iter_errors(&arguments)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(RegistryError::Validation {
                tool: name.to_string(),
                messages,
            });
        }
        tool.handler
            .call(arguments)
            .await
            .map_err(RegistryError::Tool)
    }
}

fn compile_schema(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Shout;

    #[async_trait]
    impl ToolHandler for Shout {
        async fn call(&self, arguments: Value) -> Result<ToolCallResult, ToolError> {
            let text = arguments
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_uppercase();
            Ok(ToolCallResult::text(&json!({ "text": text })))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ToolHandler for AlwaysFails {
        async fn call(&self, _arguments: Value) -> Result<ToolCallResult, ToolError> {
            Err(ToolError::new(-32000, "boom"))
        }
    }

    fn shout_def() -> ToolDef {
        ToolDef {
            name: "shout".to_string(),
            description: Some("Uppercases text".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            }),
        }
    }

    #[tokio::test]
    async fn unknown_tool_never_reaches_a_handler() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("nope", json!({}))
            .await
            .expect_err("expected UnknownTool");
        assert!(matches!(err, RegistryError::UnknownTool(name) if name == "nope"));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry
            .register(shout_def(), Arc::new(Shout))
            .expect("first registration");
        let err = registry
            .register(shout_def(), Arc::new(Shout))
            .expect_err("expected DuplicateTool");
        assert!(matches!(err, RegistryError::DuplicateTool(name) if name == "shout"));
    }

    #[tokio::test]
    async fn schema_violations_name_the_failed_fields() {
        let mut registry = ToolRegistry::new();
        registry
            .register(shout_def(), Arc::new(Shout))
            .expect("registration");
        let err = registry
            .invoke("shout", json!({ "text": 7 }))
            .await
            .expect_err("expected Validation");
        match err {
            RegistryError::Validation { tool, messages } => {
                assert_eq!(tool, "shout");
                assert!(!messages.is_empty());
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_arguments_reach_the_handler() {
        let mut registry = ToolRegistry::new();
        registry
            .register(shout_def(), Arc::new(Shout))
            .expect("registration");
        let result = registry
            .invoke("shout", json!({ "text": "hi" }))
            .await
            .expect("handler result");
        assert_eq!(result.first_text(), Some(r#"{"text":"HI"}"#));
    }

    #[tokio::test]
    async fn handler_failures_carry_their_code() {
        let mut registry = ToolRegistry::new();
        let def = ToolDef {
            name: "fails".to_string(),
            description: Some("Always fails".to_string()),
            input_schema: json!({ "type": "object" }),
        };
        registry
            .register(def, Arc::new(AlwaysFails))
            .expect("registration");
        let err = registry
            .invoke("fails", json!({}))
            .await
            .expect_err("expected Tool error");
        assert!(matches!(err, RegistryError::Tool(ToolError { code: -32000, .. })));
    }

    #[tokio::test]
    async fn definitions_preserve_registration_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register(shout_def(), Arc::new(Shout))
            .expect("registration");
        let def = ToolDef {
            name: "fails".to_string(),
            description: Some("Always fails".to_string()),
            input_schema: json!({ "type": "object" }),
        };
        registry.register(def, Arc::new(AlwaysFails)).expect("registration");
        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|def| def.name)
            .collect();
        assert_eq!(names, vec!["shout", "fails"]);
    }
}
