//! Input-line parsing for the terminal. Tool invocations start with `@`;
//! anything else is free text, which has no handler yet.

use crate::mcp::protocol::ToolCallResult;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A recognized tool invocation: `@echo <text>` or `@add <a> <b>`.
    Invoke { tool: &'static str, arguments: Value },
    /// An `@` command nobody recognizes.
    UnknownCommand(String),
    /// A recognized command with unusable arguments; carries the usage line.
    BadArguments(&'static str),
    /// Plain text, not a command.
    FreeText(String),
}

pub fn parse_input(raw: &str) -> Input {
    let trimmed = raw.trim();
    if !trimmed.starts_with('@') {
        return Input::FreeText(trimmed.to_string());
    }
    let mut parts = trimmed[1..].splitn(2, ' ');
    let command = parts.next().unwrap_or("");
    let args = parts.next().unwrap_or("").trim();
    match command {
        "echo" => {
            if args.is_empty() {
                return Input::BadArguments("usage: @echo <text>");
            }
            Input::Invoke {
                tool: "echo",
                arguments: json!({ "message": args }),
            }
        }
        "add" => {
            let numbers: Result<Vec<f64>, _> =
                args.split_whitespace().map(str::parse).collect();
            let Ok(numbers) = numbers else {
                return Input::BadArguments("usage: @add <a> <b>");
            };
            let &[a, b] = numbers.as_slice() else {
                return Input::BadArguments("usage: @add <a> <b>");
            };
            Input::Invoke {
                tool: "add",
                arguments: json!({ "a": a, "b": b }),
            }
        }
        _ => Input::UnknownCommand(trimmed.to_string()),
    }
}

/// Extracts the display text from a tool result. Built-in tools wrap a JSON
/// payload in a single text block; unknown shapes fall back to the raw text.
pub fn render_result(tool: &str, result: &ToolCallResult) -> String {
    let Some(text) = result.first_text() else {
        return "(empty result)".to_string();
    };
    let payload: Option<Value> = serde_json::from_str(text).ok();
    let field = match tool {
        "echo" => "message",
        "add" => "result",
        _ => return text.to_string(),
    };
    payload
        .as_ref()
        .and_then(|payload| payload.get(field))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| text.to_string())
}
