//! Mcpterm is a terminal client for MCP tool servers speaking the legacy SSE
//! transport, plus the companion tool server it talks to.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] owns the wire protocol: JSON-RPC frames, the event-stream
//!   parser, and the client connection with its invocation correlator.
//! - [`server`] is the companion server: tool registry, the single-channel
//!   session, the request dispatcher, and the axum surface around them.
//! - [`core`] holds configuration and the session log state machine.
//! - [`commands`] parses terminal input lines and renders tool results.
//! - [`ui`] renders the terminal interface and runs the interactive event
//!   loop.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::run`], which dispatches into [`ui::run`] for the
//! client and [`server::run`] for `mcpterm serve`.

pub mod cli;
pub mod commands;
pub mod core;
pub mod logging;
pub mod mcp;
pub mod server;
pub mod ui;
