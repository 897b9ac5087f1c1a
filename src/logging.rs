//! Tracing setup. The server logs to stderr; the terminal client owns the
//! screen, so its diagnostics go to a file, and only when one is requested.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mcpterm=info"))
}

pub fn init_server() -> Result<(), Box<dyn std::error::Error>> {
    let layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter())
        .with(layer)
        .try_init()?;
    Ok(())
}

/// No-op when `log_file` is unset; the client stays silent rather than
/// writing over the alternate screen.
pub fn init_client(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(Arc::new(file))
        .with_ansi(false);
    tracing_subscriber::registry()
        .with(env_filter())
        .with(layer)
        .try_init()?;
    Ok(())
}
