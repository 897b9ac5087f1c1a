//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the
//! appropriate commands.

use std::error::Error;
use std::path::Path;

use clap::{Parser, Subcommand};

use crate::core::config::Config;
use crate::logging;
use crate::mcp::protocol::ServerInfo;
use crate::server;
use crate::ui;

#[derive(Parser)]
#[command(name = "mcpterm")]
#[command(about = "A terminal for invoking MCP tools over an SSE channel")]
#[command(
    long_about = "Mcpterm is a full-screen terminal client for MCP tool servers that speak the \
legacy SSE transport, bundled with a small companion server exposing echo and add tools.\n\n\
Controls:\n\
  @echo <text>      Invoke the echo tool\n\
  @add <a> <b>      Invoke the add tool\n\
  Enter             Send the input line\n\
  Up/Down           Scroll through the session log\n\
  Ctrl+C            Quit the application"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server base URL the client connects to
    #[arg(short = 's', long, global = true, value_name = "URL")]
    pub server_url: Option<String>,

    /// Write client diagnostics to this file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log_file: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the terminal client (default)
    Terminal,
    /// Run the companion tool server
    Serve {
        /// Address to bind
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(url) = args.server_url {
        config.server_url = url;
    }

    match args.command.unwrap_or(Commands::Terminal) {
        Commands::Terminal => {
            logging::init_client(args.log_file.as_deref().map(Path::new))?;
            ui::run(config).await
        }
        Commands::Serve { listen } => {
            logging::init_server()?;
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            let identity = ServerInfo {
                name: "mcpterm-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            };
            server::run(
                &config.listen_addr,
                identity,
                config.allowed_origin.as_deref(),
            )
            .await?;
            Ok(())
        }
    }
}
