//! SSH session manager - Entry point
//!
//! Parses CLI arguments, sets up logging on stderr, builds the session core and
//! runs the selected front end until it exits.

use std::sync::Arc;

use clap::Parser;
use rmcp::service::ServiceExt;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ssh_manager::config::{Args, Config, Mode};
use ssh_manager::error::Result;
use ssh_manager::{
    CommandRouter, RusshConnector, ServerStore, SessionRegistry, Shell, SshManagerServer,
    TerminalPrompt,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Validate and create config
    let config = Config::from_args(args)?;

    // Logs go to stderr: stdout carries MCP JSON-RPC or shell output
    let default_level = match config.mode {
        Mode::Mcp => "info",
        Mode::Shell => "warn",
    };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("SSH session manager v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Server store: {}", config.store_path.display());

    let registry = SessionRegistry::new(Arc::new(RusshConnector::new()))
        .with_connect_timeout(config.connect_timeout);
    let router = CommandRouter::new(registry, ServerStore::new(&config.store_path));

    match config.mode {
        Mode::Shell => run_shell(router).await,
        Mode::Mcp => run_mcp(router).await,
    }
}

async fn run_shell(router: CommandRouter) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    let mut shell = Shell::new(router, input, tokio::io::stdout(), TerminalPrompt);
    shell.run().await
}

async fn run_mcp(router: CommandRouter) -> Result<()> {
    let server = SshManagerServer::new(router);

    info!("SSH session manager MCP server running on stdio");

    // Create a clone for the shutdown handler
    let server_for_shutdown = server.clone();

    // Spawn a task to handle shutdown signals
    let shutdown_handle = tokio::spawn(async move {
        // Wait for Ctrl+C or SIGTERM
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = terminate() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        server_for_shutdown.shutdown().await;
        std::process::exit(0);
    });

    match server.clone().serve(rmcp::transport::io::stdio()).await {
        Ok(running_server) => {
            info!("MCP server is serving...");
            if let Err(e) = running_server.waiting().await {
                error!("Server error: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to start MCP server: {}", e);
            shutdown_handle.abort();
            server.shutdown().await;
            return Err(ssh_manager::SshManagerError::usage(format!(
                "Failed to start MCP server: {}",
                e
            )));
        }
    }

    // Transport closed: stop waiting for signals and close all sessions
    shutdown_handle.abort();
    server.shutdown().await;

    info!("SSH session manager stopped");

    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
