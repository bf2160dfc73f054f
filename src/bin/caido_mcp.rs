//! Standalone MCP server binary for the Caido bridge.
//!
//! Runs over stdio, suitable for Claude Desktop, Cursor and other MCP clients.
//!
//! Usage:
//! ```text
//! cargo run --bin caido_mcp -- --base-url http://localhost:8080
//! ```

use std::path::Path;

use caido_mcp_bridge::mcp::CaidoMcpServer;
use caido_mcp_bridge::BridgeConfig;
use rmcp::ServiceExt;
use tokio::io::{stdin, stdout};
use tracing::level_filters::LevelFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = BridgeConfig::from_env_and_args(args.into_iter())?;
    init_tracing(config.log_dir.as_deref())?;

    tracing::info!(
        base_url = %config.base_url,
        token_file = %config.token_path.display(),
        static_token = config.auth_token.is_some(),
        "Starting Caido MCP server v{}",
        caido_mcp_bridge::VERSION
    );

    let server = CaidoMcpServer::new(&config)?;
    server.bootstrap().await?;

    let transport = (stdin(), stdout());
    let service = server.serve(transport).await?;
    service.waiting().await?;

    tracing::info!("MCP client disconnected, shutting down");
    Ok(())
}

/// Logs go to stderr (stdout carries MCP frames), or to a daily rolling file when a
/// log directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let level = resolve_log_level();
    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                anyhow::anyhow!("Failed to create log directory {}: {e}", dir.display())
            })?;
            let file_appender = tracing_appender::rolling::daily(dir, "caido_mcp");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // flushed on exit only while the guard lives
            std::mem::forget(guard);
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(non_blocking)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}

fn resolve_log_level() -> LevelFilter {
    match std::env::var("RUST_LOG") {
        Ok(val) => match val.to_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "warn" | "warning" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            "off" => LevelFilter::OFF,
            _ => LevelFilter::INFO,
        },
        Err(_) => LevelFilter::INFO,
    }
}

fn print_help() {
    eprintln!("Caido MCP Server");
    eprintln!();
    eprintln!("Usage: caido_mcp [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --base-url <URL>        Caido instance URL (env CAIDO_BASE_URL, default: http://localhost:8080)");
    eprintln!("  --token <TOKEN>         Static access token (env CAIDO_AUTH_TOKEN or CAIDO_PAT)");
    eprintln!("  --token-file <PATH>     Saved OAuth token (env CAIDO_MCP_TOKEN_FILE, default: ~/.caido-mcp/token.json)");
    eprintln!("  --package-name <NAME>   Plugin package hosting the backend (default: Ebka AI Assistant)");
    eprintln!("  --tools <PATH>          JSON tool catalog replacing the built-in one (env CAIDO_MCP_TOOLS)");
    eprintln!("  --log-dir <DIR>         Write logs to a daily rolling file (env CAIDO_MCP_LOG_DIR)");
    eprintln!("  --help, -h              Show this help");
    eprintln!();
    eprintln!("Log level is read from RUST_LOG (default: info).");
}
