use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sandbox_agent::{Dispatcher, SandboxConfig, ToolError, ToolInvocation, ToolResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

/// Serve sandboxed tool calls as JSON lines: one invocation per stdin line,
/// one response envelope per stdout line.
#[derive(Debug, Parser)]
#[command(name = "sandbox-agent", version)]
struct Cli {
    /// Directory all tool calls are confined to.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Print the tool definitions as JSON and exit.
    #[arg(long)]
    definitions: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the response stream, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SandboxConfig::from_env(&cli.root);
    let dispatcher = Dispatcher::new(&config)
        .with_context(|| format!("Failed to open sandbox root {}", cli.root.display()))?;
    info!(
        root = %dispatcher.root().as_path().display(),
        interpreter = %config.interpreter,
        timeout = ?config.exec_timeout,
        "Sandbox tool layer ready"
    );

    let mut stdout = tokio::io::stdout();

    if cli.definitions {
        let defs = dispatcher.definitions().await;
        let json = serde_json::to_string_pretty(&defs).context("Failed to encode definitions")?;
        stdout.write_all(json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ToolInvocation>(&line) {
            Ok(invocation) => dispatcher.dispatch(invocation).await,
            Err(e) => {
                tracing::warn!(error = %e, "unparsable invocation");
                ToolResponse::failure(
                    String::new(),
                    &ToolError::InvalidArguments {
                        function: "invocation".into(),
                        source: e,
                    },
                )
            }
        };
        let json = serde_json::to_string(&response).context("Failed to encode response")?;
        stdout.write_all(json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}
