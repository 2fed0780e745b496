use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use echo_domain::config::{Config, ConfigSeverity};
use echo_gateway::api;
use echo_gateway::state::EchoServer;

#[derive(Parser)]
#[command(name = "echo", about = "Audio sidecar for an AI coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sidecar (default).
    Serve,
    /// Inspect the environment-derived configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as JSON.
    Show,
    /// Validate the configuration and exit non-zero on errors.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Arc::new(Config::from_env())).await
        }
        Some(Command::Config(config_cmd)) => {
            let config = Config::from_env();
            match config_cmd {
                ConfigCommand::Show => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                    Ok(())
                }
                ConfigCommand::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        let tag = match issue.severity {
                            ConfigSeverity::Warning => "warning",
                            ConfigSeverity::Error => "error",
                        };
                        println!("{tag}: {issue}");
                    }
                    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                        std::process::exit(1);
                    }
                    println!("configuration ok");
                    Ok(())
                }
            }
        }
        Some(Command::Version) => {
            println!("echo {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,echo_gateway=debug")),
        )
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Echo starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Pipeline ─────────────────────────────────────────────────────
    let server = EchoServer::start(Arc::clone(&config)).context("starting pipeline")?;
    let state = server.state.clone();

    // ── HTTP surface (localhost only) ────────────────────────────────
    let app = api::router()
        .layer(tower::limit::ConcurrencyLimitLayer::new(64))
        .with_state(state);
    let addr = format!("127.0.0.1:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "Echo listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    // ── Ordered teardown ─────────────────────────────────────────────
    tracing::info!("shutting down");
    server.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}
