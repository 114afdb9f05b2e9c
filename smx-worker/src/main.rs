//! smx-worker - SoundMaxx Audio Processing Worker
//!
//! Serves the job API by default. Two subcommands:
//! - `qa` - run every tool over a fixtures directory and write a report
//! - `stem-worker` (hidden) - sandbox child entry used by the timeout
//!   sandbox; its stdout carries the result protocol

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use smx_worker::config::WorkerConfig;
use smx_worker::{build_router, qa, sandbox, AppState};

#[derive(Parser)]
#[command(name = "smx-worker", version, about = "SoundMaxx audio processing worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run every tool over a fixtures directory and write a QA report
    Qa(qa::QaArgs),

    #[command(hide = true)]
    StemWorker(sandbox::StemWorkerArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::StemWorker(args)) => {
            // No tracing init: stdout belongs to the result protocol
            let code = sandbox::run_stem_worker(&args);
            std::process::exit(code);
        }
        Some(Command::Qa(args)) => {
            init_tracing();
            let config = WorkerConfig::from_env()?;
            qa::run(&config, &args)
        }
        None => serve().await,
    }
}

async fn serve() -> Result<()> {
    init_tracing();

    info!("Starting smx-worker (SoundMaxx audio processing worker)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;
    config.ensure_roots()?;

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("smx-worker listening on http://{bind_addr}");
    info!("Health check: http://{bind_addr}/health");

    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}
