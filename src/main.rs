use clap::Parser;
use dbrelay::api::{self, AppState};
use dbrelay::cli::Cli;
use dbrelay::dispatch::Dispatcher;
use dbrelay::error::DbrelayError;
use dbrelay::ipc;
use dbrelay::registry::SessionRegistry;
use std::process;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env file (optional, ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dbrelay=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!(error = %err, "fatal");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), DbrelayError> {
    let headless_config = if cli.headless {
        let path = cli.config.clone().ok_or_else(|| DbrelayError::Config {
            message: "headless mode requires --config <file>".to_string(),
        })?;
        info!(config = %path.display(), "running headless");
        Some(path)
    } else {
        None
    };

    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, headless_config));
    let (events, _) = broadcast::channel(64);

    if cli.stdio_ipc {
        let ipc_dispatcher = dispatcher.clone();
        let ipc_events = events.clone();
        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let stdout = tokio::io::stdout();
            if let Err(err) = ipc::run_ipc(ipc_dispatcher, ipc_events, stdin, stdout).await {
                error!(error = %err, "ipc channel closed");
            }
        });
    }

    let state = Arc::new(AppState { dispatcher, events });
    let app = api::router(state);

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");
    axum::serve(listener, app).await.map_err(DbrelayError::Io)
}
