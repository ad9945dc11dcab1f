//! pgcarve - carve a referentially-closed subset out of a PostgreSQL
//! database.
//!
//! This is the binary entry point: flag parsing, logging setup, signal
//! handling, and exit-code mapping. Everything else lives in the library.

use clap::Parser;
use pgcarve::cli::Cli;
use pgcarve::config::Settings;
use pgcarve::error::CarveError;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = Settings::load();

    init_tracing(cli.effective_log_level(&settings));

    let config = match cli.into_run_config(&settings) {
        Ok(config) => config,
        Err(e) => exit_with(e),
    };

    let result = tokio::select! {
        result = pgcarve::run::execute(config) => result,
        _ = shutdown_signal() => Err(CarveError::Cancelled),
    };

    if let Err(e) = result {
        exit_with(e);
    }
}

fn exit_with(e: CarveError) -> ! {
    eprintln!("pgcarve: {}", e);
    std::process::exit(e.exit_code());
}

/// Logging is off unless a level was requested; the replay stream itself
/// goes to stdout, diagnostics to stderr.
fn init_tracing(level: Option<String>) {
    let Some(level) = level else {
        return;
    };

    let env_filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}

/// Cancellation: abort at the next await point, emit nothing.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, aborting run");
        },
        _ = terminate => {
            info!("received terminate signal, aborting run");
        },
    }
}
