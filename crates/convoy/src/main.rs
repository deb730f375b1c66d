//! Convoy CLI - branch-aware runner for concurrent automation
//!
//! Binary name: `convoy`

use std::process;

use convoy::cli::handlers::{format_error, run_cli};
use convoy_core::ShutdownCoordinator;

#[tokio::main]
async fn main() {
    // Stdout carries outcome lines and JSON; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Signals are forwarded to in-flight runs so they reach cleanup
    let shutdown = ShutdownCoordinator::new();
    if let Err(e) = shutdown.forward_signals().await {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: Failed to setup signal handlers: {e}");
        }
        #[allow(clippy::exit)]
        process::exit(1);
    }

    if let Err(err) = run_cli(shutdown).await {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {}", format_error(&err));
        }

        let code = err
            .downcast_ref::<convoy_core::Error>()
            .map_or(1, convoy_core::Error::exit_code);

        #[allow(clippy::exit)]
        process::exit(code);
    }
}
