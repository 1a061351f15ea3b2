pub mod cli;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod pipeline_config;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the build default.
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() -> ExitCode {
    let cli = cli::Cli::parse();
    init_tracing();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    match cli::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
