//! prpflow: coordinate agents through knowledge-enriched PRPs.
//!
//! This is the main entry point for the `prpflow` CLI. It parses arguments,
//! sets up logging, dispatches to the command handler, and maps errors to
//! exit codes.

use prpflow::cli::Cli;
use prpflow::config::LoggingConfig;
use prpflow::context::FlowContext;
use prpflow::{commands, exit_codes};
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match commands::dispatch(cli.command).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

/// `-v` forces debug; otherwise `RUST_LOG` wins over `logging.filter`.
/// Logs go to stderr so command output stays clean.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("prpflow=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_filter()))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}

fn configured_filter() -> String {
    FlowContext::resolve()
        .and_then(|ctx| ctx.load_config())
        .map(|config| config.logging.filter)
        .unwrap_or_else(|_| LoggingConfig::default().filter)
}
