//! Adapts one tool service to the relay's worker contract.
//!
//! Reads commands from stdin and writes events to stdout, one JSON object
//! per line. Logs go to stderr, which the relay treats as diagnostics.

mod error;
mod session;
mod target;

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use session::{Exit, Settings};

#[derive(Parser)]
#[command(name = "toolrelay-worker")]
#[command(about = "Worker process for the toolrelay relay", long_about = None)]
#[command(version)]
struct Args {
    /// Timeout for each request to the tool server, in milliseconds
    #[arg(long, default_value = "120000")]
    request_timeout_ms: u64,

    /// Time a local server gets to exit on shutdown, in milliseconds
    #[arg(long, default_value = "2000")]
    shutdown_grace_ms: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_filter);

    let settings = Settings {
        request_timeout: Duration::from_millis(args.request_timeout_ms),
        shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
    };
    match session::run(tokio::io::stdin(), tokio::io::stdout(), settings).await {
        Exit::Clean => ExitCode::SUCCESS,
        Exit::Failed => ExitCode::FAILURE,
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .compact()
        .try_init();
}
