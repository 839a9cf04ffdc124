mod config;
mod error;
mod telemetry;

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use relay::RelayRuntime;
use tracing::info;

use config::{Config, LogFormat};
use error::{Error, Result};

const WORKER_BINARY: &str = "toolrelay-worker";

#[derive(Parser)]
#[command(name = "toolrelay")]
#[command(about = "Relay tool calls from TCP clients to supervised tool servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./toolrelay.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Worker executable (defaults to toolrelay-worker next to this binary)
    #[arg(long)]
    worker: Option<PathBuf>,

    /// Log filter, e.g. "info" or "relay=debug"
    #[arg(long)]
    log_filter: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Flags override the file.
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.relay.host = host.to_string();
        }
        if let Some(port) = self.port {
            config.relay.port = port;
        }
        if let Some(worker) = self.worker {
            config.relay.worker_command = Some(worker);
        }
        if let Some(filter) = self.log_filter {
            config.log_filter = Some(filter);
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::discover(cli.config.as_deref())?;
    cli.apply(&mut config);
    telemetry::initialise(config.log_filter(), config.log_format)?;

    let worker = worker_program(config.relay.worker_command.as_deref())?;
    let runtime = RelayRuntime::with_worker_program(&config.relay, worker.clone()).await?;
    info!(
        addr = %runtime.local_addr(),
        worker = %worker.display(),
        version = env!("CARGO_PKG_VERSION"),
        "toolrelay ready"
    );

    shutdown_signal().await?;
    info!("shutting down");
    runtime.shutdown().await?;
    Ok(())
}

/// The configured worker, or the one installed next to this executable.
fn worker_program(configured: Option<&Path>) -> Result<PathBuf> {
    let path = match configured {
        Some(path) => path.to_path_buf(),
        None => std::env::current_exe()?
            .with_file_name(format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX)),
    };
    if configured.is_none() && !path.exists() {
        return Err(Error::WorkerNotFound { path });
    }
    Ok(path)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
