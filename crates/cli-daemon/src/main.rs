//! CLI entry point for the Lookout edge daemon
//!
//! Parses command line arguments, sets up logging, and starts the
//! daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lookout_daemon::{Config, Daemon};

/// Lookout - security camera edge daemon
#[derive(Parser, Debug)]
#[command(name = "lookoutd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "lookout.toml")]
    config: PathBuf,

    /// Root directory for segments, clips and the upload log
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Override the control surface bind address (host:port)
    #[arg(short, long)]
    bind: Option<String>,

    /// Skip startup checks (ffmpeg presence). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(
        config = %args.config.display(),
        data_dir = %args.data_dir.display(),
        "lookout daemon starting"
    );

    let daemon_result = if args.skip_checks {
        info!("skipping startup checks (--skip-checks enabled)");
        match Config::load_or_default(&args.config) {
            Ok(config) => Daemon::new_without_checks(config, args.data_dir).await,
            Err(e) => Err(e.into()),
        }
    } else {
        Daemon::new(&args.config, args.data_dir).await
    };

    match daemon_result {
        Ok(daemon) => {
            if let Some(bind) = args.bind {
                daemon.config.write().await.server.bind = bind;
            }
            let bind = daemon.config.read().await.server.bind.clone();
            info!(%bind, "control surface starting");

            if let Err(e) = daemon.run().await {
                error!(error = %e, "daemon error");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            ExitCode::FAILURE
        }
    }
}
