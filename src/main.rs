use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use dockwatch_docker::{DEFAULT_SOCKET, DockerClient};
use dockwatch_incidents::IncidentStore;
use dockwatch_logs::{LogWatcher, WatchEvent};

mod config;

/// Dockwatch - follows container logs and records one incident per unique error
#[derive(Parser, Debug)]
#[command(name = "dockwatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Projects directory; incidents are written under <DIR>/<group>/.workflows/active
    #[arg(long, value_name = "DIR")]
    projects_dir: PathBuf,

    /// Docker Engine API socket
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SOCKET)]
    socket: PathBuf,

    /// TOML file with watcher settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of historical log lines to replay per container
    #[arg(long)]
    tail_lines: Option<u32>,

    /// Container name of this service, never watched
    #[arg(long)]
    self_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = config::load(args.config.as_deref())?;
    config::apply_overrides(&mut config, args.tail_lines, args.self_name);

    tokio::fs::create_dir_all(&args.projects_dir)
        .await
        .with_context(|| format!("failed to create {}", args.projects_dir.display()))?;

    let transport = Arc::new(DockerClient::new(args.socket.clone()));
    let store = Arc::new(IncidentStore::new(args.projects_dir.clone()));
    let watcher = LogWatcher::new(transport, store, config);

    let mut events = watcher.subscribe();
    watcher.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for ctrl-c")?;
                info!("shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(WatchEvent::Line(line)) => {
                    debug!(source = %line.source, channel = line.channel.as_str(), "{}", line.text);
                }
                Ok(WatchEvent::ErrorDetected(error)) => {
                    warn!(
                        source = %error.source,
                        group = %error.group,
                        category = %error.category,
                        hash = %error.fingerprint.hash,
                        "{}",
                        error.fingerprint.normalized
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    watcher.shutdown();
    Ok(())
}
