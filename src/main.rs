//! camshm: V4L2 camera to shared memory publisher

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use camshm::Config;

/// Capture frames from a V4L2 camera and publish them as I420 and ARGB
/// into two shared memory regions.
#[derive(Debug, Parser)]
#[command(name = "camshm", version, about)]
struct Args {
    /// Camera device node, e.g. /dev/video0
    #[arg(long)]
    camera: String,

    /// Frame width in pixels
    #[arg(long)]
    width: u32,

    /// Frame height in pixels
    #[arg(long)]
    height: u32,

    /// Frames per second
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    freq: u32,

    /// Shared memory name for I420 frames [default: <camera>.i420]
    #[arg(long = "name.i420", alias = "name-i420")]
    name_i420: Option<String>,

    /// Shared memory name for ARGB frames [default: <camera>.argb]
    #[arg(long = "name.argb", alias = "name-argb")]
    name_argb: Option<String>,

    /// Log every frame and open a preview window when available
    #[arg(long)]
    verbose: bool,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    /// Command line wins over file and environment.
    fn into_config(self) -> camshm::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        config.capture.device = self.camera;
        config.capture.width = self.width;
        config.capture.height = self.height;
        config.capture.fps = self.freq;
        if self.name_i420.is_some() {
            config.output.name_i420 = self.name_i420;
        }
        if self.name_argb.is_some() {
            config.output.name_argb = self.name_argb;
        }
        config.verbose |= self.verbose;
        Ok(config)
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, stopping"),
        _ = terminate => info!("Termination requested, stopping"),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => {
            // --help and --version
            let _ = e.print();
            return Ok(());
        }
    };

    let default_level = if args.verbose { "camshm=debug" } else { "camshm=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let config = args.into_config()?;
    info!("camshm launching on {}", config.capture.device);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let token = cancel.clone();
    let outcome = tokio::task::spawn_blocking(move || camshm::run(&config, token)).await?;
    cancel.cancel();

    match outcome {
        Ok(stats) => {
            info!("camshm stopped after {} frames", stats.frames_published);
            Ok(())
        }
        Err(e) => {
            error!("camshm stopped: {}", e);
            Err(e.into())
        }
    }
}
