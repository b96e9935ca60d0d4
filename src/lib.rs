pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use capture::{BufferPool, CaptureSession, FrameConverter, TimestampTranslator, BUFFER_COUNT};
use display::FrameLogger;
use pipeline::{CaptureLoop, LoopStats, PublishSink, SharedRegion};

pub use error::{CaptureError, Result};

/// Prefix of environment variables overriding the config file, e.g.
/// `CAMSHM__OUTPUT__SHM_DIR=/tmp`
pub const ENV_PREFIX: &str = "CAMSHM";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub output: OutputConfig,
    pub clock: ClockConfig,
    /// Log every frame and, with the `preview` feature, open a preview window
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Pin the capture thread to this CPU core
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Defaults to the device name + `.i420`
    pub name_i420: Option<String>,
    /// Defaults to the device name + `.argb`
    pub name_argb: Option<String>,
    /// Directory the regions are created in
    pub shm_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Re-sample the monotonic to epoch offset this often; 0 keeps the
    /// startup offset for the whole run.
    pub resync_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            pin_core: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name_i420: None,
            name_argb: None,
            shm_dir: PathBuf::from("/dev/shm"),
        }
    }
}

impl ClockConfig {
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs))
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `CAMSHM__*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())
            .map_err(|e| CaptureError::Configuration(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CaptureError::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.device.is_empty() {
            return Err(CaptureError::Configuration("camera device must be given".into()));
        }
        if capture.width == 0 || capture.height == 0 {
            return Err(CaptureError::Configuration(format!(
                "width and height must be larger than 0; found {} x {}",
                capture.width, capture.height
            )));
        }
        if capture.width % 2 != 0 || capture.height % 2 != 0 {
            return Err(CaptureError::Configuration(format!(
                "width and height must be even for I420 output; found {} x {}",
                capture.width, capture.height
            )));
        }
        if capture.fps == 0 {
            return Err(CaptureError::Configuration(
                "freq must be larger than 0; found 0".into(),
            ));
        }
        Ok(())
    }

    pub fn i420_name(&self) -> String {
        self.output
            .name_i420
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| utils::default_region_name(&self.capture.device, ".i420"))
    }

    pub fn argb_name(&self) -> String {
        self.output
            .name_argb
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| utils::default_region_name(&self.capture.device, ".argb"))
    }
}

/// Negotiate, stream and publish until `cancel` fires.
///
/// Teardown (stream off, unmap, close) runs however the loop ends; a loop
/// error takes precedence over a teardown error.
#[instrument(skip_all, fields(device = %config.capture.device))]
pub fn run(config: &Config, cancel: CancellationToken) -> Result<LoopStats> {
    config.validate()?;
    if let Some(core) = config.capture.pin_core {
        utils::pin_current_thread(core);
    }

    let session = CaptureSession::negotiate(&config.capture)?;
    let geometry = session.geometry();

    let dir = &config.output.shm_dir;
    let i420 = SharedRegion::create(dir, &config.i420_name(), geometry.i420_len())?;
    let argb = SharedRegion::create(dir, &config.argb_name(), geometry.argb_len())?;
    let interval = session.interval();
    info!(
        "Data from camera '{}' ({}x{} every {}/{} s) available in I420 format in shared memory '{}' ({}) and in ARGB format in shared memory '{}' ({}).",
        session.path(),
        geometry.width,
        geometry.height,
        interval.numerator,
        interval.denominator,
        config.i420_name(),
        geometry.i420_len(),
        config.argb_name(),
        geometry.argb_len()
    );
    let sink = PublishSink::new(i420, argb, geometry)?;

    let mut pool = BufferPool::allocate(&session, BUFFER_COUNT)?;
    pool.start()?;

    let translator = TimestampTranslator::calibrate()?.with_resync(config.clock.resync_interval());
    let converter = FrameConverter::new(session.format(), geometry);
    let mut capture = CaptureLoop::new(translator, converter, sink, cancel.clone());
    if config.verbose {
        capture = capture.with_observer(Box::new(FrameLogger::new(session.path())));
        #[cfg(feature = "preview")]
        match display::Sdl2Preview::new(session.path(), geometry, cancel.clone()) {
            Ok(preview) => capture = capture.with_observer(Box::new(preview)),
            Err(e) => tracing::warn!("Preview disabled: {}", e),
        }
    }

    let outcome = capture.run(&mut pool);
    let stopped = pool.shutdown();
    drop(session);

    let stats = outcome?;
    stopped?;
    Ok(stats)
}
