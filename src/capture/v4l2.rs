//! V4L2 device negotiation

use std::os::fd::{AsFd, BorrowedFd};

use tracing::{debug, info, instrument};
use v4l::capability::Flags as CapFlags;
use v4l::format::FieldOrder;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Fraction};

use crate::{
    capture::frame::{Geometry, PixelFormat},
    error::{CaptureError, Result},
    CaptureConfig,
};

/// Format asked for first; the driver may answer with YUYV instead.
pub const PREFERRED_FORMAT: PixelFormat = PixelFormat::Mjpeg;

/// An opened and fully negotiated capture device.
///
/// Nothing here changes after [`CaptureSession::negotiate`] returns. The
/// device node is closed when the session is dropped.
pub struct CaptureSession {
    device: Device,
    path: String,
    geometry: Geometry,
    format: PixelFormat,
    interval: Fraction,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("path", &self.path)
            .field("geometry", &self.geometry)
            .field("format", &self.format)
            .field("interval", &self.interval)
            .finish()
    }
}

impl CaptureSession {
    /// Open the device and negotiate geometry, format and frame interval.
    ///
    /// Any deviation from what was requested fails the whole negotiation.
    #[instrument(skip(config), fields(device = %config.device))]
    pub fn negotiate(config: &CaptureConfig) -> Result<Self> {
        let path = config.device.as_str();
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(path)
            .map_err(|e| CaptureError::device(path, "failed to open capture device", e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::device(path, "VIDIOC_QUERYCAP", e))?;
        info!("Device: {} ({})", caps.card, caps.driver);
        check_capabilities(path, caps.capabilities)?;

        let requested = Geometry::new(config.width, config.height);
        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::device(path, "VIDIOC_G_FMT", e))?;
        fmt.width = requested.width;
        fmt.height = requested.height;
        fmt.fourcc = PREFERRED_FORMAT.fourcc();
        fmt.field_order = FieldOrder::Any;

        let fmt = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::device(path, "VIDIOC_S_FMT", e))?;
        debug!("Driver granted {}x{} {}", fmt.width, fmt.height, fmt.fourcc);

        let geometry = check_geometry(requested, Geometry::new(fmt.width, fmt.height))?;
        let format = PixelFormat::from_fourcc(fmt.fourcc).ok_or_else(|| {
            CaptureError::Configuration(format!(
                "capture device {} offers unsupported pixel format {}",
                path, fmt.fourcc
            ))
        })?;
        match format {
            PixelFormat::Mjpeg => info!("Capture device: {} provides MJPEG stream.", path),
            PixelFormat::Yuyv422 => info!("Capture device: {} provides YUYV 4:2:2 stream.", path),
        }

        let params = device
            .set_params(&Parameters::with_fps(config.fps))
            .map_err(|_| {
                CaptureError::Configuration(format!(
                    "capture device {} does not support requested {} fps",
                    path, config.fps
                ))
            })?;
        let interval = check_interval(config.fps, params.interval)?;

        Ok(Self {
            device,
            path: path.to_owned(),
            geometry,
            format,
            interval,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn interval(&self) -> Fraction {
        self.interval
    }
}

impl AsFd for CaptureSession {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the descriptor belongs to `self.device`, which stays open for
        // as long as the returned borrow of `self` lives.
        unsafe { BorrowedFd::borrow_raw(self.device.handle().fd()) }
    }
}

fn check_capabilities(path: &str, caps: CapFlags) -> Result<()> {
    if !caps.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(CaptureError::Configuration(format!(
            "capture device {} does not support V4L2_CAP_VIDEO_CAPTURE",
            path
        )));
    }
    if !caps.contains(CapFlags::STREAMING) {
        return Err(CaptureError::Configuration(format!(
            "capture device {} does not support V4L2_CAP_STREAMING",
            path
        )));
    }
    Ok(())
}

/// The driver must grant exactly the requested size.
pub fn check_geometry(requested: Geometry, achieved: Geometry) -> Result<Geometry> {
    if requested != achieved {
        return Err(CaptureError::Configuration(format!(
            "capture device does not support requested {} x {} (driver offered {} x {})",
            requested.width, requested.height, achieved.width, achieved.height
        )));
    }
    Ok(achieved)
}

/// The driver must grant exactly 1/fps.
pub fn check_interval(fps: u32, achieved: Fraction) -> Result<Fraction> {
    if achieved.numerator != 1 || achieved.denominator != fps {
        return Err(CaptureError::Configuration(format!(
            "capture device does not support requested {} fps (driver offered {}/{} s)",
            fps, achieved.numerator, achieved.denominator
        )));
    }
    Ok(achieved)
}
