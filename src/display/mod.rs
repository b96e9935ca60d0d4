#[cfg(feature = "preview")]
pub mod display;
pub mod logger;

use crate::capture::frame::Geometry;
use crate::error::Result;

#[cfg(feature = "preview")]
pub use display::Sdl2Preview;
pub use logger::FrameLogger;

/// One frame as it was just published
#[derive(Debug, Clone, Copy)]
pub struct PublishedFrame<'a> {
    /// Capture cycle, same value as written into both regions
    pub sequence: u64,
    pub timestamp_us: i64,
    pub geometry: Geometry,
    pub i420: &'a [u8],
    pub argb: &'a [u8],
}

/// Something that wants to see every frame after it is published.
///
/// Observers run on the capture thread, after both regions are written and
/// released. Errors are logged and do not stop the capture.
pub trait FrameObserver {
    fn on_frame(&mut self, frame: &PublishedFrame<'_>) -> Result<()>;
}
