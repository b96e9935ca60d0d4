pub mod capture_loop;
pub mod publish;
pub mod shm;

use std::time::Duration;

use crate::capture::frame::{CapturedFrame, FilledBuffer};
use crate::error::Result;

pub use capture_loop::{CaptureLoop, LoopStats, POLL_TIMEOUT};
pub use publish::{OutputRegion, PublishSink};
pub use shm::SharedRegion;

/// Where the capture loop gets its frames from.
///
/// Implemented by [`BufferPool`](crate::capture::BufferPool) for real devices.
pub trait FrameSource {
    /// Block until a filled buffer can be dequeued, or `timeout` passes.
    ///
    /// Returns `false` on timeout or when a signal interrupted the wait.
    fn wait_ready(&mut self, timeout: Duration) -> Result<bool>;

    /// Take one filled buffer from the driver.
    fn dequeue(&mut self) -> Result<FilledBuffer>;

    /// Bytes of a dequeued buffer, trimmed to what the driver filled in.
    fn frame(&self, filled: &FilledBuffer) -> Result<CapturedFrame<'_>>;

    /// Give a buffer back to the driver.
    fn requeue(&mut self, filled: FilledBuffer) -> Result<()>;
}
