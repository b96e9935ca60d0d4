use tracing::info;

use super::{FrameObserver, PublishedFrame};
use crate::error::Result;

/// Logs every published frame, enabled by `--verbose`
pub struct FrameLogger {
    device: String,
}

impl FrameLogger {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl FrameObserver for FrameLogger {
    fn on_frame(&mut self, frame: &PublishedFrame<'_>) -> Result<()> {
        info!(
            "Acquired new frame #{} from capture device: {} at {} microseconds.",
            frame.sequence, self.device, frame.timestamp_us
        );
        Ok(())
    }
}
