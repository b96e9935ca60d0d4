pub mod clock;
pub mod decoder;
pub mod frame;
pub mod pool;
pub mod v4l2;

pub use clock::TimestampTranslator;
pub use decoder::{ConvertedFrame, FrameConverter};
pub use frame::{CapturedFrame, Geometry, PixelFormat};
pub use pool::{BufferPool, BufferQueue, V4l2Queue, BUFFER_COUNT};
pub use v4l2::CaptureSession;
