use v4l::FourCC;

/// Capture formats we know how to turn into I420
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion JPEG, one compressed image per buffer
    Mjpeg,
    /// Packed YUYV 4:2:2
    Yuyv422,
}

impl PixelFormat {
    pub fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv422 => FourCC::new(b"YUYV"),
        }
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"MJPG") {
            Some(PixelFormat::Mjpeg)
        } else if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv422)
        } else {
            None
        }
    }
}

/// Frame dimensions, fixed for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes of a planar YUV 4:2:0 image
    pub fn i420_len(&self) -> usize {
        self.pixels() * 3 / 2
    }

    /// Bytes of a packed 32-bit ARGB image
    pub fn argb_len(&self) -> usize {
        self.pixels() * 4
    }

    /// Bytes of a packed YUYV 4:2:2 image
    pub fn yuyv_len(&self) -> usize {
        self.pixels() * 2
    }
}

/// Timestamp as reported by the driver for a dequeued buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceTimestamp {
    pub sec: i64,
    pub usec: i64,
    /// Driver stamped the buffer from CLOCK_MONOTONIC
    pub monotonic: bool,
}

/// A buffer handed to us by the kernel.
///
/// Deliberately not `Clone`: it has to be given back through
/// [`FrameSource::requeue`](crate::pipeline::FrameSource::requeue) exactly once.
#[derive(Debug)]
pub struct FilledBuffer {
    pub index: usize,
    pub bytes_used: usize,
    pub sequence: u32,
    pub timestamp: DeviceTimestamp,
}

/// View over the bytes of one filled buffer, valid until it is requeued
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    pub data: &'a [u8],
    pub sequence: u32,
    pub timestamp: DeviceTimestamp,
}
