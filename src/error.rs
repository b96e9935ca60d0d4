use std::io;

/// Every failure the capture pipeline can report.
///
/// All variants except [`CaptureError::Conversion`] are fatal: they travel up to
/// `main`, which prints them and exits with status 1.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Bad arguments or a device that cannot deliver what was asked for.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// open/ioctl/mmap failure while talking to the capture device.
    #[error("device {device}: {context}")]
    Device {
        device: String,
        context: String,
        #[source]
        source: io::Error,
    },

    /// Shared output region could not be created or accessed.
    #[error("shared region '{name}': {context}")]
    Resource {
        name: String,
        context: String,
        #[source]
        source: io::Error,
    },

    /// Dequeue/requeue failure while streaming.
    #[error("capture loop: {context}")]
    RuntimeLoop {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A single frame could not be converted; the frame is dropped.
    #[error("frame conversion failed: {0}")]
    Conversion(String),
}

impl CaptureError {
    pub fn device(device: &str, context: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Device {
            device: device.to_owned(),
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn resource(name: &str, context: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Resource {
            name: name.to_owned(),
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn runtime(context: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::RuntimeLoop {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Whether the run has to stop because of this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Conversion(_))
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
