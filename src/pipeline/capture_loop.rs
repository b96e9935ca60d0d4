//! The steady-state capture cycle: wait → dequeue → translate → convert →
//! publish → requeue

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::publish::{OutputRegion, PublishSink};
use super::FrameSource;
use crate::capture::clock::TimestampTranslator;
use crate::capture::decoder::FrameConverter;
use crate::capture::frame::FilledBuffer;
use crate::display::{FrameObserver, PublishedFrame};
use crate::error::Result;

/// Upper bound on one readiness wait, and so on cancellation latency
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Counters for one run of the loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_published: u64,
    /// Buffers the driver returned with zero bytes used
    pub frames_empty: u64,
    /// Frames that failed to convert
    pub frames_dropped: u64,
    pub timeouts: u64,
}

/// Single-threaded producer loop.
///
/// The cancellation token is checked once per iteration, before waiting on
/// the device. A dequeued buffer is always processed and requeued before the
/// next check.
pub struct CaptureLoop<R: OutputRegion> {
    translator: TimestampTranslator,
    converter: FrameConverter,
    sink: PublishSink<R>,
    observers: Vec<Box<dyn FrameObserver>>,
    cancel: CancellationToken,
    timeout: Duration,
    stats: LoopStats,
}

impl<R: OutputRegion> CaptureLoop<R> {
    pub fn new(
        translator: TimestampTranslator,
        converter: FrameConverter,
        sink: PublishSink<R>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            translator,
            converter,
            sink,
            observers: Vec::new(),
            cancel,
            timeout: POLL_TIMEOUT,
            stats: LoopStats::default(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn FrameObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn sink(&self) -> &PublishSink<R> {
        &self.sink
    }

    /// Run until the token is cancelled or a fatal error occurs.
    pub fn run<S: FrameSource>(&mut self, source: &mut S) -> Result<LoopStats> {
        info!("Capture loop running");
        while !self.cancel.is_cancelled() {
            self.translator.maybe_resync()?;

            if !source.wait_ready(self.timeout)? {
                self.stats.timeouts += 1;
                continue;
            }

            let filled = source.dequeue()?;
            let processed = self.process(source, &filled);
            source.requeue(filled)?;
            processed?;
        }

        let stats = self.stats;
        info!(
            "Capture loop stopped: {} published, {} empty, {} dropped, {} timeouts",
            stats.frames_published, stats.frames_empty, stats.frames_dropped, stats.timeouts
        );
        Ok(stats)
    }

    fn process<S: FrameSource>(&mut self, source: &S, filled: &FilledBuffer) -> Result<()> {
        if filled.bytes_used == 0 {
            debug!("Buffer {} came back empty", filled.index);
            self.stats.frames_empty += 1;
            metrics::counter!("frames_empty").increment(1);
            return Ok(());
        }

        let frame = source.frame(filled)?;
        let timestamp_us = self.translator.translate(frame.timestamp);
        let geometry = self.converter.geometry();

        let started = Instant::now();
        let converted = match self.converter.convert(frame.data) {
            Ok(converted) => converted,
            Err(e) if !e.is_fatal() => {
                warn!("Dropping frame {}: {}", frame.sequence, e);
                self.stats.frames_dropped += 1;
                metrics::counter!("frames_dropped").increment(1);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        metrics::histogram!("convert_time_us").record(started.elapsed().as_micros() as f64);

        let sequence = self.stats.frames_published + 1;
        self.sink.publish(timestamp_us, sequence, &converted)?;
        self.stats.frames_published = sequence;
        metrics::counter!("frames_published").increment(1);

        let published = PublishedFrame {
            sequence,
            timestamp_us,
            geometry,
            i420: converted.i420,
            argb: converted.argb,
        };
        for observer in &mut self.observers {
            if let Err(e) = observer.on_frame(&published) {
                warn!("Frame observer failed: {}", e);
            }
        }
        Ok(())
    }
}
