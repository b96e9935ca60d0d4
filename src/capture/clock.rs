//! Monotonic to epoch timestamp translation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};
use tracing::debug;

use super::frame::DeviceTimestamp;
use crate::error::{CaptureError, Result};

/// Round a (seconds, sub-second) pair to whole milliseconds.
fn round_ms(sec: i64, sub: i64, sub_per_ms: f64) -> i64 {
    sec * 1000 + (sub as f64 / sub_per_ms).round() as i64
}

/// Wall clock in microseconds since the Unix epoch
pub fn epoch_now_us() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_micros() as i64,
        Err(before) => -(before.duration().as_micros() as i64),
    }
}

fn epoch_now_ms() -> i64 {
    let us = epoch_now_us();
    round_ms(us.div_euclid(1_000_000), us.rem_euclid(1_000_000), 1_000.0)
}

/// Offset between the two clocks from one back-to-back pair of samples.
fn offset_from(epoch_ms: i64, monotonic: nix::Result<TimeSpec>) -> Result<i64> {
    let monotonic = monotonic.map_err(|e| CaptureError::runtime("reading CLOCK_MONOTONIC", e))?;
    let monotonic_ms = round_ms(monotonic.tv_sec() as i64, monotonic.tv_nsec() as i64, 1_000_000.0);
    Ok(epoch_ms - monotonic_ms)
}

/// Converts driver timestamps to epoch microseconds.
///
/// The offset between CLOCK_MONOTONIC and the wall clock is sampled once in
/// [`TimestampTranslator::calibrate`] and applied unchanged to every frame.
/// Long runs therefore carry whatever drift accumulates between the two
/// clocks, unless a resync interval is configured.
#[derive(Debug, Clone)]
pub struct TimestampTranslator {
    offset_ms: i64,
    resync_every: Option<Duration>,
    calibrated_at: Instant,
}

impl TimestampTranslator {
    pub fn calibrate() -> Result<Self> {
        let offset_ms = offset_from(epoch_now_ms(), clock_gettime(ClockId::CLOCK_MONOTONIC))?;
        Ok(Self::with_offset(offset_ms))
    }

    pub fn with_offset(offset_ms: i64) -> Self {
        debug!("Monotonic to epoch offset: {} ms", offset_ms);
        Self {
            offset_ms,
            resync_every: None,
            calibrated_at: Instant::now(),
        }
    }

    /// Re-sample the offset every `interval`. Off by default.
    pub fn with_resync(mut self, interval: Option<Duration>) -> Self {
        self.resync_every = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Called once per loop iteration, before any frame is translated.
    pub fn maybe_resync(&mut self) -> Result<()> {
        let Some(every) = self.resync_every else {
            return Ok(());
        };
        if self.calibrated_at.elapsed() < every {
            return Ok(());
        }
        let fresh = Self::calibrate()?;
        debug!(
            "Clock offset resynced: {} ms -> {} ms",
            self.offset_ms, fresh.offset_ms
        );
        self.offset_ms = fresh.offset_ms;
        self.calibrated_at = Instant::now();
        Ok(())
    }

    /// Epoch microseconds for a frame stamped by the driver.
    pub fn translate(&self, ts: DeviceTimestamp) -> i64 {
        if ts.monotonic {
            self.translate_monotonic(ts.sec, ts.usec)
        } else {
            epoch_now_us()
        }
    }

    fn translate_monotonic(&self, sec: i64, usec: i64) -> i64 {
        (round_ms(sec, usec, 1_000.0) + self.offset_ms) * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(sec: i64, usec: i64) -> DeviceTimestamp {
        DeviceTimestamp {
            sec,
            usec,
            monotonic: true,
        }
    }

    #[test]
    fn applies_fixed_offset() {
        let translator = TimestampTranslator::with_offset(1_700_000_000_000);
        assert_eq!(translator.translate(mono(12, 0)), 1_700_000_012_000_000);
        assert_eq!(translator.translate(mono(12, 250_000)), 1_700_000_012_250_000);
    }

    #[test]
    fn same_input_same_output() {
        let translator = TimestampTranslator::with_offset(42);
        let a = translator.translate(mono(100, 123_456));
        let b = translator.translate(mono(100, 123_456));
        assert_eq!(a, b);
    }

    #[test]
    fn rounds_to_whole_milliseconds() {
        let translator = TimestampTranslator::with_offset(0);
        assert_eq!(translator.translate(mono(1, 1_499)), 1_001_000);
        assert_eq!(translator.translate(mono(1, 1_500)), 1_002_000);
        assert_eq!(translator.translate(mono(0, 999_600)), 1_000_000);
    }

    #[test]
    fn non_monotonic_uses_wall_clock() {
        let translator = TimestampTranslator::with_offset(0);
        let before = epoch_now_us();
        let ts = translator.translate(DeviceTimestamp {
            sec: 5,
            usec: 0,
            monotonic: false,
        });
        let after = epoch_now_us();
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn calibrated_offset_lands_near_now() {
        let translator = TimestampTranslator::calibrate().unwrap();
        let now = clock_gettime(ClockId::CLOCK_MONOTONIC).unwrap();
        let ts = translator.translate(mono(now.tv_sec() as i64, now.tv_nsec() as i64 / 1000));
        assert!((ts - epoch_now_us()).abs() < 50_000);
    }

    #[test]
    fn resync_disabled_keeps_offset() {
        let mut translator = TimestampTranslator::with_offset(7).with_resync(Some(Duration::ZERO));
        translator.maybe_resync().unwrap();
        assert_eq!(translator.offset_ms(), 7);
    }

    #[test]
    fn resync_replaces_stale_offset() {
        let mut translator =
            TimestampTranslator::with_offset(7).with_resync(Some(Duration::from_nanos(1)));
        std::thread::sleep(Duration::from_millis(1));
        translator.maybe_resync().unwrap();
        assert_ne!(translator.offset_ms(), 7);
    }

    #[test]
    fn offset_from_clock_samples() {
        let monotonic = TimeSpec::new(100, 500_000_000);
        assert_eq!(offset_from(1_700_000_000_000, Ok(monotonic)).unwrap(), 1_699_999_899_500);
    }

    #[test]
    fn unreadable_monotonic_clock_is_an_error() {
        let err = offset_from(1_700_000_000_000, Err(nix::errno::Errno::EINVAL)).unwrap_err();
        assert!(matches!(err, CaptureError::RuntimeLoop { .. }));
        assert!(err.is_fatal());
    }
}
