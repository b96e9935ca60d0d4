//! Handoff of converted frames into the consumer-facing regions

use tracing::warn;

use crate::capture::decoder::ConvertedFrame;
use crate::capture::frame::Geometry;
use crate::error::{CaptureError, Result};

/// A buffer shared with external readers, with this process as sole writer.
pub trait OutputRegion {
    fn name(&self) -> &str;

    /// Payload size in bytes
    fn size(&self) -> usize;

    /// Block until exclusive access is granted.
    fn lock(&mut self) -> Result<()>;

    fn unlock(&mut self) -> Result<()>;

    /// Tag the payload with its capture time and cycle number. Caller holds the lock.
    fn set_timestamp(&mut self, timestamp_us: i64, sequence: u64);

    /// Payload bytes. Caller holds the lock.
    fn data_mut(&mut self) -> &mut [u8];

    /// Wake every reader waiting for new data.
    fn notify_all(&self) -> Result<()>;
}

/// Holds a region's lock; releases it exactly once, on `release` or on drop.
struct Locked<'a, R: OutputRegion> {
    region: &'a mut R,
    held: bool,
}

impl<'a, R: OutputRegion> Locked<'a, R> {
    fn acquire(region: &'a mut R) -> Result<Self> {
        region.lock()?;
        Ok(Self { region, held: true })
    }

    fn release(mut self) -> Result<()> {
        self.held = false;
        self.region.unlock()
    }
}

impl<R: OutputRegion> std::ops::Deref for Locked<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.region
    }
}

impl<R: OutputRegion> std::ops::DerefMut for Locked<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.region
    }
}

impl<R: OutputRegion> Drop for Locked<'_, R> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.region.unlock() {
                warn!("Failed to unlock '{}': {}", self.region.name(), e);
            }
        }
    }
}

fn write_region<R: OutputRegion>(region: &mut R, timestamp_us: i64, sequence: u64, bytes: &[u8]) -> Result<()> {
    let mut locked = Locked::acquire(region)?;
    if locked.size() != bytes.len() {
        return Err(CaptureError::Configuration(format!(
            "region '{}' holds {} bytes, frame has {}",
            locked.name(),
            locked.size(),
            bytes.len()
        )));
    }
    locked.set_timestamp(timestamp_us, sequence);
    locked.data_mut().copy_from_slice(bytes);
    locked.release()?;
    region.notify_all()
}

/// Writes the I420 and ARGB images into their regions.
///
/// The two regions are updated one after the other, each under its own
/// lock. A reader looking at both may see them from different cycles; the
/// sequence number in each region tells them apart.
pub struct PublishSink<R: OutputRegion> {
    i420: R,
    argb: R,
}

impl<R: OutputRegion> PublishSink<R> {
    pub fn new(i420: R, argb: R, geometry: Geometry) -> Result<Self> {
        for (region, expected) in [(&i420, geometry.i420_len()), (&argb, geometry.argb_len())] {
            if region.size() != expected {
                return Err(CaptureError::Configuration(format!(
                    "region '{}' is {} bytes, {}x{} needs {}",
                    region.name(),
                    region.size(),
                    geometry.width,
                    geometry.height,
                    expected
                )));
            }
        }
        Ok(Self { i420, argb })
    }

    pub fn publish(&mut self, timestamp_us: i64, sequence: u64, frame: &ConvertedFrame<'_>) -> Result<()> {
        write_region(&mut self.i420, timestamp_us, sequence, frame.i420)?;
        write_region(&mut self.argb, timestamp_us, sequence, frame.argb)
    }

    pub fn i420(&self) -> &R {
        &self.i420
    }

    pub fn argb(&self) -> &R {
        &self.argb
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryRegion;
    use super::*;

    fn sink(geometry: Geometry) -> PublishSink<MemoryRegion> {
        PublishSink::new(
            MemoryRegion::new("video0.i420", geometry.i420_len()),
            MemoryRegion::new("video0.argb", geometry.argb_len()),
            geometry,
        )
        .unwrap()
    }

    #[test]
    fn writes_both_regions_with_timestamp() {
        let geometry = Geometry::new(2, 2);
        let mut sink = sink(geometry);
        let i420 = [1, 2, 3, 4, 5, 6];
        let argb = [9; 16];
        sink.publish(1_000_042, 7, &ConvertedFrame { i420: &i420, argb: &argb })
            .unwrap();

        for region in [sink.i420(), sink.argb()] {
            assert_eq!(region.locks, 1);
            assert_eq!(region.unlocks, 1);
            assert_eq!(region.notifies.get(), 1);
            assert_eq!(region.timestamp_us, 1_000_042);
            assert_eq!(region.sequence, 7);
        }
        assert_eq!(sink.i420().data, i420);
        assert_eq!(sink.argb().data, argb);
    }

    #[test]
    fn size_mismatch_still_unlocks() {
        let geometry = Geometry::new(2, 2);
        let mut sink = sink(geometry);
        let err = sink
            .publish(0, 0, &ConvertedFrame { i420: &[0; 5], argb: &[0; 16] })
            .unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
        assert_eq!(sink.i420().locks, 1);
        assert_eq!(sink.i420().unlocks, 1);
        assert_eq!(sink.i420().notifies.get(), 0);
        assert_eq!(sink.argb().locks, 0);
    }

    #[test]
    fn failed_lock_is_not_released() {
        let geometry = Geometry::new(2, 2);
        let mut sink = sink(geometry);
        sink.argb.fail_lock = true;
        let err = sink
            .publish(0, 0, &ConvertedFrame { i420: &[0; 6], argb: &[0; 16] })
            .unwrap_err();
        assert!(matches!(err, CaptureError::Resource { .. }));
        assert_eq!(sink.argb().unlocks, 0);
        assert_eq!(sink.i420().unlocks, 1);
    }

    #[test]
    fn rejects_wrongly_sized_regions() {
        let geometry = Geometry::new(640, 480);
        let result = PublishSink::new(
            MemoryRegion::new("a", 460_800),
            MemoryRegion::new("b", 640 * 480 * 3),
            geometry,
        );
        assert!(result.is_err());
    }
}
