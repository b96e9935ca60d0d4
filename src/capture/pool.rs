//! Memory-mapped V4L2 buffer pool

use std::mem;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::ptr::NonNull;
use std::slice;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};

use crate::{
    capture::frame::{CapturedFrame, DeviceTimestamp, FilledBuffer},
    capture::v4l2::CaptureSession,
    error::{CaptureError, Result},
    pipeline::FrameSource,
};

/// Buffers requested from the driver
pub const BUFFER_COUNT: u32 = 32;

const V4L2_BUF_FLAG_TIMESTAMP_MASK: u32 = 0x0000_e000;
const V4L2_BUF_FLAG_TIMESTAMP_MONOTONIC: u32 = 0x0000_2000;

mod ioctl {
    use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};

    nix::ioctl_readwrite!(reqbufs, b'V', 8, v4l2_requestbuffers);
    nix::ioctl_readwrite!(querybuf, b'V', 9, v4l2_buffer);
    nix::ioctl_readwrite!(qbuf, b'V', 15, v4l2_buffer);
    nix::ioctl_readwrite!(dqbuf, b'V', 17, v4l2_buffer);
    nix::ioctl_write_ptr!(streamon, b'V', 18, libc::c_int);
    nix::ioctl_write_ptr!(streamoff, b'V', 19, libc::c_int);
}

/// Who currently holds a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Mapped, not yet handed to the driver
    Free,
    /// Owned by the driver, waiting to be filled
    Queued,
    /// Dequeued, owned by us until requeued
    Filled,
}

/// The streaming calls a [`BufferPool`] is built on, one method per ioctl.
///
/// [`V4l2Queue`] issues them against a negotiated device.
pub trait BufferQueue {
    /// One mapped buffer
    type Memory: AsRef<[u8]>;

    /// Device path, for error messages
    fn device(&self) -> &str;

    /// VIDIOC_REQBUFS; returns the count the driver granted.
    fn request(&mut self, count: u32) -> nix::Result<u32>;

    /// VIDIOC_QUERYBUF followed by a read-only shared mapping.
    fn map(&mut self, index: u32) -> nix::Result<Self::Memory>;

    fn unmap(&mut self, index: u32, memory: Self::Memory) -> nix::Result<()>;

    /// VIDIOC_QBUF
    fn queue(&mut self, index: u32) -> nix::Result<()>;

    /// VIDIOC_DQBUF
    fn dequeue(&mut self) -> nix::Result<FilledBuffer>;

    fn stream_on(&mut self) -> nix::Result<()>;

    fn stream_off(&mut self) -> nix::Result<()>;

    /// Block until a buffer can be dequeued or `timeout` passes.
    fn wait(&mut self, timeout: Duration) -> Result<bool>;
}

/// Wait for `fd` to become readable.
///
/// A timeout or an interrupted wait reports `false`. Error or hang-up
/// without data is fatal: the driver will not deliver frames anymore, and
/// polling again would return immediately.
pub fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> Result<bool> {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, millis) {
        Ok(0) => Ok(false),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if revents.contains(PollFlags::POLLIN) {
                Ok(true)
            } else if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
                Err(CaptureError::runtime(
                    format!("capture device reported {:?}", revents),
                    Errno::EIO,
                ))
            } else {
                Ok(false)
            }
        }
        // a signal interrupted the wait, let the loop look at the token
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(CaptureError::runtime("waiting for capture device", e)),
    }
}

/// One mmap'd driver buffer
#[derive(Debug)]
pub struct MappedBuffer {
    ptr: NonNull<libc::c_void>,
    len: usize,
}

impl AsRef<[u8]> for MappedBuffer {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: `ptr` is a live PROT_READ mapping of `len` bytes until it is
        // handed back to `V4l2Queue::unmap`, which consumes `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }
}

fn blank_buffer(index: u32) -> v4l2_buffer {
    v4l2_buffer {
        index,
        type_: Type::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        // SAFETY: v4l2_buffer is plain old data, all zeroes is valid.
        ..unsafe { mem::zeroed() }
    }
}

/// Streaming ioctls on an open [`CaptureSession`].
///
/// Borrowing the session ties the pool's lifetime to the open device, so the
/// device can only be closed after every buffer is unmapped.
pub struct V4l2Queue<'s> {
    session: &'s CaptureSession,
}

impl<'s> V4l2Queue<'s> {
    pub fn new(session: &'s CaptureSession) -> Self {
        Self { session }
    }

    fn fd(&self) -> libc::c_int {
        self.session.as_fd().as_raw_fd()
    }
}

impl BufferQueue for V4l2Queue<'_> {
    type Memory = MappedBuffer;

    fn device(&self) -> &str {
        self.session.path()
    }

    fn request(&mut self, count: u32) -> nix::Result<u32> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: Type::VideoCapture as u32,
            memory: Memory::Mmap as u32,
            // SAFETY: plain old data.
            ..unsafe { mem::zeroed() }
        };
        // SAFETY: `req` is a valid v4l2_requestbuffers for the lifetime of the call.
        unsafe { ioctl::reqbufs(self.fd(), &mut req) }?;
        Ok(req.count)
    }

    fn map(&mut self, index: u32) -> nix::Result<MappedBuffer> {
        let mut raw = blank_buffer(index);
        // SAFETY: `raw` is a valid v4l2_buffer for the lifetime of the call.
        unsafe { ioctl::querybuf(self.fd(), &mut raw) }?;

        let len = NonZeroUsize::new(raw.length as usize).ok_or(Errno::EINVAL)?;
        // SAFETY: for MMAP buffers the driver fills the `offset` member of the union.
        let offset = unsafe { raw.m.offset } as libc::off_t;

        // SAFETY: maps a driver-provided region; we only ever read from it.
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ,
                MapFlags::MAP_SHARED,
                self.session.as_fd(),
                offset,
            )
        }?;
        Ok(MappedBuffer { ptr, len: len.get() })
    }

    fn unmap(&mut self, _index: u32, memory: MappedBuffer) -> nix::Result<()> {
        // SAFETY: `memory` is consumed, nothing borrows the mapping anymore.
        unsafe { munmap(memory.ptr, memory.len) }
    }

    fn queue(&mut self, index: u32) -> nix::Result<()> {
        let mut raw = blank_buffer(index);
        // SAFETY: `raw` is a valid v4l2_buffer for the lifetime of the call.
        unsafe { ioctl::qbuf(self.fd(), &mut raw) }?;
        Ok(())
    }

    fn dequeue(&mut self) -> nix::Result<FilledBuffer> {
        let mut raw = blank_buffer(0);
        // SAFETY: `raw` is a valid v4l2_buffer for the lifetime of the call.
        unsafe { ioctl::dqbuf(self.fd(), &mut raw) }?;
        Ok(FilledBuffer {
            index: raw.index as usize,
            bytes_used: raw.bytesused as usize,
            sequence: raw.sequence,
            timestamp: DeviceTimestamp {
                sec: raw.timestamp.tv_sec as i64,
                usec: raw.timestamp.tv_usec as i64,
                monotonic: raw.flags & V4L2_BUF_FLAG_TIMESTAMP_MASK
                    == V4L2_BUF_FLAG_TIMESTAMP_MONOTONIC,
            },
        })
    }

    fn stream_on(&mut self) -> nix::Result<()> {
        let kind = Type::VideoCapture as libc::c_int;
        // SAFETY: STREAMON reads a single int.
        unsafe { ioctl::streamon(self.fd(), &kind) }?;
        Ok(())
    }

    fn stream_off(&mut self) -> nix::Result<()> {
        let kind = Type::VideoCapture as libc::c_int;
        // SAFETY: STREAMOFF reads a single int.
        unsafe { ioctl::streamoff(self.fd(), &kind) }?;
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        wait_readable(self.session.as_fd(), timeout)
    }
}

struct Slot<M> {
    memory: M,
    state: BufferState,
}

/// The fixed set of kernel buffers for one session.
///
/// Tracks which side owns each buffer; a buffer is only read while we hold
/// it and only queued once per dequeue.
pub struct BufferPool<Q: BufferQueue> {
    queue: Q,
    slots: Vec<Slot<Q::Memory>>,
    streaming: bool,
}

impl<'s> BufferPool<V4l2Queue<'s>> {
    /// Request `count` mmap buffers from the device and map every one of them.
    #[instrument(skip(session), fields(device = %session.path()))]
    pub fn allocate(session: &'s CaptureSession, count: u32) -> Result<Self> {
        Self::with_queue(V4l2Queue::new(session), count)
    }
}

impl<Q: BufferQueue> BufferPool<Q> {
    /// All `count` buffers or nothing: a short grant or a failed mapping
    /// fails the whole pool.
    pub fn with_queue(mut queue: Q, count: u32) -> Result<Self> {
        let granted = queue.request(count).map_err(|e| {
            CaptureError::device(queue.device(), "could not allocate buffers (VIDIOC_REQBUFS)", e)
        })?;
        if granted != count {
            return Err(CaptureError::Configuration(format!(
                "capture device {} granted {} of {} buffers",
                queue.device(),
                granted,
                count
            )));
        }

        let mut pool = Self {
            queue,
            slots: Vec::with_capacity(count as usize),
            streaming: false,
        };
        for index in 0..count {
            // Dropping `pool` on error unmaps whatever was mapped so far.
            let memory = pool.queue.map(index).map_err(|e| {
                CaptureError::device(pool.queue.device(), format!("could not map buffer {}", index), e)
            })?;
            pool.slots.push(Slot {
                memory,
                state: BufferState::Free,
            });
        }

        info!("Mapped {} capture buffers", pool.slots.len());
        Ok(pool)
    }

    #[cfg(test)]
    fn state(&self, index: usize) -> Option<BufferState> {
        self.slots.get(index).map(|s| s.state)
    }

    fn queue_slot(&mut self, index: usize) -> nix::Result<()> {
        self.queue.queue(index as u32)?;
        self.slots[index].state = BufferState::Queued;
        Ok(())
    }

    /// Hand every buffer to the driver and start streaming.
    pub fn start(&mut self) -> Result<()> {
        for index in 0..self.slots.len() {
            self.queue_slot(index).map_err(|e| {
                CaptureError::device(
                    self.queue.device(),
                    format!("could not queue buffer {} (VIDIOC_QBUF)", index),
                    e,
                )
            })?;
        }

        self.queue.stream_on().map_err(|e| {
            CaptureError::device(self.queue.device(), "could not start video stream (VIDIOC_STREAMON)", e)
        })?;
        self.streaming = true;
        info!("Capture stream started with {} buffers", self.slots.len());
        Ok(())
    }

    /// Stop streaming and unmap every buffer, in that order.
    ///
    /// Unmapping happens even when STREAMOFF fails; the STREAMOFF error is
    /// still reported. The device itself is closed by whoever owns it, after
    /// this returns.
    pub fn shutdown(mut self) -> Result<()> {
        let stopped = self.stream_off();
        self.unmap_all();
        stopped
    }

    fn stream_off(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.queue.stream_off().map_err(|e| {
            CaptureError::device(self.queue.device(), "could not stop video stream (VIDIOC_STREAMOFF)", e)
        })?;
        for slot in &mut self.slots {
            slot.state = BufferState::Free;
        }
        debug!("Capture stream stopped");
        Ok(())
    }

    fn unmap_all(&mut self) {
        for (index, slot) in mem::take(&mut self.slots).into_iter().enumerate() {
            if let Err(e) = self.queue.unmap(index as u32, slot.memory) {
                warn!("munmap of buffer {} failed: {}", index, e);
            }
        }
    }

    fn slot_error(&self, index: usize, what: &str) -> CaptureError {
        let state = self.slots.get(index).map(|s| s.state);
        CaptureError::runtime(
            format!("{} buffer {} in state {:?}", what, index, state),
            Errno::EINVAL,
        )
    }
}

impl<Q: BufferQueue> Drop for BufferPool<Q> {
    fn drop(&mut self) {
        if let Err(e) = self.stream_off() {
            warn!("{}", e);
        }
        self.unmap_all();
    }
}

impl<Q: BufferQueue> FrameSource for BufferPool<Q> {
    fn wait_ready(&mut self, timeout: Duration) -> Result<bool> {
        self.queue.wait(timeout)
    }

    fn dequeue(&mut self) -> Result<FilledBuffer> {
        let filled = self.queue.dequeue().map_err(|e| {
            CaptureError::runtime(
                format!("could not dequeue buffer for capture device {}", self.queue.device()),
                e,
            )
        })?;

        if self.slots.get(filled.index).map(|s| s.state) != Some(BufferState::Queued) {
            return Err(self.slot_error(filled.index, "driver returned"));
        }
        self.slots[filled.index].state = BufferState::Filled;
        Ok(filled)
    }

    fn frame(&self, filled: &FilledBuffer) -> Result<CapturedFrame<'_>> {
        let slot = match self.slots.get(filled.index) {
            Some(slot) if slot.state == BufferState::Filled => slot,
            _ => return Err(self.slot_error(filled.index, "cannot read")),
        };
        let bytes = slot.memory.as_ref();
        let data = bytes.get(..filled.bytes_used).ok_or_else(|| {
            CaptureError::runtime(
                format!(
                    "buffer {} reports {} bytes used but holds {}",
                    filled.index,
                    filled.bytes_used,
                    bytes.len()
                ),
                Errno::EOVERFLOW,
            )
        })?;
        Ok(CapturedFrame {
            data,
            sequence: filled.sequence,
            timestamp: filled.timestamp,
        })
    }

    fn requeue(&mut self, filled: FilledBuffer) -> Result<()> {
        if self.slots.get(filled.index).map(|s| s.state) != Some(BufferState::Filled) {
            return Err(self.slot_error(filled.index, "cannot requeue"));
        }
        self.queue_slot(filled.index).map_err(|e| {
            CaptureError::runtime(
                format!("could not requeue buffer for capture device {}", self.queue.device()),
                e,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::rc::Rc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::capture::frame::{Geometry, PixelFormat};
    use crate::capture::{FrameConverter, TimestampTranslator};
    use crate::pipeline::publish::testing::MemoryRegion;
    use crate::pipeline::{CaptureLoop, PublishSink};

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records every call; closing the "device" is logged on drop.
    struct RecordingQueue {
        log: Log,
        granted: u32,
        buffer_len: usize,
        delivered: VecDeque<FilledBuffer>,
        readiness: Option<OwnedFd>,
        waits: usize,
        give_up: Option<(usize, CancellationToken)>,
    }

    impl RecordingQueue {
        fn new(granted: u32) -> (Self, Log) {
            let log = Log::default();
            let queue = Self {
                log: log.clone(),
                granted,
                buffer_len: 8,
                delivered: VecDeque::new(),
                readiness: None,
                waits: 0,
                give_up: None,
            };
            (queue, log)
        }

        fn record(&self, call: impl Into<String>) {
            self.log.borrow_mut().push(call.into());
        }
    }

    impl BufferQueue for RecordingQueue {
        type Memory = Vec<u8>;

        fn device(&self) -> &str {
            "/dev/video9"
        }

        fn request(&mut self, count: u32) -> nix::Result<u32> {
            self.record(format!("reqbufs {}", count));
            Ok(self.granted)
        }

        fn map(&mut self, index: u32) -> nix::Result<Vec<u8>> {
            self.record(format!("map {}", index));
            Ok(vec![index as u8; self.buffer_len])
        }

        fn unmap(&mut self, index: u32, _memory: Vec<u8>) -> nix::Result<()> {
            self.record(format!("unmap {}", index));
            Ok(())
        }

        fn queue(&mut self, index: u32) -> nix::Result<()> {
            self.record(format!("qbuf {}", index));
            Ok(())
        }

        fn dequeue(&mut self) -> nix::Result<FilledBuffer> {
            self.record("dqbuf");
            self.delivered.pop_front().ok_or(Errno::EAGAIN)
        }

        fn stream_on(&mut self) -> nix::Result<()> {
            self.record("streamon");
            Ok(())
        }

        fn stream_off(&mut self) -> nix::Result<()> {
            self.record("streamoff");
            Ok(())
        }

        fn wait(&mut self, timeout: Duration) -> Result<bool> {
            self.waits += 1;
            if let Some((limit, cancel)) = &self.give_up {
                if self.waits >= *limit {
                    cancel.cancel();
                }
            }
            match &self.readiness {
                Some(fd) => wait_readable(fd.as_fd(), timeout),
                None => Ok(!self.delivered.is_empty()),
            }
        }
    }

    impl Drop for RecordingQueue {
        fn drop(&mut self) {
            self.record("close");
        }
    }

    fn filled(index: usize, bytes_used: usize) -> FilledBuffer {
        FilledBuffer {
            index,
            bytes_used,
            sequence: 0,
            timestamp: DeviceTimestamp::default(),
        }
    }

    fn calls(log: &Log) -> Vec<String> {
        log.borrow().clone()
    }

    #[test]
    fn maps_every_granted_buffer() {
        let (queue, log) = RecordingQueue::new(4);
        let pool = BufferPool::with_queue(queue, 4).unwrap();
        assert_eq!(calls(&log), ["reqbufs 4", "map 0", "map 1", "map 2", "map 3"]);
        assert!((0..4).all(|i| pool.state(i) == Some(BufferState::Free)));
        assert_eq!(pool.state(4), None);
    }

    #[test]
    fn short_grant_fails_the_pool() {
        let (queue, log) = RecordingQueue::new(16);
        let err = BufferPool::with_queue(queue, BUFFER_COUNT).err().unwrap();
        assert!(matches!(err, CaptureError::Configuration(_)));
        assert!(err.to_string().contains("16 of 32"));
        assert!(!calls(&log).iter().any(|c| c.starts_with("map")));
    }

    #[test]
    fn buffer_changes_hands() {
        let (mut queue, log) = RecordingQueue::new(3);
        queue.delivered.push_back(filled(2, 5));
        let mut pool = BufferPool::with_queue(queue, 3).unwrap();

        pool.start().unwrap();
        assert!((0..3).all(|i| pool.state(i) == Some(BufferState::Queued)));
        assert_eq!(calls(&log)[4..], ["qbuf 0", "qbuf 1", "qbuf 2", "streamon"]);

        let buffer = pool.dequeue().unwrap();
        assert_eq!(pool.state(2), Some(BufferState::Filled));
        assert_eq!(pool.frame(&buffer).unwrap().data, &[2; 5]);

        pool.requeue(buffer).unwrap();
        assert_eq!(pool.state(2), Some(BufferState::Queued));
        assert_eq!(calls(&log).last().map(String::as_str), Some("qbuf 2"));
    }

    #[test]
    fn frame_is_bounded_by_the_mapping() {
        let (mut queue, _log) = RecordingQueue::new(2);
        queue.delivered.push_back(filled(1, 9));
        let mut pool = BufferPool::with_queue(queue, 2).unwrap();
        pool.start().unwrap();

        let buffer = pool.dequeue().unwrap();
        let err = pool.frame(&buffer).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::RuntimeLoop { ref source, .. } if source.raw_os_error() == Some(libc::EOVERFLOW)
        ));
        pool.requeue(buffer).unwrap();
    }

    #[test]
    fn dequeue_rejects_unknown_or_unqueued_buffers() {
        let (mut queue, _log) = RecordingQueue::new(2);
        queue.delivered.extend([filled(7, 1), filled(0, 1), filled(0, 1)]);
        let mut pool = BufferPool::with_queue(queue, 2).unwrap();

        pool.start().unwrap();
        // index past the end of the pool
        assert!(matches!(pool.dequeue(), Err(CaptureError::RuntimeLoop { .. })));

        let first = pool.dequeue().unwrap();
        // the driver handing out the same buffer twice
        assert!(pool.dequeue().is_err());
        assert_eq!(pool.state(0), Some(BufferState::Filled));
        pool.requeue(first).unwrap();
    }

    #[test]
    fn free_buffer_cannot_be_dequeued_or_requeued() {
        let (mut queue, log) = RecordingQueue::new(2);
        queue.delivered.push_back(filled(1, 1));
        let mut pool = BufferPool::with_queue(queue, 2).unwrap();

        assert!(pool.dequeue().is_err());
        assert!(pool.requeue(filled(0, 1)).is_err());
        assert!(pool.frame(&filled(0, 1)).is_err());
        assert!(!calls(&log).iter().any(|c| c.starts_with("qbuf")));
    }

    #[test]
    fn shutdown_stops_then_unmaps_then_closes_once() {
        let (queue, log) = RecordingQueue::new(2);
        let mut pool = BufferPool::with_queue(queue, 2).unwrap();
        pool.start().unwrap();
        log.borrow_mut().clear();

        pool.shutdown().unwrap();
        assert_eq!(calls(&log), ["streamoff", "unmap 0", "unmap 1", "close"]);
    }

    #[test]
    fn drop_tears_down_in_the_same_order() {
        let (queue, log) = RecordingQueue::new(2);
        let mut pool = BufferPool::with_queue(queue, 2).unwrap();
        pool.start().unwrap();
        log.borrow_mut().clear();

        drop(pool);
        assert_eq!(calls(&log), ["streamoff", "unmap 0", "unmap 1", "close"]);
    }

    #[test]
    fn drop_before_streaming_skips_streamoff() {
        let (queue, log) = RecordingQueue::new(1);
        drop(BufferPool::with_queue(queue, 1).unwrap());
        assert_eq!(calls(&log), ["reqbufs 1", "map 0", "unmap 0", "close"]);
    }

    fn pipe() -> (OwnedFd, std::fs::File) {
        let (reader, writer) = rustix::pipe::pipe().unwrap();
        (reader, std::fs::File::from(writer))
    }

    #[test]
    fn readable_descriptor_is_ready() {
        let (reader, mut writer) = pipe();
        writer.write_all(b"x").unwrap();
        assert!(wait_readable(reader.as_fd(), Duration::from_millis(100)).unwrap());
    }

    #[test]
    fn idle_descriptor_times_out() {
        let (reader, _writer) = pipe();
        assert!(!wait_readable(reader.as_fd(), Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn hung_up_descriptor_is_fatal() {
        let (reader, writer) = pipe();
        drop(writer);
        let err = wait_readable(reader.as_fd(), Duration::from_millis(100)).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, CaptureError::RuntimeLoop { .. }));
    }

    #[test]
    fn loop_exits_when_the_device_hangs_up() {
        let geometry = Geometry::new(2, 2);
        let cancel = CancellationToken::new();
        let (reader, writer) = pipe();
        drop(writer);

        let (mut queue, _log) = RecordingQueue::new(2);
        queue.readiness = Some(reader);
        // bounds the run if the hang-up were ever treated as a timeout
        queue.give_up = Some((50, cancel.clone()));
        let mut pool = BufferPool::with_queue(queue, 2).unwrap();
        pool.start().unwrap();

        let sink = PublishSink::new(
            MemoryRegion::new("video9.i420", geometry.i420_len()),
            MemoryRegion::new("video9.argb", geometry.argb_len()),
            geometry,
        )
        .unwrap();
        let mut capture = CaptureLoop::new(
            TimestampTranslator::with_offset(0),
            FrameConverter::new(PixelFormat::Yuyv422, geometry),
            sink,
            cancel.clone(),
        );

        let err = capture.run(&mut pool).unwrap_err();
        assert!(matches!(err, CaptureError::RuntimeLoop { .. }));
        assert!(!cancel.is_cancelled());
        assert_eq!(capture.stats().timeouts, 0);
    }
}
