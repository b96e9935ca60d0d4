//! File-backed shared memory regions for external readers
//!
//! Each region is a file (under `/dev/shm` by default) laid out as a 64-byte
//! header followed by the payload:
//!
//! | offset | size | field                                      |
//! |--------|------|--------------------------------------------|
//! | 0      | 4    | magic `CSHM`                               |
//! | 4      | 4    | notify word, bumped and futex-woken per write |
//! | 8      | 8    | sequence (capture cycle of the payload)    |
//! | 16     | 8    | timestamp, epoch microseconds              |
//! | 24     | 8    | payload length                             |
//!
//! Readers take `flock(LOCK_SH)` on the file while copying the payload and
//! may `FUTEX_WAIT` on the notify word to sleep until the next frame.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::MmapMut;
use rustix::fs::{flock, FlockOperation};
use rustix::thread::futex;
use tracing::{debug, warn};

use super::publish::OutputRegion;
use crate::error::{CaptureError, Result};

pub const HEADER_LEN: usize = 64;
pub const MAGIC: &[u8; 4] = b"CSHM";

const NOTIFY_OFFSET: usize = 4;
const SEQUENCE_OFFSET: usize = 8;
const TIMESTAMP_OFFSET: usize = 16;
const LENGTH_OFFSET: usize = 24;

/// A shared memory region this process creates, writes and removes.
pub struct SharedRegion {
    name: String,
    path: PathBuf,
    file: File,
    map: MmapMut,
    size: usize,
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

impl SharedRegion {
    /// Create (or replace) the region `name` inside `dir` with a `size`-byte payload.
    pub fn create(dir: &Path, name: &str, size: usize) -> Result<Self> {
        let file_name = name.trim_start_matches('/');
        if file_name.is_empty() || file_name.contains('/') {
            return Err(CaptureError::Configuration(format!(
                "invalid shared memory name '{}'",
                name
            )));
        }
        let path = dir.join(file_name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| CaptureError::resource(name, format!("failed to create {}", path.display()), e))?;
        file.set_len((HEADER_LEN + size) as u64)
            .map_err(|e| CaptureError::resource(name, "failed to size shared memory", e))?;

        // SAFETY: the file was just created and truncated by us; readers only
        // touch it under flock and never resize it.
        let mut map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| CaptureError::resource(name, "failed to map shared memory", e))?;
        map[..4].copy_from_slice(MAGIC);
        map[LENGTH_OFFSET..LENGTH_OFFSET + 8].copy_from_slice(&(size as u64).to_ne_bytes());

        debug!("Created shared memory '{}' at {} ({} bytes)", name, path.display(), size);
        Ok(Self {
            name: name.to_owned(),
            path,
            file,
            map,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.map[HEADER_LEN..]
    }

    pub fn timestamp_us(&self) -> i64 {
        i64::from_ne_bytes(self.header_word(TIMESTAMP_OFFSET))
    }

    pub fn sequence(&self) -> u64 {
        u64::from_ne_bytes(self.header_word(SEQUENCE_OFFSET))
    }

    /// Number of `notify_all` calls so far (wrapping).
    pub fn notify_count(&self) -> u32 {
        self.notify_word().load(Ordering::Acquire)
    }

    fn header_word(&self, offset: usize) -> [u8; 8] {
        let mut word = [0; 8];
        word.copy_from_slice(&self.map[offset..offset + 8]);
        word
    }

    fn notify_word(&self) -> &AtomicU32 {
        // SAFETY: the mapping is page aligned and at least HEADER_LEN long, so
        // offset 4 is a valid, aligned u32 for the lifetime of `self.map`.
        unsafe { &*(self.map.as_ptr().add(NOTIFY_OFFSET) as *const AtomicU32) }
    }

    fn flock(&self, operation: FlockOperation) -> rustix::io::Result<()> {
        rustix::io::retry_on_intr(|| flock(&self.file, operation))
    }
}

impl OutputRegion for SharedRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.size
    }

    fn lock(&mut self) -> Result<()> {
        self.flock(FlockOperation::LockExclusive)
            .map_err(|e| CaptureError::resource(&self.name, "lock", e))
    }

    fn unlock(&mut self) -> Result<()> {
        self.flock(FlockOperation::Unlock)
            .map_err(|e| CaptureError::resource(&self.name, "unlock", e))
    }

    fn set_timestamp(&mut self, timestamp_us: i64, sequence: u64) {
        self.map[SEQUENCE_OFFSET..SEQUENCE_OFFSET + 8].copy_from_slice(&sequence.to_ne_bytes());
        self.map[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8].copy_from_slice(&timestamp_us.to_ne_bytes());
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.map[HEADER_LEN..]
    }

    fn notify_all(&self) -> Result<()> {
        let word = self.notify_word();
        word.fetch_add(1, Ordering::Release);
        futex::wake(word, futex::Flags::empty(), u32::MAX)
            .map_err(|e| CaptureError::resource(&self.name, "futex wake", e))?;
        Ok(())
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove shared memory {}: {}", self.path.display(), e);
        }
    }
}
