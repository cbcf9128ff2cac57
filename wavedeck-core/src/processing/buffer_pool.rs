//! Fixed-size device buffers with explicit ownership tracking.
//!
//! The pool is an index-addressed arena: engines and devices refer to
//! buffers by [`BufferId`] and never hold the storage itself. Each buffer has
//! exactly one owner at any instant:
//!
//! ```text
//! Free ──submit──→ QueuedWithDevice ──reclaim──→ ReadyForReuse
//!   │                     ↑                          │   │
//!   │                     └─────────submit───────────┘   │
//!   └──────────release──────→ Released ←───release───────┘
//! ```
//!
//! The pool is not synchronised; wrap it in the engine's state mutex.

use std::io::{ErrorKind, Read};

use serde::Serialize;

use crate::models::error::StreamError;
use crate::traits::audio_device::AudioDevice;

/// Index of a buffer inside its pool.
pub type BufferId = usize;

/// Who currently owns a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// Allocated and registered, never submitted.
    Free,
    /// Handed to the device. Must not be touched until reclaimed.
    QueuedWithDevice,
    /// Returned by the device, contents available to the engine.
    ReadyForReuse,
    /// Unregistered and freed. Terminal.
    Released,
}

/// One device buffer.
#[derive(Debug)]
pub struct DeviceBuffer {
    id: BufferId,
    data: Vec<u8>,
    capacity: usize,
    valid: usize,
    ownership: Ownership,
}

impl DeviceBuffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of meaningful data: recorded bytes for capture, bytes to play
    /// for playback.
    pub fn valid_bytes(&self) -> usize {
        self.valid
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn contents(&self) -> &[u8] {
        &self.data[..self.valid]
    }

    fn is_engine_owned(&self) -> bool {
        matches!(self.ownership, Ownership::Free | Ownership::ReadyForReuse)
    }
}

/// Arena of fixed-capacity byte buffers registered with one device.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<DeviceBuffer>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `count` Free buffers of `size` bytes and register each with
    /// `device`.
    ///
    /// On a registration failure, buffers registered so far are released
    /// again and the pool is left empty.
    pub fn allocate<D: AudioDevice + ?Sized>(
        &mut self,
        count: usize,
        size: usize,
        device: &mut D,
    ) -> Result<(), StreamError> {
        if self.buffers.iter().any(|b| b.ownership != Ownership::Released) {
            return Err(StreamError::InvalidState(
                "pool still holds live buffers".into(),
            ));
        }
        if count == 0 || size == 0 {
            return Err(StreamError::BufferRegistration(format!(
                "cannot allocate {} buffer(s) of {} bytes",
                count, size
            )));
        }

        self.buffers.clear();
        for id in 0..count {
            if let Err(e) = device.prepare_buffer(id, size) {
                log::error!("Device rejected buffer {}: {}", id, e);
                if let Err(cleanup) = self.release_all(device) {
                    log::warn!("Cleanup after failed allocation: {}", cleanup);
                }
                self.buffers.clear();
                return Err(match e {
                    StreamError::BufferRegistration(_) => e,
                    other => StreamError::BufferRegistration(other.to_string()),
                });
            }
            self.buffers.push(DeviceBuffer {
                id,
                data: vec![0u8; size],
                capacity: size,
                valid: 0,
                ownership: Ownership::Free,
            });
        }

        log::debug!("Allocated {} device buffers of {} bytes", count, size);
        Ok(())
    }

    /// Hand buffer `id` to the device with its current contents.
    ///
    /// Free/ReadyForReuse → QueuedWithDevice. If the device refuses the
    /// buffer, ownership is unchanged.
    pub fn submit<D: AudioDevice + ?Sized>(&mut self, id: BufferId, device: &mut D) -> Result<(), StreamError> {
        let buffer = self.buffer_mut(id)?;
        if !buffer.is_engine_owned() {
            return Err(StreamError::InvalidState(format!(
                "cannot submit buffer {} while {:?}",
                id, buffer.ownership
            )));
        }

        device.submit_buffer(id, &buffer.data[..buffer.valid])?;
        buffer.ownership = Ownership::QueuedWithDevice;
        Ok(())
    }

    /// Record that the device has finished with buffer `id`.
    ///
    /// QueuedWithDevice → ReadyForReuse. `delivered` holds recorded bytes
    /// for capture devices (truncated to capacity) and is empty for
    /// playback; for playback the previous contents are kept so the engine
    /// can tell what was played. Returns the number of bytes recorded.
    pub fn reclaim(&mut self, id: BufferId, delivered: &[u8]) -> Result<usize, StreamError> {
        let buffer = self.buffer_mut(id)?;
        if buffer.ownership != Ownership::QueuedWithDevice {
            return Err(StreamError::InvalidState(format!(
                "completion for buffer {} which is {:?}",
                id, buffer.ownership
            )));
        }

        let recorded = delivered.len().min(buffer.capacity);
        if recorded < delivered.len() {
            log::warn!(
                "Device delivered {} bytes into a {}-byte buffer; truncating",
                delivered.len(),
                buffer.capacity
            );
        }
        if !delivered.is_empty() {
            buffer.data[..recorded].copy_from_slice(&delivered[..recorded]);
            buffer.valid = recorded;
        }
        buffer.ownership = Ownership::ReadyForReuse;
        Ok(recorded)
    }

    /// Refill buffer `id` from `reader`, reading until the buffer is full or
    /// the reader is exhausted. Returns the bytes read; 0 means exhausted.
    pub fn fill_from<R: Read + ?Sized>(&mut self, id: BufferId, reader: &mut R) -> Result<usize, StreamError> {
        let buffer = self.buffer_mut(id)?;
        if !buffer.is_engine_owned() {
            return Err(StreamError::OwnershipViolation(id));
        }

        let mut filled = 0;
        while filled < buffer.capacity {
            match reader.read(&mut buffer.data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    buffer.valid = 0;
                    return Err(StreamError::io("source read failed", e));
                }
            }
        }
        buffer.valid = filled;
        Ok(filled)
    }

    /// Forget the contents of an engine-owned buffer so it can be reused.
    pub fn discard_contents(&mut self, id: BufferId) -> Result<(), StreamError> {
        let buffer = self.buffer_mut(id)?;
        if !buffer.is_engine_owned() {
            return Err(StreamError::OwnershipViolation(id));
        }
        buffer.valid = 0;
        Ok(())
    }

    /// Unregister buffer `id` from the device and free its storage.
    ///
    /// Releasing a QueuedWithDevice buffer is an ordering bug and is refused.
    /// Releasing an already released buffer is a no-op.
    pub fn release<D: AudioDevice + ?Sized>(&mut self, id: BufferId, device: &mut D) -> Result<(), StreamError> {
        let buffer = self.buffer_mut(id)?;
        match buffer.ownership {
            Ownership::Released => return Ok(()),
            Ownership::QueuedWithDevice => {
                log::error!("Refusing to release buffer {} while the device owns it", id);
                return Err(StreamError::OwnershipViolation(id));
            }
            Ownership::Free | Ownership::ReadyForReuse => {}
        }

        device.unprepare_buffer(id)?;
        buffer.ownership = Ownership::Released;
        buffer.valid = 0;
        buffer.data = Vec::new();
        Ok(())
    }

    /// Release every engine-owned buffer.
    ///
    /// Buffers still queued with the device are skipped and reported through
    /// the returned error; everything else is released. Returns the number
    /// of buffers released by this call.
    pub fn release_all<D: AudioDevice + ?Sized>(&mut self, device: &mut D) -> Result<usize, StreamError> {
        let mut released = 0;
        let mut first_error = None;
        for id in 0..self.buffers.len() {
            if self.buffers[id].ownership == Ownership::Released {
                continue;
            }
            match self.release(id, device) {
                Ok(()) => released += 1,
                Err(e) => {
                    log::warn!("Failed to release buffer {}: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }

    pub fn get(&self, id: BufferId) -> Option<&DeviceBuffer> {
        self.buffers.get(id)
    }

    pub fn ownership(&self, id: BufferId) -> Option<Ownership> {
        self.buffers.get(id).map(|b| b.ownership)
    }

    /// Ids of every buffer currently in `ownership`, in pool order.
    pub fn ids_with(&self, ownership: Ownership) -> Vec<BufferId> {
        self.buffers
            .iter()
            .filter(|b| b.ownership == ownership)
            .map(|b| b.id)
            .collect()
    }

    /// Number of buffers the device currently owns.
    pub fn queued_count(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.ownership == Ownership::QueuedWithDevice)
            .count()
    }

    /// Whether every buffer has been released (or none were allocated).
    pub fn is_released(&self) -> bool {
        self.buffers.iter().all(|b| b.ownership == Ownership::Released)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut DeviceBuffer, StreamError> {
        self.buffers
            .get_mut(id)
            .ok_or_else(|| StreamError::InvalidState(format!("no buffer with id {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::virtual_device::{DeviceOp, VirtualDirectory};
    use crate::models::format::AudioFormat;
    use crate::traits::device_directory::DeviceDirectory;
    use std::sync::Arc;

    fn open_capture(directory: &VirtualDirectory) -> crate::device::virtual_device::VirtualDevice {
        let mut device = directory.open_capture(0).unwrap();
        device
            .open(&AudioFormat::new(1, 16, 8000), Arc::new(|_, _| {}))
            .unwrap();
        device
    }

    fn assert_single_owner(pool: &BufferPool) {
        for id in 0..pool.len() {
            let owners = [
                Ownership::Free,
                Ownership::QueuedWithDevice,
                Ownership::ReadyForReuse,
                Ownership::Released,
            ]
            .iter()
            .filter(|o| pool.ids_with(**o).contains(&id))
            .count();
            assert_eq!(owners, 1, "buffer {} has {} owners", id, owners);
        }
    }

    #[test]
    fn allocate_registers_free_buffers() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();

        pool.allocate(3, 128, &mut device).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.ids_with(Ownership::Free), vec![0, 1, 2]);
        assert_eq!(directory.capture_handle().prepared(), vec![0, 1, 2]);
        assert_single_owner(&pool);
    }

    #[test]
    fn allocation_failure_releases_prepared_buffers() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        directory.capture_handle().fail_prepare_at(2);
        let mut pool = BufferPool::new();

        let err = pool.allocate(4, 64, &mut device).unwrap_err();

        assert!(matches!(err, StreamError::BufferRegistration(_)));
        assert!(pool.is_empty());
        assert!(directory.capture_handle().prepared().is_empty());
        assert_eq!(directory.capture_handle().count_ops(DeviceOp::Unprepare), 2);
    }

    #[test]
    fn lifecycle_keeps_exactly_one_owner() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();
        pool.allocate(2, 16, &mut device).unwrap();

        pool.submit(0, &mut device).unwrap();
        assert_eq!(pool.ownership(0), Some(Ownership::QueuedWithDevice));
        assert_single_owner(&pool);

        let recorded = pool.reclaim(0, &[7u8; 10]).unwrap();
        assert_eq!(recorded, 10);
        assert_eq!(pool.ownership(0), Some(Ownership::ReadyForReuse));
        assert_eq!(pool.get(0).unwrap().contents(), &[7u8; 10]);
        assert_single_owner(&pool);

        pool.submit(0, &mut device).unwrap();
        pool.submit(1, &mut device).unwrap();
        assert_eq!(pool.queued_count(), 2);
        assert_single_owner(&pool);
    }

    #[test]
    fn double_submit_is_rejected() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();
        pool.allocate(1, 16, &mut device).unwrap();

        pool.submit(0, &mut device).unwrap();
        let err = pool.submit(0, &mut device).unwrap_err();

        assert!(matches!(err, StreamError::InvalidState(_)));
        assert_eq!(directory.capture_handle().queued_len(), 1);
    }

    #[test]
    fn refuses_to_release_queued_buffer() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();
        pool.allocate(2, 16, &mut device).unwrap();
        pool.submit(1, &mut device).unwrap();

        assert_eq!(pool.release(1, &mut device), Err(StreamError::OwnershipViolation(1)));
        assert_eq!(pool.ownership(1), Some(Ownership::QueuedWithDevice));

        // release_all frees what it may and reports the rest
        assert_eq!(pool.release_all(&mut device), Err(StreamError::OwnershipViolation(1)));
        assert_eq!(pool.ownership(0), Some(Ownership::Released));
        assert_eq!(directory.capture_handle().prepared(), vec![1]);
    }

    #[test]
    fn release_happens_exactly_once() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();
        pool.allocate(2, 16, &mut device).unwrap();

        assert_eq!(pool.release_all(&mut device), Ok(2));
        assert_eq!(pool.release_all(&mut device), Ok(0));
        pool.release(0, &mut device).unwrap();

        assert!(pool.is_released());
        assert_eq!(directory.capture_handle().count_ops(DeviceOp::Unprepare), 2);
    }

    #[test]
    fn reclaim_of_unqueued_buffer_is_rejected() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();
        pool.allocate(1, 16, &mut device).unwrap();

        assert!(pool.reclaim(0, &[1, 2, 3]).is_err());
        assert_eq!(pool.ownership(0), Some(Ownership::Free));
        assert_eq!(pool.get(0).unwrap().valid_bytes(), 0);
    }

    #[test]
    fn oversized_delivery_is_truncated() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();
        pool.allocate(1, 4, &mut device).unwrap();
        pool.submit(0, &mut device).unwrap();

        assert_eq!(pool.reclaim(0, &[1, 2, 3, 4, 5, 6]).unwrap(), 4);
        assert_eq!(pool.get(0).unwrap().contents(), &[1, 2, 3, 4]);
    }

    #[test]
    fn fill_reads_until_full_or_exhausted() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();
        pool.allocate(1, 4, &mut device).unwrap();

        // Chained readers force short reads.
        let mut source = (&[1u8, 2][..]).chain(&[3u8, 4, 5][..]);
        assert_eq!(pool.fill_from(0, &mut source).unwrap(), 4);
        assert_eq!(pool.get(0).unwrap().contents(), &[1, 2, 3, 4]);
        assert_eq!(pool.fill_from(0, &mut source).unwrap(), 1);
        assert_eq!(pool.fill_from(0, &mut source).unwrap(), 0);
    }

    #[test]
    fn queued_buffer_cannot_be_refilled() {
        let directory = VirtualDirectory::new();
        let mut device = open_capture(&directory);
        let mut pool = BufferPool::new();
        pool.allocate(1, 4, &mut device).unwrap();
        pool.submit(0, &mut device).unwrap();

        let mut source = &[9u8; 8][..];
        assert_eq!(pool.fill_from(0, &mut source), Err(StreamError::OwnershipViolation(0)));
        assert_eq!(pool.discard_contents(0), Err(StreamError::OwnershipViolation(0)));
    }
}
