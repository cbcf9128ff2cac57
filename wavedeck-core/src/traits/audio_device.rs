use std::sync::Arc;

use crate::models::device::{DeviceInfo, StreamDirection};
use crate::models::error::StreamError;
use crate::models::format::AudioFormat;
use crate::processing::buffer_pool::BufferId;

/// Completion (reclaim) notification from a device.
///
/// Parameters:
/// - `id`: The buffer the device has finished with.
/// - `data`: For capture, the bytes recorded into the buffer. For playback,
///   an empty slice.
///
/// May fire on any thread, concurrently with any controller call, including
/// from inside `reset()` on the calling thread.
pub type CompletionCallback = Arc<dyn Fn(BufferId, &[u8]) + Send + Sync + 'static>;

/// A capture or playback device driven by queued buffers.
///
/// Implemented by:
/// - `VirtualDevice` (in-process, completions driven explicitly)
/// - `WaveInDevice` / `WaveOutDevice` (Windows WinMM)
///
/// Buffers are identified by the pool's [`BufferId`]. The device keeps its
/// own native storage for every prepared id; `submit_buffer` copies the
/// bytes to play (or nothing, for capture) and queues the buffer.
pub trait AudioDevice: Send + 'static {
    fn direction(&self) -> StreamDirection;

    /// Information about the endpoint backing this device.
    fn device_info(&self) -> DeviceInfo;

    /// Open the endpoint at `format`. Completions are delivered through
    /// `on_complete` until `close()` returns.
    fn open(&mut self, format: &AudioFormat, on_complete: CompletionCallback) -> Result<(), StreamError>;

    /// Register buffer `id` of `capacity` bytes with the device.
    fn prepare_buffer(&mut self, id: BufferId, capacity: usize) -> Result<(), StreamError>;

    /// Queue buffer `id`. `data` is what to play; capture devices get an
    /// empty slice and fill the buffer themselves.
    fn submit_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), StreamError>;

    /// Start streaming. Playback devices may already be running once a
    /// buffer is queued, in which case this is a no-op.
    fn start(&mut self) -> Result<(), StreamError>;

    /// Stop the stream, keeping queued buffers queued.
    fn pause(&mut self) -> Result<(), StreamError>;

    /// Restart a paused stream.
    fn resume(&mut self) -> Result<(), StreamError>;

    /// Stop the stream and hand every queued buffer back through the
    /// completion callback.
    fn reset(&mut self) -> Result<(), StreamError>;

    /// Unregister buffer `id`. Only valid once the device has returned it.
    fn unprepare_buffer(&mut self, id: BufferId) -> Result<(), StreamError>;

    fn close(&mut self) -> Result<(), StreamError>;
}
