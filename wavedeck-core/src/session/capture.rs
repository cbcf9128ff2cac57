use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::config::EngineConfig;
use crate::models::error::StreamError;
use crate::models::format::AudioFormat;
use crate::models::recording_result::{CaptureSummary, RecordingResult};
use crate::models::state::CaptureState;
use crate::processing::buffer_pool::{BufferId, BufferPool, Ownership};
use crate::session::transport::TransportController;
use crate::storage::accumulation::AccumulationStore;
use crate::traits::audio_device::{AudioDevice, CompletionCallback};
use crate::traits::device_directory::DeviceDirectory;
use crate::traits::stream_delegate::StreamDelegate;

/// Everything the completion callback and the controller both touch.
///
/// The callback's check-then-act (state test, reclaim, append, resubmit)
/// runs entirely under this lock.
struct CaptureInner {
    state: CaptureState,
    pool: BufferPool,
    store: AccumulationStore,
    transport: TransportController,
    format: Option<AudioFormat>,
}

struct CaptureShared<C: AudioDevice> {
    inner: Mutex<CaptureInner>,
    // Always locked after `inner`, never before it.
    device: Mutex<Option<C>>,
    drained: Condvar,
    delegate: Mutex<Option<Arc<dyn StreamDelegate>>>,
    config: EngineConfig,
}

/// Records from a capture device into an in-memory WAV image.
///
/// ```text
/// device ──completion──→ reclaim ──append──→ AccumulationStore
///   ↑                       │                      │
///   └──── resubmit ─────────┘          save_to_file() (controller)
/// ```
///
/// A fixed set of buffers circulates between the engine and the device.
/// Each completion appends the recorded bytes and hands the same buffer
/// straight back while the engine is capturing. `stop()` switches to
/// draining first, so completions racing the teardown are still recorded
/// but never resubmitted.
pub struct CaptureEngine<D: DeviceDirectory> {
    directory: Arc<D>,
    shared: Arc<CaptureShared<D::Capture>>,
}

impl<D: DeviceDirectory> CaptureEngine<D> {
    pub fn new(directory: Arc<D>, config: EngineConfig) -> Result<Self, StreamError> {
        config.validate().map_err(StreamError::InvalidState)?;
        Ok(Self {
            directory,
            shared: Arc::new(CaptureShared {
                inner: Mutex::new(CaptureInner {
                    state: CaptureState::Closed,
                    pool: BufferPool::new(),
                    store: AccumulationStore::new(),
                    transport: TransportController::new(),
                    format: None,
                }),
                device: Mutex::new(None),
                drained: Condvar::new(),
                delegate: Mutex::new(None),
                config,
            }),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn StreamDelegate>) {
        *self.shared.delegate.lock() = Some(delegate);
    }

    pub fn state(&self) -> CaptureState {
        self.shared.inner.lock().state
    }

    /// Pause-exclusive time since `start`.
    pub fn elapsed(&self) -> Duration {
        self.shared.inner.lock().transport.elapsed()
    }

    /// Format of the current or last recording.
    pub fn format(&self) -> Option<AudioFormat> {
        self.shared.inner.lock().format
    }

    /// Size of the accumulation store, placeholder header included.
    pub fn accumulated_len(&self) -> usize {
        self.shared.inner.lock().store.len()
    }

    /// Audio bytes recorded so far, header excluded.
    pub fn recorded_bytes(&self) -> u64 {
        self.shared.inner.lock().store.audio_len()
    }

    /// Open capture device `device_id` and start recording.
    ///
    /// Any previously accumulated (unsaved) recording is discarded. On
    /// failure the engine is left closed with the device released.
    pub fn start(&self, format: AudioFormat, device_id: u32) -> Result<(), StreamError> {
        format.validate()?;
        let shared = &self.shared;

        let mut inner = shared.inner.lock();
        if !inner.state.is_closed() {
            return Err(StreamError::InvalidState(format!(
                "capture is already {:?}",
                inner.state
            )));
        }

        let mut device = self.directory.open_capture(device_id)?;
        device.open(&format, Self::completion_callback(shared))?;
        log::info!("Opened capture device {} at {}", device.device_info().name, format);

        let buffer_count = shared.config.capture_buffer_count;
        let buffer_size = shared.config.buffer_size_for(&format);
        inner.pool = BufferPool::new();
        inner.format = Some(format);

        let armed = {
            let mut slot = shared.device.lock();
            let device = slot.insert(device);
            Self::arm(&mut inner, device, buffer_count, buffer_size, &format, &shared.config)
        };

        match armed {
            Ok(()) => {
                inner.transport.start();
                drop(inner);
                log::info!(
                    "Capture started with {} buffers of {} bytes",
                    buffer_count,
                    buffer_size
                );
                shared.notify_state(CaptureState::Capturing);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start capture: {}", e);
                inner.state = CaptureState::Draining;
                drop(inner);
                if let Err(teardown) = shared.drain_and_close() {
                    log::warn!("Capture teardown after failed start: {}", teardown);
                }
                Err(e)
            }
        }
    }

    /// Register and queue every buffer, reserve the header, start the input.
    fn arm(
        inner: &mut CaptureInner,
        device: &mut D::Capture,
        buffer_count: usize,
        buffer_size: usize,
        format: &AudioFormat,
        config: &EngineConfig,
    ) -> Result<(), StreamError> {
        inner.pool.allocate(buffer_count, buffer_size, device)?;
        for id in inner.pool.ids_with(Ownership::Free) {
            inner.pool.submit(id, device)?;
        }
        inner.store.begin(*format, config.store_reserve_bytes);
        inner.state = CaptureState::Capturing;
        device.start()
    }

    /// Stop the input stream, keeping buffers queued.
    pub fn pause(&self) -> Result<(), StreamError> {
        {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_capturing() {
                return Err(StreamError::InvalidState(format!(
                    "cannot pause capture while {:?}",
                    inner.state
                )));
            }
            // Flip first: a buffer the driver flushes during pause must not
            // be handed straight back.
            inner.state = CaptureState::PausedCapturing;
            inner.transport.pause();
        }

        let paused = match self.shared.device.lock().as_mut() {
            Some(device) => device.pause(),
            None => Err(StreamError::DeviceNotAvailable),
        };
        if let Err(e) = paused {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_paused() {
                inner.state = CaptureState::Capturing;
                inner.transport.resume();
            }
            return Err(e);
        }

        self.shared.notify_state(CaptureState::PausedCapturing);
        Ok(())
    }

    /// Requeue buffers completed during the pause and restart the input.
    pub fn resume(&self) -> Result<(), StreamError> {
        {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_paused() {
                return Err(StreamError::InvalidState(format!(
                    "cannot resume capture while {:?}",
                    inner.state
                )));
            }
            let mut slot = self.shared.device.lock();
            let device = slot.as_mut().ok_or(StreamError::DeviceNotAvailable)?;
            let ready = inner.pool.ids_with(Ownership::ReadyForReuse);
            for id in &ready {
                inner.pool.submit(*id, device)?;
            }
            device.resume()?;
            inner.state = CaptureState::Capturing;
            inner.transport.resume();
            log::debug!("Capture resumed, {} buffer(s) requeued", ready.len());
        }
        self.shared.notify_state(CaptureState::Capturing);
        Ok(())
    }

    /// Stop recording and release the device.
    ///
    /// Returns `None` if the engine was not recording. The accumulated data
    /// stays available for [`save_to_file`](Self::save_to_file).
    pub fn stop(&self) -> Result<Option<CaptureSummary>, StreamError> {
        let elapsed = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_open() {
                return Ok(None);
            }
            inner.state = CaptureState::Draining;
            inner.transport.elapsed()
        };
        self.shared.notify_state(CaptureState::Draining);

        let result = self.shared.drain_and_close();
        let summary = CaptureSummary {
            audio_bytes: self.recorded_bytes(),
            elapsed_ms: elapsed.as_millis() as u64,
        };
        log::info!(
            "Capture stopped: {} bytes in {} ms",
            summary.audio_bytes,
            summary.elapsed_ms
        );
        result.map(|()| Some(summary))
    }

    /// Write the accumulated recording to `path` as a finalized WAV file.
    pub fn save_to_file(&self, path: &Path) -> Result<RecordingResult, StreamError> {
        let inner = self.shared.inner.lock();
        if !inner.state.is_closed() {
            return Err(StreamError::InvalidState("stop capture before saving".into()));
        }
        inner
            .store
            .save_to_file(path, self.shared.config.write_metadata)
    }

    /// Drop the accumulated recording.
    pub fn clear(&self) -> Result<(), StreamError> {
        let mut inner = self.shared.inner.lock();
        if !inner.state.is_closed() {
            return Err(StreamError::InvalidState("stop capture before clearing".into()));
        }
        inner.store.clear();
        Ok(())
    }

    fn completion_callback(shared: &Arc<CaptureShared<D::Capture>>) -> CompletionCallback {
        let weak: Weak<CaptureShared<D::Capture>> = Arc::downgrade(shared);
        Arc::new(move |id: BufferId, recorded: &[u8]| {
            if let Some(shared) = weak.upgrade() {
                shared.on_complete(id, recorded);
            }
        })
    }
}

impl<C: AudioDevice> CaptureShared<C> {
    fn on_complete(&self, id: BufferId, recorded: &[u8]) {
        let failure = {
            let mut inner = self.inner.lock();
            if inner.state.is_closed() {
                log::debug!("Ignoring completion of buffer {} after close", id);
                return;
            }

            let copied = match inner.pool.reclaim(id, recorded) {
                Ok(copied) => copied,
                Err(e) => {
                    log::warn!("Ignoring spurious completion: {}", e);
                    return;
                }
            };
            inner.store.append(&recorded[..copied]);
            // The audio now lives in the store; requeue the buffer empty.
            if let Err(e) = inner.pool.discard_contents(id) {
                log::warn!("Failed to empty capture buffer {}: {}", id, e);
            }

            match inner.state {
                CaptureState::Capturing => {
                    let mut device = self.device.lock();
                    match device.as_mut() {
                        Some(device) => inner.pool.submit(id, device).err(),
                        None => Some(StreamError::DeviceNotAvailable),
                    }
                }
                CaptureState::Draining => {
                    if inner.pool.queued_count() == 0 {
                        self.drained.notify_all();
                    }
                    None
                }
                // Held until resume().
                _ => None,
            }
        };

        if let Some(e) = failure {
            log::error!("Failed to requeue capture buffer {}: {}", id, e);
            if let Some(delegate) = self.delegate() {
                delegate.on_error(&e);
            }
        }
    }

    /// Reset the device, wait for every buffer to come back, release and
    /// close. Expects the state to be `Draining` already.
    fn drain_and_close(&self) -> Result<(), StreamError> {
        let mut first_error: Option<StreamError> = None;

        // Completions fired synchronously by reset() take `inner`, so it
        // must not be held here.
        if let Some(device) = self.device.lock().as_mut() {
            if let Err(e) = device.reset() {
                log::warn!("Capture device reset failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        let mut inner = self.inner.lock();
        let deadline = Instant::now() + self.config.drain_timeout();
        while inner.pool.queued_count() > 0 {
            if self.drained.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }

        let stuck = inner.pool.queued_count();
        if let Some(mut device) = self.device.lock().take() {
            if stuck == 0 {
                if let Err(e) = inner.pool.release_all(&mut device) {
                    log::error!("Failed to release capture buffers: {}", e);
                    first_error.get_or_insert(e);
                }
            } else {
                log::error!(
                    "{} capture buffer(s) not returned within {:?}; leaving them registered",
                    stuck,
                    self.config.drain_timeout()
                );
                first_error.get_or_insert(StreamError::DrainTimeout(stuck));
            }
            if let Err(e) = device.close() {
                log::warn!("Capture device close failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        inner.state = CaptureState::Closed;
        inner.transport.stop();
        drop(inner);
        self.notify_state(CaptureState::Closed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn delegate(&self) -> Option<Arc<dyn StreamDelegate>> {
        self.delegate.lock().clone()
    }

    fn notify_state(&self, state: CaptureState) {
        if let Some(delegate) = self.delegate() {
            delegate.on_capture_state_changed(state);
        }
    }
}

impl<D: DeviceDirectory> Drop for CaptureEngine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Capture stop on drop failed: {}", e);
        }
    }
}
