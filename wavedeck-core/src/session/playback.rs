use std::io::{Read, Take};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::config::EngineConfig;
use crate::models::error::StreamError;
use crate::models::format::AudioFormat;
use crate::models::state::{FinishReason, PlaybackState};
use crate::processing::buffer_pool::{BufferId, BufferPool};
use crate::processing::wav_format::{self, WaveHeader};
use crate::session::transport::TransportController;
use crate::storage::source::{self, SourceStream};
use crate::traits::audio_device::{AudioDevice, CompletionCallback};
use crate::traits::device_directory::DeviceDirectory;
use crate::traits::stream_delegate::StreamDelegate;

/// Playback always double-buffers.
pub const PLAYBACK_BUFFER_COUNT: usize = 2;

struct PlaybackInner {
    state: PlaybackState,
    pool: BufferPool,
    // Bounded to the declared data size so trailing chunks are never played.
    source: Option<Take<Box<dyn SourceStream>>>,
    transport: TransportController,
    format: Option<AudioFormat>,
    total: Duration,
}

struct PlaybackShared<P: AudioDevice> {
    inner: Mutex<PlaybackInner>,
    // Always locked after `inner`, never before it.
    device: Mutex<Option<P>>,
    drained: Condvar,
    // Wakes the monitor early when the stream is finishing or stopping.
    wake: Condvar,
    delegate: Mutex<Option<Arc<dyn StreamDelegate>>>,
    config: EngineConfig,
}

/// Streams a WAV source to a playback device through two rotating buffers.
///
/// ```text
/// source ──fill──→ [buf 0] ──submit──→ device ──completion──┐
///        ──fill──→ [buf 1] ──submit──→                      │
///          ↑                                                │
///          └──────────── refill, resubmit ──────────────────┘
/// ```
///
/// Each completion refills the returned buffer and queues it again. A
/// refill that reads nothing retires the buffer; once neither buffer is
/// queued the engine enters `Finishing` and the monitor thread tears the
/// stream down, since device calls are not allowed from the completion
/// context. The monitor also stops playback when the remaining time, as
/// computed from the header, reaches zero.
pub struct PlaybackEngine<D: DeviceDirectory> {
    directory: Arc<D>,
    shared: Arc<PlaybackShared<D::Playback>>,
    monitor: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<D: DeviceDirectory> PlaybackEngine<D> {
    pub fn new(directory: Arc<D>, config: EngineConfig) -> Result<Self, StreamError> {
        config.validate().map_err(StreamError::InvalidState)?;
        Ok(Self {
            directory,
            shared: Arc::new(PlaybackShared {
                inner: Mutex::new(PlaybackInner {
                    state: PlaybackState::Closed,
                    pool: BufferPool::new(),
                    source: None,
                    transport: TransportController::new(),
                    format: None,
                    total: Duration::ZERO,
                }),
                device: Mutex::new(None),
                drained: Condvar::new(),
                wake: Condvar::new(),
                delegate: Mutex::new(None),
                config,
            }),
            monitor: Mutex::new(None),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn StreamDelegate>) {
        *self.shared.delegate.lock() = Some(delegate);
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().state
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.shared.inner.lock().format
    }

    /// Playing time of the current source, from its header.
    pub fn total_duration(&self) -> Duration {
        self.shared.inner.lock().total
    }

    pub fn elapsed(&self) -> Duration {
        self.shared.inner.lock().transport.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        let inner = self.shared.inner.lock();
        inner.transport.remaining_at(inner.total, Instant::now())
    }

    /// Open `path` and play it on device `device_id`.
    pub fn start_file(&self, path: &Path, device_id: u32) -> Result<(), StreamError> {
        self.start(source::open_wave_file(path)?, device_id)
    }

    /// Play a WAV stream on device `device_id`.
    ///
    /// The header is validated before the device is touched. The stream is
    /// owned by the engine until playback ends.
    pub fn start(&self, mut source: Box<dyn SourceStream>, device_id: u32) -> Result<(), StreamError> {
        if !self.state().is_closed() {
            return Err(StreamError::InvalidState(format!(
                "playback is already {:?}",
                self.state()
            )));
        }
        // A monitor left over from a stream that finished by itself.
        self.join_monitor();

        let header = wav_format::parse_header(&mut source)?;
        let data_len = Self::playable_len(&header, source.as_mut())?;
        let format = header.format;

        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if !inner.state.is_closed() {
            return Err(StreamError::InvalidState(format!(
                "playback is already {:?}",
                inner.state
            )));
        }

        let mut device = self.directory.open_playback(device_id)?;
        device.open(&format, Self::completion_callback(shared))?;
        log::info!("Opened playback device {} at {}", device.device_info().name, format);

        let buffer_size = shared.config.buffer_size_for(&format);
        inner.pool = BufferPool::new();
        inner.format = Some(format);
        inner.total = Duration::from_millis(format.duration_ms(data_len));
        inner.source = Some(source.take(data_len));

        let armed = {
            let mut slot = shared.device.lock();
            let device = slot.insert(device);
            Self::arm(&mut inner, device, buffer_size)
        };
        let monitor = armed.and_then(|()| {
            let weak = Arc::downgrade(shared);
            let interval = shared.config.monitor_interval();
            thread::Builder::new()
                .name("playback-monitor".into())
                .spawn(move || monitor_loop(weak, interval))
                .map_err(|e| StreamError::io("failed to spawn playback monitor", e))
        });

        match monitor {
            Ok(handle) => {
                let total = inner.total;
                let state = inner.state;
                inner.transport.start();
                drop(inner);
                *self.monitor.lock() = Some(handle);
                log::info!("Playback started, {:?} of audio", total);
                shared.notify_state(state);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start playback: {}", e);
                inner.state = PlaybackState::Draining;
                drop(inner);
                if let Err(teardown) = shared.drain_and_close() {
                    log::warn!("Playback teardown after failed start: {}", teardown);
                }
                Err(e)
            }
        }
    }

    /// Audio bytes to play. A header whose data size was never patched
    /// (an unfinalized capture) falls back to everything after it.
    fn playable_len(header: &WaveHeader, source: &mut dyn SourceStream) -> Result<u64, StreamError> {
        if header.data_size > 0 {
            return Ok(header.data_size as u64);
        }
        let remaining = wav_format::remaining_len(source)?;
        if remaining > 0 {
            log::warn!(
                "Header declares no audio but {} bytes follow; playing them",
                remaining
            );
        }
        Ok(remaining)
    }

    /// Register both buffers, pre-fill them and queue the non-empty ones.
    fn arm(inner: &mut PlaybackInner, device: &mut D::Playback, buffer_size: usize) -> Result<(), StreamError> {
        inner.pool.allocate(PLAYBACK_BUFFER_COUNT, buffer_size, device)?;

        let source = inner
            .source
            .as_mut()
            .ok_or_else(|| StreamError::InvalidState("no playback source".into()))?;
        let mut filled = Vec::with_capacity(PLAYBACK_BUFFER_COUNT);
        for id in 0..PLAYBACK_BUFFER_COUNT {
            if inner.pool.fill_from(id, source)? > 0 {
                filled.push(id);
            }
        }

        inner.state = PlaybackState::Playing;
        for id in &filled {
            inner.pool.submit(*id, device)?;
        }
        device.start()?;

        if filled.is_empty() {
            log::info!("Playback source holds no audio");
            inner.state = PlaybackState::Finishing;
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<(), StreamError> {
        {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_playing() {
                return Err(StreamError::InvalidState(format!(
                    "cannot pause playback while {:?}",
                    inner.state
                )));
            }
            inner.state = PlaybackState::PausedPlaying;
            inner.transport.pause();
        }

        let paused = match self.shared.device.lock().as_mut() {
            Some(device) => device.pause(),
            None => Err(StreamError::DeviceNotAvailable),
        };
        if let Err(e) = paused {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_paused() {
                inner.state = PlaybackState::Playing;
                inner.transport.resume();
            }
            return Err(e);
        }

        self.shared.notify_state(PlaybackState::PausedPlaying);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), StreamError> {
        {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_paused() {
                return Err(StreamError::InvalidState(format!(
                    "cannot resume playback while {:?}",
                    inner.state
                )));
            }
            match self.shared.device.lock().as_mut() {
                Some(device) => device.resume()?,
                None => return Err(StreamError::DeviceNotAvailable),
            }
            inner.state = PlaybackState::Playing;
            inner.transport.resume();
        }
        self.shared.notify_state(PlaybackState::Playing);
        Ok(())
    }

    /// Stop playback and release the device. A no-op when nothing plays.
    pub fn stop(&self) -> Result<(), StreamError> {
        let result = self.shared.finish(FinishReason::Stopped);
        self.join_monitor();
        result.map(|_| ())
    }

    fn join_monitor(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Playback monitor thread panicked");
            }
        }
    }

    fn completion_callback(shared: &Arc<PlaybackShared<D::Playback>>) -> CompletionCallback {
        let weak: Weak<PlaybackShared<D::Playback>> = Arc::downgrade(shared);
        Arc::new(move |id: BufferId, _played: &[u8]| {
            if let Some(shared) = weak.upgrade() {
                shared.on_complete(id);
            }
        })
    }
}

/// Self-stop loop run on the `playback-monitor` thread.
///
/// Holds only a weak reference between ticks so a dropped engine is never
/// kept alive by its monitor.
fn monitor_loop<P: AudioDevice>(weak: Weak<PlaybackShared<P>>, interval: Duration) {
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let reason = {
            let mut inner = shared.inner.lock();
            match inner.state {
                PlaybackState::Closed | PlaybackState::Draining => return,
                PlaybackState::Finishing => Some(FinishReason::SourceExhausted),
                PlaybackState::Playing
                    if inner.transport.remaining_at(inner.total, Instant::now()).is_zero() =>
                {
                    Some(FinishReason::DurationElapsed)
                }
                _ => {
                    shared.wake.wait_for(&mut inner, interval);
                    None
                }
            }
        };

        if let Some(reason) = reason {
            log::debug!("Playback monitor stopping stream: {:?}", reason);
            if let Err(e) = shared.finish(reason) {
                log::error!("Playback teardown failed: {}", e);
                if let Some(delegate) = shared.delegate() {
                    delegate.on_error(&e);
                }
            }
            return;
        }
    }
}

impl<P: AudioDevice> PlaybackShared<P> {
    fn on_complete(&self, id: BufferId) {
        let (failure, finishing) = {
            let mut inner = self.inner.lock();
            if inner.state.is_closed() {
                log::debug!("Ignoring completion of buffer {} after close", id);
                return;
            }
            if let Err(e) = inner.pool.reclaim(id, &[]) {
                log::warn!("Ignoring spurious completion: {}", e);
                return;
            }

            if !inner.state.is_streaming() {
                // Finishing or draining: bookkeeping only.
                if inner.pool.queued_count() == 0 {
                    self.drained.notify_all();
                }
                return;
            }

            let PlaybackInner { pool, source, .. } = &mut *inner;
            let refilled = match source.as_mut() {
                Some(source) => pool.fill_from(id, source),
                None => Ok(0),
            };
            let failure = match refilled {
                Ok(0) => None,
                Ok(_) => match self.device.lock().as_mut() {
                    Some(device) => pool.submit(id, device).err(),
                    None => Some(StreamError::DeviceNotAvailable),
                },
                // Treated as the end of the source.
                Err(e) => Some(e),
            };

            let finishing = inner.pool.queued_count() == 0;
            if finishing {
                inner.state = PlaybackState::Finishing;
                self.wake.notify_all();
            }
            (failure, finishing)
        };

        if let Some(e) = failure {
            log::error!("Playback buffer {} could not be refilled: {}", id, e);
            if let Some(delegate) = self.delegate() {
                delegate.on_error(&e);
            }
        }
        if finishing {
            self.notify_state(PlaybackState::Finishing);
        }
    }

    /// Tear the stream down once. Returns `false` if another caller is
    /// already doing so or nothing is playing.
    fn finish(&self, reason: FinishReason) -> Result<bool, StreamError> {
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, PlaybackState::Closed | PlaybackState::Draining) {
                return Ok(false);
            }
            inner.state = PlaybackState::Draining;
            self.wake.notify_all();
        }
        self.notify_state(PlaybackState::Draining);

        let result = self.drain_and_close();
        log::info!("Playback finished: {:?}", reason);
        if let Some(delegate) = self.delegate() {
            delegate.on_playback_finished(reason);
        }
        result.map(|()| true)
    }

    /// Reset the device, wait for both buffers, release and close.
    /// Expects the state to be `Draining` already.
    fn drain_and_close(&self) -> Result<(), StreamError> {
        let mut first_error: Option<StreamError> = None;

        if let Some(device) = self.device.lock().as_mut() {
            if let Err(e) = device.reset() {
                log::warn!("Playback device reset failed: {}", e);
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
                    log::error!("Failed to release playback buffers: {}", e);
                    first_error.get_or_insert(e);
                }
            } else {
                log::error!(
                    "{} playback buffer(s) not returned within {:?}; leaving them registered",
                    stuck,
                    self.config.drain_timeout()
                );
                first_error.get_or_insert(StreamError::DrainTimeout(stuck));
            }
            if let Err(e) = device.close() {
                log::warn!("Playback device close failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        inner.source = None;
        inner.state = PlaybackState::Closed;
        inner.transport.stop();
        drop(inner);
        self.notify_state(PlaybackState::Closed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn delegate(&self) -> Option<Arc<dyn StreamDelegate>> {
        self.delegate.lock().clone()
    }

    fn notify_state(&self, state: PlaybackState) {
        if let Some(delegate) = self.delegate() {
            delegate.on_playback_state_changed(state);
        }
    }
}

impl<D: DeviceDirectory> Drop for PlaybackEngine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Playback stop on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::virtual_device::{DeviceOp, VirtualDeviceHandle, VirtualDirectory};
    use crate::models::state::CaptureState;
    use crate::processing::wav_format::generate_wav_header;
    use std::io::Cursor;

    // 4097 bytes at 100 B/s is about 41 s, far longer than any test runs.
    fn slow_format() -> AudioFormat {
        AudioFormat::new(1, 8, 100)
    }

    fn config(buffer_bytes: usize) -> EngineConfig {
        EngineConfig {
            buffer_bytes: Some(buffer_bytes),
            drain_timeout_ms: 200,
            monitor_interval_ms: 10,
            ..EngineConfig::default()
        }
    }

    fn wav(format: AudioFormat, audio: &[u8]) -> Box<dyn SourceStream> {
        let mut bytes = generate_wav_header(&format, audio.len() as u32).to_vec();
        bytes.extend_from_slice(audio);
        Box::new(Cursor::new(bytes))
    }

    fn engine(buffer_bytes: usize) -> (PlaybackEngine<VirtualDirectory>, VirtualDeviceHandle) {
        let directory = VirtualDirectory::new();
        let speakers = directory.playback_handle();
        let engine = PlaybackEngine::new(Arc::new(directory), config(buffer_bytes)).unwrap();
        (engine, speakers)
    }

    /// Wait for the monitor to stop the stream, then join it.
    fn wait_for_finish(engine: &PlaybackEngine<VirtualDirectory>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !engine.state().is_closed() {
            assert!(Instant::now() < deadline, "playback did not stop");
            thread::sleep(Duration::from_millis(5));
        }
        engine.stop().unwrap();
    }

    /// Fails every read past `limit` bytes.
    struct FailingSource {
        inner: Cursor<Vec<u8>>,
        limit: u64,
    }

    impl Read for FailingSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.inner.position() >= self.limit {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk removed"));
            }
            self.inner.read(buf)
        }
    }

    impl std::io::Seek for FailingSource {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[derive(Default)]
    struct FinishLog {
        reasons: Mutex<Vec<FinishReason>>,
        errors: Mutex<Vec<StreamError>>,
    }

    impl StreamDelegate for FinishLog {
        fn on_capture_state_changed(&self, _state: CaptureState) {}
        fn on_playback_state_changed(&self, _state: PlaybackState) {}
        fn on_error(&self, error: &StreamError) {
            self.errors.lock().push(error.clone());
        }
        fn on_playback_finished(&self, reason: FinishReason) {
            self.reasons.lock().push(reason);
        }
    }

    #[test]
    fn plays_a_source_slightly_larger_than_one_buffer() {
        let (engine, speakers) = engine(4096);
        let log = Arc::new(FinishLog::default());
        engine.set_delegate(log.clone());
        let audio: Vec<u8> = (0..4097u32).map(|i| (i % 251) as u8).collect();

        engine.start(wav(slow_format(), &audio), 0).unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(speakers.queued_len(), 2);

        let (first, data) = speakers.complete_next().unwrap();
        assert_eq!(first, 0);
        assert_eq!(data.len(), 4096);
        // Nothing left to refill buffer 0 with.
        assert_eq!(speakers.queued_len(), 1);

        let (second, data) = speakers.complete_next().unwrap();
        assert_eq!(second, 1);
        assert_eq!(data.len(), 1);

        wait_for_finish(&engine);
        assert_eq!(speakers.played(), audio);
        assert!(!speakers.is_open());
        assert!(speakers.prepared().is_empty());
        assert_eq!(log.reasons.lock().as_slice(), &[FinishReason::SourceExhausted]);
    }

    #[test]
    fn keeps_exactly_two_buffers_queued() {
        let (engine, speakers) = engine(64);
        let audio = vec![7u8; 64 * 10];

        engine.start(wav(slow_format(), &audio), 0).unwrap();
        for _ in 0..6 {
            assert_eq!(speakers.queued_len(), 2);
            speakers.complete_next().unwrap();
        }
        assert_eq!(speakers.queued_len(), 2);

        engine.stop().unwrap();
        assert_eq!(engine.state(), PlaybackState::Closed);
        assert_eq!(speakers.count_ops(DeviceOp::Prepare), 2);
    }

    #[test]
    fn malformed_header_never_opens_the_device() {
        let (engine, speakers) = engine(4096);
        let garbage: Box<dyn SourceStream> = Box::new(Cursor::new(vec![0u8; 100]));

        assert!(matches!(
            engine.start(garbage, 0),
            Err(StreamError::MalformedHeader(_))
        ));
        assert_eq!(speakers.count_ops(DeviceOp::Open), 0);
        assert_eq!(engine.state(), PlaybackState::Closed);
    }

    #[test]
    fn stop_is_idempotent() {
        let (engine, speakers) = engine(64);
        engine.start(wav(slow_format(), &[1u8; 1000]), 0).unwrap();

        engine.stop().unwrap();
        assert_eq!(speakers.count_ops(DeviceOp::Unprepare), 2);
        assert_eq!(speakers.count_ops(DeviceOp::Close), 1);

        engine.stop().unwrap();
        assert_eq!(speakers.count_ops(DeviceOp::Unprepare), 2);
        assert_eq!(speakers.count_ops(DeviceOp::Close), 1);
    }

    #[test]
    fn completion_after_stop_does_not_resubmit() {
        let (engine, speakers) = engine(64);
        engine.start(wav(slow_format(), &[1u8; 1000]), 0).unwrap();
        engine.stop().unwrap();

        let submits = speakers.count_ops(DeviceOp::Submit);
        assert!(speakers.inject_completion(0, &[]));
        assert_eq!(speakers.count_ops(DeviceOp::Submit), submits);
        assert_eq!(engine.state(), PlaybackState::Closed);
    }

    #[test]
    fn stuck_buffers_time_out_and_stay_registered() {
        let (engine, speakers) = engine(64);
        let log = Arc::new(FinishLog::default());
        engine.set_delegate(log.clone());
        speakers.hold_on_reset(true);

        engine.start(wav(slow_format(), &[1u8; 1000]), 0).unwrap();
        let held = speakers.queued_ids();
        assert_eq!(held, vec![0, 1]);

        assert_eq!(engine.stop(), Err(StreamError::DrainTimeout(2)));
        assert_eq!(engine.state(), PlaybackState::Closed);
        assert_eq!(speakers.count_ops(DeviceOp::Unprepare), 0);
        assert_eq!(speakers.count_ops(DeviceOp::Close), 1);
        assert_eq!(speakers.prepared(), held);
        assert_eq!(log.reasons.lock().as_slice(), &[FinishReason::Stopped]);

        let submits = speakers.count_ops(DeviceOp::Submit);
        assert!(speakers.inject_completion(held[0], &[]));
        assert_eq!(speakers.count_ops(DeviceOp::Submit), submits);
        assert_eq!(engine.state(), PlaybackState::Closed);
        assert_eq!(engine.stop(), Ok(()));
    }

    #[test]
    fn stops_when_duration_elapses() {
        let (engine, _speakers) = engine(4096);
        let log = Arc::new(FinishLog::default());
        engine.set_delegate(log.clone());
        // 80 bytes at 8000 B/s: 10 ms.
        engine
            .start(wav(AudioFormat::new(1, 8, 8000), &[0u8; 80]), 0)
            .unwrap();

        wait_for_finish(&engine);
        assert_eq!(log.reasons.lock().as_slice(), &[FinishReason::DurationElapsed]);
    }

    #[test]
    fn unpatched_header_plays_trailing_bytes() {
        let (engine, speakers) = engine(4096);
        let mut bytes = wav_format::header_placeholder(&slow_format()).to_vec();
        bytes.extend_from_slice(&[3u8; 200]);

        engine.start(Box::new(Cursor::new(bytes)), 0).unwrap();
        assert_eq!(engine.total_duration(), Duration::from_secs(2));
        let (_, data) = speakers.complete_next().unwrap();
        assert_eq!(data.len(), 200);
        engine.stop().unwrap();
    }

    #[test]
    fn empty_source_finishes_immediately() {
        let (engine, speakers) = engine(4096);
        engine.start(wav(slow_format(), &[]), 0).unwrap();

        wait_for_finish(&engine);
        assert_eq!(speakers.count_ops(DeviceOp::Submit), 0);
        assert!(!speakers.is_open());
    }

    #[test]
    fn pause_freezes_the_stream() {
        let (engine, speakers) = engine(64);
        engine.start(wav(slow_format(), &[1u8; 1000]), 0).unwrap();

        engine.pause().unwrap();
        assert_eq!(engine.state(), PlaybackState::PausedPlaying);
        assert!(speakers.complete_next().is_none());
        assert!(matches!(engine.pause(), Err(StreamError::InvalidState(_))));

        engine.resume().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert!(speakers.complete_next().is_some());
        assert_eq!(speakers.queued_len(), 2);
    }

    #[test]
    fn second_start_is_rejected_while_playing() {
        let (engine, _speakers) = engine(64);
        engine.start(wav(slow_format(), &[1u8; 1000]), 0).unwrap();
        assert!(matches!(
            engine.start(wav(slow_format(), &[1u8; 10]), 0),
            Err(StreamError::InvalidState(_))
        ));
    }

    #[test]
    fn plays_again_after_finishing() {
        let (engine, speakers) = engine(4096);
        engine.start(wav(slow_format(), &[2u8; 10]), 0).unwrap();
        speakers.complete_next().unwrap();
        wait_for_finish(&engine);

        engine.start(wav(slow_format(), &[4u8; 10]), 0).unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        engine.stop().unwrap();
    }

    #[test]
    fn read_errors_end_the_stream_and_are_reported() {
        let (engine, speakers) = engine(64);
        let log = Arc::new(FinishLog::default());
        engine.set_delegate(log.clone());

        let mut bytes = generate_wav_header(&slow_format(), 500).to_vec();
        bytes.extend_from_slice(&[6u8; 500]);
        let source = FailingSource {
            inner: Cursor::new(bytes),
            limit: 44 + 128,
        };

        engine.start(Box::new(source), 0).unwrap();
        speakers.complete_next().unwrap();
        assert_eq!(speakers.queued_len(), 1);
        speakers.complete_next().unwrap();

        wait_for_finish(&engine);
        assert_eq!(log.errors.lock().len(), 2);
        assert!(matches!(log.errors.lock()[0], StreamError::Io(_)));
        assert_eq!(log.reasons.lock().as_slice(), &[FinishReason::SourceExhausted]);
    }
}
