//! In-process audio device with explicitly driven completions.
//!
//! A `VirtualDevice` behaves like a queued-buffer driver: prepared buffers
//! are queued on submit and handed back through the completion callback.
//! Nothing completes on its own. The paired [`VirtualDeviceHandle`] decides
//! when the "hardware" finishes a buffer, which makes engine behaviour
//! reproducible without audio hardware.
//!
//! ```text
//! engine ──submit──→ VirtualDevice ──queue──→ handle.deliver()/complete_next()
//!    ↑                                               │
//!    └──────────────── completion callback ──────────┘
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::device::{DeviceInfo, StreamDirection};
use crate::models::error::StreamError;
use crate::models::format::AudioFormat;
use crate::processing::buffer_pool::BufferId;
use crate::traits::audio_device::{AudioDevice, CompletionCallback};
use crate::traits::device_directory::DeviceDirectory;

/// Device calls, recorded in order for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    Open,
    Prepare,
    Submit,
    Start,
    Pause,
    Resume,
    Reset,
    Unprepare,
    Close,
}

struct DeviceCore {
    direction: StreamDirection,
    format: Option<AudioFormat>,
    callback: Option<CompletionCallback>,
    // Kept after close so late completions can be simulated.
    last_callback: Option<CompletionCallback>,
    prepared: BTreeMap<BufferId, usize>,
    queue: VecDeque<(BufferId, Vec<u8>)>,
    running: bool,
    paused: bool,
    ops: Vec<DeviceOp>,
    played: Vec<u8>,
    fail_open: bool,
    fail_start: bool,
    fail_submit: bool,
    fail_prepare_at: Option<BufferId>,
    hold_on_reset: bool,
}

impl DeviceCore {
    fn new(direction: StreamDirection) -> Self {
        Self {
            direction,
            format: None,
            callback: None,
            last_callback: None,
            prepared: BTreeMap::new(),
            queue: VecDeque::new(),
            running: false,
            paused: false,
            ops: Vec::new(),
            played: Vec::new(),
            fail_open: false,
            fail_start: false,
            fail_submit: false,
            fail_prepare_at: None,
            hold_on_reset: false,
        }
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.format.is_none() {
            return Err(StreamError::InvalidState("virtual device is not open".into()));
        }
        Ok(())
    }
}

/// A virtual capture or playback endpoint.
pub struct VirtualDevice {
    info: DeviceInfo,
    core: Arc<Mutex<DeviceCore>>,
}

impl AudioDevice for VirtualDevice {
    fn direction(&self) -> StreamDirection {
        self.info.direction
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn open(&mut self, format: &AudioFormat, on_complete: CompletionCallback) -> Result<(), StreamError> {
        let mut core = self.core.lock();
        core.ops.push(DeviceOp::Open);
        if core.fail_open {
            return Err(StreamError::DeviceOpen(format!("{} is busy", self.info.name)));
        }
        if core.format.is_some() {
            return Err(StreamError::DeviceOpen(format!("{} is already open", self.info.name)));
        }
        core.format = Some(*format);
        core.last_callback = Some(Arc::clone(&on_complete));
        core.callback = Some(on_complete);
        core.prepared.clear();
        core.queue.clear();
        core.played.clear();
        core.running = false;
        core.paused = false;
        Ok(())
    }

    fn prepare_buffer(&mut self, id: BufferId, capacity: usize) -> Result<(), StreamError> {
        let mut core = self.core.lock();
        core.ops.push(DeviceOp::Prepare);
        core.ensure_open()?;
        if core.fail_prepare_at == Some(id) {
            return Err(StreamError::BufferRegistration(format!(
                "virtual device rejected buffer {}",
                id
            )));
        }
        core.prepared.insert(id, capacity);
        Ok(())
    }

    fn submit_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), StreamError> {
        let mut core = self.core.lock();
        core.ops.push(DeviceOp::Submit);
        core.ensure_open()?;
        if core.fail_submit {
            return Err(StreamError::BufferRegistration(format!(
                "virtual device refused to queue buffer {}",
                id
            )));
        }
        if !core.prepared.contains_key(&id) {
            return Err(StreamError::InvalidState(format!("buffer {} is not prepared", id)));
        }
        if core.queue.iter().any(|(queued, _)| *queued == id) {
            return Err(StreamError::InvalidState(format!("buffer {} is already queued", id)));
        }
        core.queue.push_back((id, data.to_vec()));
        // Output devices start rendering as soon as something is queued.
        if core.direction == StreamDirection::Playback && !core.paused {
            core.running = true;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), StreamError> {
        let mut core = self.core.lock();
        core.ops.push(DeviceOp::Start);
        core.ensure_open()?;
        if core.fail_start {
            return Err(StreamError::DeviceStart(format!("{} refused to start", self.info.name)));
        }
        core.running = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), StreamError> {
        let mut core = self.core.lock();
        core.ops.push(DeviceOp::Pause);
        core.ensure_open()?;
        core.running = false;
        core.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), StreamError> {
        let mut core = self.core.lock();
        core.ops.push(DeviceOp::Resume);
        core.ensure_open()?;
        core.running = true;
        core.paused = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), StreamError> {
        let (returned, callback) = {
            let mut core = self.core.lock();
            core.ops.push(DeviceOp::Reset);
            core.ensure_open()?;
            core.running = false;
            if core.hold_on_reset {
                return Ok(());
            }
            let returned: Vec<BufferId> = core.queue.drain(..).map(|(id, _)| id).collect();
            (returned, core.callback.clone())
        };

        // Like a real driver, pending buffers come back through the callback.
        if let Some(callback) = callback {
            for id in returned {
                callback(id, &[]);
            }
        }
        Ok(())
    }

    fn unprepare_buffer(&mut self, id: BufferId) -> Result<(), StreamError> {
        let mut core = self.core.lock();
        core.ops.push(DeviceOp::Unprepare);
        if core.queue.iter().any(|(queued, _)| *queued == id) {
            return Err(StreamError::OwnershipViolation(id));
        }
        core.prepared.remove(&id);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let mut core = self.core.lock();
        core.ops.push(DeviceOp::Close);
        if !core.queue.is_empty() {
            return Err(StreamError::InvalidState(format!(
                "{} buffer(s) still queued",
                core.queue.len()
            )));
        }
        core.format = None;
        core.callback = None;
        core.running = false;
        Ok(())
    }
}

/// Test-bench side of a virtual endpoint.
#[derive(Clone)]
pub struct VirtualDeviceHandle {
    core: Arc<Mutex<DeviceCore>>,
}

impl VirtualDeviceHandle {
    /// Finish the oldest queued capture buffer with `recorded` bytes.
    ///
    /// Returns the completed buffer id, or `None` if the device is stopped
    /// or has nothing queued.
    pub fn deliver(&self, recorded: &[u8]) -> Option<BufferId> {
        let (id, callback) = {
            let mut core = self.core.lock();
            if !core.running {
                return None;
            }
            let (id, _) = core.queue.pop_front()?;
            (id, core.callback.clone()?)
        };
        callback(id, recorded);
        Some(id)
    }

    /// Finish the oldest queued capture buffer even if the stream is
    /// stopped, the way an input driver marks its partially filled buffer
    /// done when recording is paused.
    pub fn flush_current(&self, recorded: &[u8]) -> Option<BufferId> {
        let (id, callback) = {
            let mut core = self.core.lock();
            let (id, _) = core.queue.pop_front()?;
            (id, core.callback.clone()?)
        };
        callback(id, recorded);
        Some(id)
    }

    /// Finish the oldest queued playback buffer.
    ///
    /// Returns the buffer id and the bytes it carried, or `None` if the
    /// device is paused or has nothing queued.
    pub fn complete_next(&self) -> Option<(BufferId, Vec<u8>)> {
        let (id, data, callback) = {
            let mut core = self.core.lock();
            if !core.running {
                return None;
            }
            let (id, data) = core.queue.pop_front()?;
            core.played.extend_from_slice(&data);
            (id, data, core.callback.clone()?)
        };
        callback(id, &[]);
        Some((id, data))
    }

    /// Invoke the most recent completion callback directly, as a driver
    /// racing a shutdown would. Works even after the device was closed.
    pub fn inject_completion(&self, id: BufferId, data: &[u8]) -> bool {
        let callback = self.core.lock().last_callback.clone();
        match callback {
            Some(callback) => {
                callback(id, data);
                true
            }
            None => false,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.core.lock().queue.len()
    }

    pub fn queued_ids(&self) -> Vec<BufferId> {
        self.core.lock().queue.iter().map(|(id, _)| *id).collect()
    }

    /// Ids currently registered with the device.
    pub fn prepared(&self) -> Vec<BufferId> {
        self.core.lock().prepared.keys().copied().collect()
    }

    pub fn is_open(&self) -> bool {
        self.core.lock().format.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.core.lock().running
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.core.lock().format
    }

    /// Every byte completed by `complete_next` since the last open.
    pub fn played(&self) -> Vec<u8> {
        self.core.lock().played.clone()
    }

    pub fn ops(&self) -> Vec<DeviceOp> {
        self.core.lock().ops.clone()
    }

    pub fn count_ops(&self, op: DeviceOp) -> usize {
        self.core.lock().ops.iter().filter(|o| **o == op).count()
    }

    pub fn fail_open(&self, fail: bool) {
        self.core.lock().fail_open = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.core.lock().fail_start = fail;
    }

    pub fn fail_submit(&self, fail: bool) {
        self.core.lock().fail_submit = fail;
    }

    pub fn fail_prepare_at(&self, id: BufferId) {
        self.core.lock().fail_prepare_at = Some(id);
    }

    /// Make `reset` keep its queued buffers instead of returning them, like
    /// a wedged driver.
    pub fn hold_on_reset(&self, hold: bool) {
        self.core.lock().hold_on_reset = hold;
    }
}

/// Directory of virtual endpoints.
///
/// All capture ids share one simulated input core and all playback ids one
/// output core, reachable through [`capture_handle`](Self::capture_handle)
/// and [`playback_handle`](Self::playback_handle).
#[derive(Clone)]
pub struct VirtualDirectory {
    capture_names: Vec<String>,
    playback_names: Vec<String>,
    capture: Arc<Mutex<DeviceCore>>,
    playback: Arc<Mutex<DeviceCore>>,
}

impl VirtualDirectory {
    pub fn new() -> Self {
        Self::with_devices(vec!["Virtual Microphone".into()], vec!["Virtual Speakers".into()])
    }

    pub fn with_devices(capture_names: Vec<String>, playback_names: Vec<String>) -> Self {
        Self {
            capture_names,
            playback_names,
            capture: Arc::new(Mutex::new(DeviceCore::new(StreamDirection::Capture))),
            playback: Arc::new(Mutex::new(DeviceCore::new(StreamDirection::Playback))),
        }
    }

    pub fn capture_handle(&self) -> VirtualDeviceHandle {
        VirtualDeviceHandle {
            core: Arc::clone(&self.capture),
        }
    }

    pub fn playback_handle(&self) -> VirtualDeviceHandle {
        VirtualDeviceHandle {
            core: Arc::clone(&self.playback),
        }
    }

    fn list(names: &[String], direction: StreamDirection) -> Vec<DeviceInfo> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceInfo {
                id: i as u32,
                name: name.clone(),
                direction,
                is_default: i == 0,
            })
            .collect()
    }

    fn open(
        names: &[String],
        core: &Arc<Mutex<DeviceCore>>,
        direction: StreamDirection,
        id: u32,
    ) -> Result<VirtualDevice, StreamError> {
        let name = names
            .get(id as usize)
            .ok_or(StreamError::DeviceNotAvailable)?;
        Ok(VirtualDevice {
            info: DeviceInfo {
                id,
                name: name.clone(),
                direction,
                is_default: id == 0,
            },
            core: Arc::clone(core),
        })
    }
}

impl Default for VirtualDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDirectory for VirtualDirectory {
    type Capture = VirtualDevice;
    type Playback = VirtualDevice;

    fn capture_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        Ok(Self::list(&self.capture_names, StreamDirection::Capture))
    }

    fn playback_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        Ok(Self::list(&self.playback_names, StreamDirection::Playback))
    }

    fn open_capture(&self, id: u32) -> Result<VirtualDevice, StreamError> {
        Self::open(&self.capture_names, &self.capture, StreamDirection::Capture, id)
    }

    fn open_playback(&self, id: u32) -> Result<VirtualDevice, StreamError> {
        Self::open(&self.playback_names, &self.playback, StreamDirection::Playback, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lists_devices_with_first_as_default() {
        let directory = VirtualDirectory::with_devices(
            vec!["Mic A".into(), "Mic B".into()],
            vec!["Speakers".into()],
        );
        let captures = directory.capture_devices().unwrap();
        assert_eq!(captures.len(), 2);
        assert!(captures[0].is_default);
        assert_eq!(captures[1].name, "Mic B");
        assert_eq!(captures[1].direction, StreamDirection::Capture);

        assert!(matches!(directory.open_capture(5), Err(StreamError::DeviceNotAvailable)));
    }

    #[test]
    fn reset_returns_queued_buffers_through_callback() {
        let directory = VirtualDirectory::new();
        let returned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&returned);

        let mut device = directory.open_capture(0).unwrap();
        device
            .open(
                &AudioFormat::new(1, 16, 8000),
                Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        device.prepare_buffer(0, 8).unwrap();
        device.prepare_buffer(1, 8).unwrap();
        device.submit_buffer(0, &[]).unwrap();
        device.submit_buffer(1, &[]).unwrap();

        device.reset().unwrap();

        assert_eq!(returned.load(Ordering::SeqCst), 2);
        assert_eq!(directory.capture_handle().queued_len(), 0);
    }

    #[test]
    fn stopped_capture_device_delivers_nothing() {
        let directory = VirtualDirectory::new();
        let mut device = directory.open_capture(0).unwrap();
        device.open(&AudioFormat::new(1, 8, 8000), Arc::new(|_, _| {})).unwrap();
        device.prepare_buffer(0, 8).unwrap();
        device.submit_buffer(0, &[]).unwrap();

        let handle = directory.capture_handle();
        assert_eq!(handle.deliver(&[1, 2]), None);
        device.start().unwrap();
        assert_eq!(handle.deliver(&[1, 2]), Some(0));
    }

    #[test]
    fn close_with_queued_buffers_fails() {
        let directory = VirtualDirectory::new();
        let mut device = directory.open_playback(0).unwrap();
        device.open(&AudioFormat::new(2, 16, 44100), Arc::new(|_, _| {})).unwrap();
        device.prepare_buffer(0, 4).unwrap();
        device.submit_buffer(0, &[1, 2, 3, 4]).unwrap();

        assert!(device.close().is_err());
        assert!(device.unprepare_buffer(0).is_err());

        let handle = directory.playback_handle();
        assert_eq!(handle.complete_next(), Some((0, vec![1, 2, 3, 4])));
        assert!(device.unprepare_buffer(0).is_ok());
        assert!(device.close().is_ok());
        assert!(!handle.is_open());
    }
}
