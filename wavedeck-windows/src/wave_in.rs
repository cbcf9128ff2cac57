//! WinMM capture device (`waveIn*`).

use std::collections::BTreeMap;

use windows::Win32::Media::Audio::{
    waveInAddBuffer, waveInClose, waveInOpen, waveInPrepareHeader, waveInReset, waveInStart,
    waveInStop, waveInUnprepareHeader, CALLBACK_FUNCTION, HWAVEIN,
};

use wavedeck_core::models::device::{DeviceInfo, StreamDirection};
use wavedeck_core::models::error::StreamError;
use wavedeck_core::models::format::AudioFormat;
use wavedeck_core::processing::buffer_pool::BufferId;
use wavedeck_core::traits::audio_device::{AudioDevice, CompletionCallback};

use crate::completion::{self, CallbackContext, NativeBuffer, WAVEHDR_SIZE, WIM_DATA};
use crate::mm_error::{check, MmError, WAVERR_STILLPLAYING};

/// A `waveIn` endpoint opened with a function callback.
///
/// Recorded headers are copied out in the WinMM callback and handed to the
/// engine from a dispatcher thread.
pub struct WaveInDevice {
    info: DeviceInfo,
    handle: Option<HWAVEIN>,
    buffers: BTreeMap<BufferId, NativeBuffer>,
    context: Option<Box<CallbackContext>>,
}

// SAFETY: the handle and the header pointers are only used through
// `&mut self`; the driver's own accesses are synchronized by WinMM.
unsafe impl Send for WaveInDevice {}

unsafe extern "system" fn wave_in_proc(
    _hwi: HWAVEIN,
    msg: u32,
    instance: usize,
    param1: usize,
    _param2: usize,
) {
    if msg != WIM_DATA || instance == 0 || param1 == 0 {
        return;
    }
    let context = &*(instance as *const CallbackContext);
    let (id, data) = completion::recorded(param1 as *const _);
    context.post(id, data);
}

impl WaveInDevice {
    pub(crate) fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            handle: None,
            buffers: BTreeMap::new(),
            context: None,
        }
    }

    fn handle(&self) -> Result<HWAVEIN, StreamError> {
        self.handle
            .ok_or_else(|| StreamError::InvalidState("waveIn device is not open".into()))
    }

    fn buffer(&mut self, id: BufferId) -> Result<&mut NativeBuffer, StreamError> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| StreamError::InvalidState(format!("buffer {} is not prepared", id)))
    }
}

impl AudioDevice for WaveInDevice {
    fn direction(&self) -> StreamDirection {
        StreamDirection::Capture
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn open(&mut self, format: &AudioFormat, on_complete: CompletionCallback) -> Result<(), StreamError> {
        if self.handle.is_some() {
            return Err(StreamError::DeviceOpen(format!("{} is already open", self.info.name)));
        }

        let context = CallbackContext::start("winmm-capture-completions", on_complete)?;
        let wfx = completion::pcm_format(format);
        let mut handle = HWAVEIN::default();
        let code = unsafe {
            waveInOpen(
                Some(&mut handle as *mut HWAVEIN),
                self.info.id,
                &wfx,
                Some(wave_in_proc as usize),
                Some(context.as_instance()),
                CALLBACK_FUNCTION,
            )
        };
        if let Err(e) = check(code, "waveInOpen") {
            context.shutdown();
            return Err(e.into_stream_error(StreamError::DeviceOpen));
        }

        log::debug!("waveIn device {} opened at {}", self.info.id, format);
        self.handle = Some(handle);
        self.context = Some(context);
        Ok(())
    }

    fn prepare_buffer(&mut self, id: BufferId, capacity: usize) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let mut buffer = NativeBuffer::new(id, capacity);
        let code = unsafe { waveInPrepareHeader(handle, buffer.header_ptr(), WAVEHDR_SIZE) };
        check(code, "waveInPrepareHeader")
            .map_err(|e| e.into_stream_error(StreamError::BufferRegistration))?;
        self.buffers.insert(id, buffer);
        Ok(())
    }

    fn submit_buffer(&mut self, id: BufferId, _data: &[u8]) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let buffer = self.buffer(id)?;
        buffer.rearm();
        let code = unsafe { waveInAddBuffer(handle, buffer.header_ptr(), WAVEHDR_SIZE) };
        check(code, "waveInAddBuffer").map_err(|e| e.into_stream_error(StreamError::BufferRegistration))
    }

    fn start(&mut self) -> Result<(), StreamError> {
        let code = unsafe { waveInStart(self.handle()?) };
        check(code, "waveInStart").map_err(|e| e.into_stream_error(StreamError::DeviceStart))
    }

    fn pause(&mut self) -> Result<(), StreamError> {
        let code = unsafe { waveInStop(self.handle()?) };
        check(code, "waveInStop").map_err(|e| e.into_stream_error(StreamError::InvalidState))
    }

    fn resume(&mut self) -> Result<(), StreamError> {
        let code = unsafe { waveInStart(self.handle()?) };
        check(code, "waveInStart").map_err(|e| e.into_stream_error(StreamError::DeviceStart))
    }

    fn reset(&mut self) -> Result<(), StreamError> {
        let code = unsafe { waveInReset(self.handle()?) };
        check(code, "waveInReset").map_err(|e| e.into_stream_error(StreamError::InvalidState))
    }

    fn unprepare_buffer(&mut self, id: BufferId) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let Some(mut buffer) = self.buffers.remove(&id) else {
            return Ok(());
        };
        let code = unsafe { waveInUnprepareHeader(handle, buffer.header_ptr(), WAVEHDR_SIZE) };
        match check(code, "waveInUnprepareHeader") {
            Ok(()) => Ok(()),
            Err(MmError {
                code: WAVERR_STILLPLAYING,
                ..
            }) => {
                self.buffers.insert(id, buffer);
                Err(StreamError::OwnershipViolation(id))
            }
            Err(e) => Err(e.into_stream_error(StreamError::BufferRegistration)),
        }
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let code = unsafe { waveInClose(handle) };
        if let Err(e) = check(code, "waveInClose") {
            self.handle = Some(handle);
            return Err(e.into_stream_error(StreamError::InvalidState));
        }

        // No callbacks arrive once waveInClose has returned.
        if let Some(context) = self.context.take() {
            context.shutdown();
        }
        if !self.buffers.is_empty() {
            log::warn!("waveIn closed with {} buffer(s) still prepared", self.buffers.len());
            self.buffers.clear();
        }
        log::debug!("waveIn device {} closed", self.info.id);
        Ok(())
    }
}

impl Drop for WaveInDevice {
    fn drop(&mut self) {
        let Ok(handle) = self.handle() else {
            return;
        };
        unsafe {
            let _ = waveInReset(handle);
            for buffer in self.buffers.values_mut() {
                let _ = waveInUnprepareHeader(handle, buffer.header_ptr(), WAVEHDR_SIZE);
            }
        }
        self.buffers.clear();
        if let Err(e) = self.close() {
            log::error!("waveIn device {} leaked on drop: {}", self.info.id, e);
            // The driver may still call back with this instance pointer.
            if let Some(context) = self.context.take() {
                std::mem::forget(context);
            }
        }
    }
}
