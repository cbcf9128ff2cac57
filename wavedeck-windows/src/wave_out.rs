//! WinMM playback device (`waveOut*`).

use std::collections::BTreeMap;

use windows::Win32::Media::Audio::{
    waveOutClose, waveOutOpen, waveOutPause, waveOutPrepareHeader, waveOutReset, waveOutRestart,
    waveOutUnprepareHeader, waveOutWrite, CALLBACK_FUNCTION, HWAVEOUT,
};

use wavedeck_core::models::device::{DeviceInfo, StreamDirection};
use wavedeck_core::models::error::StreamError;
use wavedeck_core::models::format::AudioFormat;
use wavedeck_core::processing::buffer_pool::BufferId;
use wavedeck_core::traits::audio_device::{AudioDevice, CompletionCallback};

use crate::completion::{self, CallbackContext, NativeBuffer, WAVEHDR_SIZE, WOM_DONE};
use crate::mm_error::{check, MmError, WAVERR_STILLPLAYING};

/// A `waveOut` endpoint opened with a function callback.
///
/// Output starts as soon as the first header is written, so `start` has
/// nothing to do.
pub struct WaveOutDevice {
    info: DeviceInfo,
    handle: Option<HWAVEOUT>,
    buffers: BTreeMap<BufferId, NativeBuffer>,
    context: Option<Box<CallbackContext>>,
}

// SAFETY: see `WaveInDevice`.
unsafe impl Send for WaveOutDevice {}

unsafe extern "system" fn wave_out_proc(
    _hwo: HWAVEOUT,
    msg: u32,
    instance: usize,
    param1: usize,
    _param2: usize,
) {
    if msg != WOM_DONE || instance == 0 || param1 == 0 {
        return;
    }
    let context = &*(instance as *const CallbackContext);
    context.post(completion::buffer_id(param1 as *const _), Vec::new());
}

impl WaveOutDevice {
    pub(crate) fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            handle: None,
            buffers: BTreeMap::new(),
            context: None,
        }
    }

    fn handle(&self) -> Result<HWAVEOUT, StreamError> {
        self.handle
            .ok_or_else(|| StreamError::InvalidState("waveOut device is not open".into()))
    }
}

impl AudioDevice for WaveOutDevice {
    fn direction(&self) -> StreamDirection {
        StreamDirection::Playback
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn open(&mut self, format: &AudioFormat, on_complete: CompletionCallback) -> Result<(), StreamError> {
        if self.handle.is_some() {
            return Err(StreamError::DeviceOpen(format!("{} is already open", self.info.name)));
        }

        let context = CallbackContext::start("winmm-playback-completions", on_complete)?;
        let wfx = completion::pcm_format(format);
        let mut handle = HWAVEOUT::default();
        let code = unsafe {
            waveOutOpen(
                Some(&mut handle as *mut HWAVEOUT),
                self.info.id,
                &wfx,
                Some(wave_out_proc as usize),
                Some(context.as_instance()),
                CALLBACK_FUNCTION,
            )
        };
        if let Err(e) = check(code, "waveOutOpen") {
            context.shutdown();
            return Err(e.into_stream_error(StreamError::DeviceOpen));
        }

        log::debug!("waveOut device {} opened at {}", self.info.id, format);
        self.handle = Some(handle);
        self.context = Some(context);
        Ok(())
    }

    fn prepare_buffer(&mut self, id: BufferId, capacity: usize) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let mut buffer = NativeBuffer::new(id, capacity);
        let code = unsafe { waveOutPrepareHeader(handle, buffer.header_ptr(), WAVEHDR_SIZE) };
        check(code, "waveOutPrepareHeader")
            .map_err(|e| e.into_stream_error(StreamError::BufferRegistration))?;
        self.buffers.insert(id, buffer);
        Ok(())
    }

    fn submit_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| StreamError::InvalidState(format!("buffer {} is not prepared", id)))?;
        buffer.load(id, data)?;
        let code = unsafe { waveOutWrite(handle, buffer.header_ptr(), WAVEHDR_SIZE) };
        check(code, "waveOutWrite").map_err(|e| e.into_stream_error(StreamError::BufferRegistration))
    }

    fn start(&mut self) -> Result<(), StreamError> {
        self.handle().map(|_| ())
    }

    fn pause(&mut self) -> Result<(), StreamError> {
        let code = unsafe { waveOutPause(self.handle()?) };
        check(code, "waveOutPause").map_err(|e| e.into_stream_error(StreamError::InvalidState))
    }

    fn resume(&mut self) -> Result<(), StreamError> {
        let code = unsafe { waveOutRestart(self.handle()?) };
        check(code, "waveOutRestart").map_err(|e| e.into_stream_error(StreamError::DeviceStart))
    }

    fn reset(&mut self) -> Result<(), StreamError> {
        let code = unsafe { waveOutReset(self.handle()?) };
        check(code, "waveOutReset").map_err(|e| e.into_stream_error(StreamError::InvalidState))
    }

    fn unprepare_buffer(&mut self, id: BufferId) -> Result<(), StreamError> {
        let handle = self.handle()?;
        let Some(mut buffer) = self.buffers.remove(&id) else {
            return Ok(());
        };
        let code = unsafe { waveOutUnprepareHeader(handle, buffer.header_ptr(), WAVEHDR_SIZE) };
        match check(code, "waveOutUnprepareHeader") {
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
        let code = unsafe { waveOutClose(handle) };
        if let Err(e) = check(code, "waveOutClose") {
            self.handle = Some(handle);
            return Err(e.into_stream_error(StreamError::InvalidState));
        }

        if let Some(context) = self.context.take() {
            context.shutdown();
        }
        if !self.buffers.is_empty() {
            log::warn!("waveOut closed with {} buffer(s) still prepared", self.buffers.len());
            self.buffers.clear();
        }
        log::debug!("waveOut device {} closed", self.info.id);
        Ok(())
    }
}

impl Drop for WaveOutDevice {
    fn drop(&mut self) {
        let Ok(handle) = self.handle() else {
            return;
        };
        unsafe {
            let _ = waveOutReset(handle);
            for buffer in self.buffers.values_mut() {
                let _ = waveOutUnprepareHeader(handle, buffer.header_ptr(), WAVEHDR_SIZE);
            }
        }
        self.buffers.clear();
        if let Err(e) = self.close() {
            log::error!("waveOut device {} leaked on drop: {}", self.info.id, e);
            if let Some(context) = self.context.take() {
                std::mem::forget(context);
            }
        }
    }
}
