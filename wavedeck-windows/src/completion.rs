//! Completion plumbing shared by the waveIn and waveOut devices.
//!
//! WinMM forbids calling back into the wave API from its callback, so the
//! callback only copies what it needs and posts it to a dispatcher thread,
//! which invokes the engine's completion callback.
//!
//! ```text
//! WinMM driver ──WIM_DATA/WOM_DONE──→ CallbackContext::post
//!                                           │ mpsc
//!                                           ↓
//!                          dispatcher thread ──→ CompletionCallback
//! ```

use std::mem::size_of;
use std::sync::mpsc::{self, Sender};
use std::thread;

use parking_lot::Mutex;
use windows::core::PSTR;
use windows::Win32::Media::Audio::{WAVEFORMATEX, WAVEHDR};

use wavedeck_core::models::error::StreamError;
use wavedeck_core::models::format::AudioFormat;
use wavedeck_core::processing::buffer_pool::BufferId;
use wavedeck_core::traits::audio_device::CompletionCallback;

pub(crate) const WOM_DONE: u32 = 0x3BD;
pub(crate) const WIM_DATA: u32 = 0x3C0;
pub(crate) const WAVEHDR_SIZE: u32 = size_of::<WAVEHDR>() as u32;
const WAVE_FORMAT_PCM: u16 = 1;

/// Instance data handed to WinMM with every open device.
pub(crate) struct CallbackContext {
    sender: Mutex<Option<Sender<(BufferId, Vec<u8>)>>>,
}

impl CallbackContext {
    /// Spawn the dispatcher thread `name` feeding `on_complete`.
    pub(crate) fn start(name: &str, on_complete: CompletionCallback) -> Result<Box<Self>, StreamError> {
        let (sender, receiver) = mpsc::channel::<(BufferId, Vec<u8>)>();
        thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                for (id, data) in receiver {
                    on_complete(id, &data);
                }
            })
            .map_err(|e| StreamError::DeviceOpen(format!("failed to spawn {}: {}", name, e)))?;
        Ok(Box::new(Self {
            sender: Mutex::new(Some(sender)),
        }))
    }

    pub(crate) fn post(&self, id: BufferId, data: Vec<u8>) {
        if let Some(sender) = self.sender.lock().as_ref() {
            if sender.send((id, data)).is_err() {
                log::warn!("Completion for buffer {} arrived after shutdown", id);
            }
        }
    }

    /// Stop accepting completions. The dispatcher exits once the queue is
    /// empty.
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
    }

    /// Value passed as the WinMM callback instance.
    pub(crate) fn as_instance(&self) -> usize {
        self as *const Self as usize
    }
}

/// A prepared `WAVEHDR` together with the memory it points at.
///
/// Both live on the heap, so the addresses registered with the driver stay
/// valid however the owning map is rearranged.
pub(crate) struct NativeBuffer {
    header: Box<WAVEHDR>,
    data: Vec<u8>,
}

impl NativeBuffer {
    pub(crate) fn new(id: BufferId, capacity: usize) -> Self {
        let mut data = vec![0u8; capacity];
        let header = Box::new(WAVEHDR {
            lpData: PSTR(data.as_mut_ptr()),
            dwBufferLength: capacity as u32,
            dwUser: id,
            ..Default::default()
        });
        Self { header, data }
    }

    pub(crate) fn header_ptr(&mut self) -> *mut WAVEHDR {
        &mut *self.header
    }

    /// Copy `bytes` in and shrink the header to cover exactly them.
    pub(crate) fn load(&mut self, id: BufferId, bytes: &[u8]) -> Result<(), StreamError> {
        if bytes.len() > self.data.len() {
            return Err(StreamError::BufferRegistration(format!(
                "{} bytes do not fit buffer {} of {} bytes",
                bytes.len(),
                id,
                self.data.len()
            )));
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.header.dwBufferLength = bytes.len() as u32;
        Ok(())
    }

    /// Expose the whole buffer to an input device again.
    pub(crate) fn rearm(&mut self) {
        self.header.dwBufferLength = self.data.len() as u32;
        self.header.dwBytesRecorded = 0;
    }
}

/// Buffer id and recorded bytes of a completed input header.
///
/// # Safety
/// `header` must point at a live `WAVEHDR` whose `lpData` covers at least
/// `dwBytesRecorded` bytes.
pub(crate) unsafe fn recorded(header: *const WAVEHDR) -> (BufferId, Vec<u8>) {
    let header = &*header;
    let id = header.dwUser;
    let len = header.dwBytesRecorded as usize;
    let data = header.lpData.0;
    if data.is_null() || len == 0 {
        return (id, Vec::new());
    }
    (id, std::slice::from_raw_parts(data, len).to_vec())
}

/// Buffer id of a completed output header.
///
/// # Safety
/// `header` must point at a live `WAVEHDR`.
pub(crate) unsafe fn buffer_id(header: *const WAVEHDR) -> BufferId {
    (*header).dwUser
}

pub(crate) fn pcm_format(format: &AudioFormat) -> WAVEFORMATEX {
    WAVEFORMATEX {
        wFormatTag: WAVE_FORMAT_PCM,
        nChannels: format.channels,
        nSamplesPerSec: format.sample_rate,
        nAvgBytesPerSec: format.byte_rate(),
        nBlockAlign: format.block_align(),
        wBitsPerSample: format.bits_per_sample,
        cbSize: 0,
    }
}
