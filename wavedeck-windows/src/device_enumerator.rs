//! Windows audio device enumeration via the WinMM device tables.
//!
//! WinMM numbers input and output devices independently from 0; device 0
//! is reported as the default.

use std::mem::size_of;

use windows::Win32::Media::Audio::{
    waveInGetDevCapsW, waveInGetNumDevs, waveOutGetDevCapsW, waveOutGetNumDevs, WAVEINCAPSW,
    WAVEOUTCAPSW,
};

use wavedeck_core::models::device::{DeviceInfo, StreamDirection};
use wavedeck_core::models::error::StreamError;
use wavedeck_core::traits::device_directory::DeviceDirectory;

use crate::mm_error::{check, name_from_wide};
use crate::wave_in::WaveInDevice;
use crate::wave_out::WaveOutDevice;

/// WinMM device directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct WinmmDirectory;

impl WinmmDirectory {
    pub fn new() -> Self {
        Self
    }

    fn capture_info(id: u32) -> Result<DeviceInfo, StreamError> {
        let mut caps = WAVEINCAPSW::default();
        let code = unsafe { waveInGetDevCapsW(id as usize, &mut caps, size_of::<WAVEINCAPSW>() as u32) };
        check(code, "waveInGetDevCapsW").map_err(|e| e.into_stream_error(StreamError::DeviceOpen))?;
        let name = caps.szPname;
        Ok(DeviceInfo {
            id,
            name: Self::display_name(&name, "Input", id),
            direction: StreamDirection::Capture,
            is_default: id == 0,
        })
    }

    fn playback_info(id: u32) -> Result<DeviceInfo, StreamError> {
        let mut caps = WAVEOUTCAPSW::default();
        let code = unsafe { waveOutGetDevCapsW(id as usize, &mut caps, size_of::<WAVEOUTCAPSW>() as u32) };
        check(code, "waveOutGetDevCapsW").map_err(|e| e.into_stream_error(StreamError::DeviceOpen))?;
        let name = caps.szPname;
        Ok(DeviceInfo {
            id,
            name: Self::display_name(&name, "Output", id),
            direction: StreamDirection::Playback,
            is_default: id == 0,
        })
    }

    fn display_name(wide: &[u16], kind: &str, id: u32) -> String {
        let name = name_from_wide(wide);
        if name.is_empty() {
            format!("{} {}", kind, id)
        } else {
            name
        }
    }

    fn list(count: u32, info: fn(u32) -> Result<DeviceInfo, StreamError>) -> Vec<DeviceInfo> {
        (0..count)
            .filter_map(|id| match info(id) {
                Ok(device) => Some(device),
                Err(e) => {
                    log::warn!("Skipping device {}: {}", id, e);
                    None
                }
            })
            .collect()
    }
}

impl DeviceDirectory for WinmmDirectory {
    type Capture = WaveInDevice;
    type Playback = WaveOutDevice;

    fn capture_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        let count = unsafe { waveInGetNumDevs() };
        Ok(Self::list(count, Self::capture_info))
    }

    fn playback_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        let count = unsafe { waveOutGetNumDevs() };
        Ok(Self::list(count, Self::playback_info))
    }

    fn open_capture(&self, id: u32) -> Result<WaveInDevice, StreamError> {
        if id >= unsafe { waveInGetNumDevs() } {
            return Err(StreamError::DeviceNotAvailable);
        }
        Ok(WaveInDevice::new(Self::capture_info(id)?))
    }

    fn open_playback(&self, id: u32) -> Result<WaveOutDevice, StreamError> {
        if id >= unsafe { waveOutGetNumDevs() } {
            return Err(StreamError::DeviceNotAvailable);
        }
        Ok(WaveOutDevice::new(Self::playback_info(id)?))
    }
}
