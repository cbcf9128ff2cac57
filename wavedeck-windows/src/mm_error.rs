//! WinMM result codes and device-name decoding.
//!
//! Kept free of `windows` crate types so it builds and tests on any host.

use thiserror::Error;

use wavedeck_core::models::error::StreamError;

pub const MMSYSERR_NOERROR: u32 = 0;
pub const MMSYSERR_ERROR: u32 = 1;
pub const MMSYSERR_BADDEVICEID: u32 = 2;
pub const MMSYSERR_ALLOCATED: u32 = 4;
pub const MMSYSERR_INVALHANDLE: u32 = 5;
pub const MMSYSERR_NODRIVER: u32 = 6;
pub const MMSYSERR_NOMEM: u32 = 7;
pub const MMSYSERR_INVALPARAM: u32 = 11;
pub const WAVERR_BADFORMAT: u32 = 32;
pub const WAVERR_STILLPLAYING: u32 = 33;
pub const WAVERR_UNPREPARED: u32 = 34;

/// A failed `waveIn*` / `waveOut*` call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{call} failed: {reason} (MMRESULT {code})")]
pub struct MmError {
    pub call: &'static str,
    pub code: u32,
    pub reason: &'static str,
}

impl MmError {
    /// Map onto the engine error taxonomy. `wrap` picks the variant for
    /// codes without a more specific meaning.
    pub fn into_stream_error(self, wrap: fn(String) -> StreamError) -> StreamError {
        match self.code {
            MMSYSERR_BADDEVICEID | MMSYSERR_NODRIVER => StreamError::DeviceNotAvailable,
            _ => wrap(self.to_string()),
        }
    }
}

/// Turn an MMRESULT into a `Result`.
pub fn check(code: u32, call: &'static str) -> Result<(), MmError> {
    if code == MMSYSERR_NOERROR {
        Ok(())
    } else {
        Err(MmError {
            call,
            code,
            reason: describe(code),
        })
    }
}

pub fn describe(code: u32) -> &'static str {
    match code {
        MMSYSERR_NOERROR => "no error",
        MMSYSERR_ERROR => "unspecified error",
        MMSYSERR_BADDEVICEID => "device id out of range",
        MMSYSERR_ALLOCATED => "device already allocated",
        MMSYSERR_INVALHANDLE => "invalid device handle",
        MMSYSERR_NODRIVER => "no device driver present",
        MMSYSERR_NOMEM => "unable to allocate memory",
        MMSYSERR_INVALPARAM => "invalid parameter",
        WAVERR_BADFORMAT => "unsupported wave format",
        WAVERR_STILLPLAYING => "buffers still queued",
        WAVERR_UNPREPARED => "header not prepared",
        _ => "unknown error",
    }
}

/// Decode a NUL-terminated UTF-16 product name such as `WAVEINCAPSW::szPname`.
pub fn name_from_wide(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len]).trim().to_string()
}
