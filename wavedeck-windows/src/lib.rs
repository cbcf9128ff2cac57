//! # wavedeck-windows
//!
//! Windows WinMM backend for wavedeck.
//!
//! Provides:
//! - `WinmmDirectory`: device enumeration via `waveInGetDevCapsW` / `waveOutGetDevCapsW`
//! - `WaveInDevice`: capture through `waveIn*` with function callbacks
//! - `WaveOutDevice`: playback through `waveOut*` with function callbacks
//! - `mm_error`: MMRESULT decoding (available on every platform)
//!
//! ## Usage
//! ```ignore
//! use wavedeck_core::{AudioFormat, AudioStation, EngineConfig};
//! use wavedeck_windows::WinmmDirectory;
//!
//! let mut station = AudioStation::new(WinmmDirectory::new(), EngineConfig::default())?;
//! station.record(AudioFormat::default(), 0)?;
//! ```

pub mod mm_error;

#[cfg(target_os = "windows")]
mod completion;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod wave_in;
#[cfg(target_os = "windows")]
pub mod wave_out;

pub use mm_error::MmError;

#[cfg(target_os = "windows")]
pub use device_enumerator::WinmmDirectory;
#[cfg(target_os = "windows")]
pub use wave_in::WaveInDevice;
#[cfg(target_os = "windows")]
pub use wave_out::WaveOutDevice;
