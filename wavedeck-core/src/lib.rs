//! # wavedeck-core
//!
//! Platform-agnostic PCM capture and playback core library.
//!
//! Provides the device buffer pool, the capture and playback stream engines,
//! WAV container I/O and a single-task record/play control surface.
//! Platform-specific backends (Windows WinMM) implement the `DeviceDirectory`
//! and `AudioDevice` traits and plug into the generic engines.
//!
//! ## Architecture
//!
//! ```text
//! wavedeck-core (this crate)
//! ├── traits/       ← AudioDevice, DeviceDirectory, StreamDelegate
//! ├── models/       ← StreamError, CaptureState, PlaybackState, AudioFormat, EngineConfig, etc.
//! ├── processing/   ← BufferPool, WAV header generation and parsing
//! ├── session/      ← CaptureEngine, PlaybackEngine, TransportController, AudioStation
//! ├── storage/      ← AccumulationStore, source streams, metadata sidecar
//! └── device/       ← VirtualDevice (in-process device for tests and headless use)
//! ```

pub mod device;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use device::virtual_device::{DeviceOp, VirtualDevice, VirtualDeviceHandle, VirtualDirectory};
pub use models::config::EngineConfig;
pub use models::device::{DeviceInfo, StreamDirection};
pub use models::error::StreamError;
pub use models::format::AudioFormat;
pub use models::recording_result::{CaptureSummary, RecordingMetadata, RecordingResult};
pub use models::state::{CaptureState, FinishReason, PlaybackState};
pub use processing::buffer_pool::{BufferId, BufferPool, DeviceBuffer, Ownership};
pub use processing::wav_format::WaveHeader;
pub use session::capture::CaptureEngine;
pub use session::playback::PlaybackEngine;
pub use session::station::{AudioStation, CommandStatus, StationStatus};
pub use session::transport::{TransportController, TransportState};
pub use storage::accumulation::AccumulationStore;
pub use storage::source::SourceStream;
pub use traits::audio_device::{AudioDevice, CompletionCallback};
pub use traits::device_directory::DeviceDirectory;
pub use traits::stream_delegate::StreamDelegate;
