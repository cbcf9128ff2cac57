use crate::models::device::DeviceInfo;
use crate::models::error::StreamError;
use crate::traits::audio_device::AudioDevice;

/// Platform device enumeration and factory.
///
/// Engines only ever ask for "device N"; everything else about the endpoint
/// stays behind this trait.
pub trait DeviceDirectory: Send + Sync + 'static {
    type Capture: AudioDevice;
    type Playback: AudioDevice;

    fn capture_devices(&self) -> Result<Vec<DeviceInfo>, StreamError>;

    fn playback_devices(&self) -> Result<Vec<DeviceInfo>, StreamError>;

    /// Create an unopened capture device for `id`.
    fn open_capture(&self, id: u32) -> Result<Self::Capture, StreamError>;

    /// Create an unopened playback device for `id`.
    fn open_playback(&self, id: u32) -> Result<Self::Playback, StreamError>;
}
