use serde::Serialize;

/// Whether a device records or renders audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    Capture,
    Playback,
}

/// An audio device available for capture or playback.
///
/// `id` is the index the platform directory hands back to `open_*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: u32,
    pub name: String,
    pub direction: StreamDirection,
    pub is_default: bool,
}
