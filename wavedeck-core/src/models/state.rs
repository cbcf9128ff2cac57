use serde::Serialize;

/// Capture engine state machine.
///
/// ```text
/// closed → capturing ↔ paused_capturing
///             ↓              ↓
///          draining  ←───────┘
///             ↓
///           closed
/// ```
///
/// `Draining` only exists while `stop()` waits for the device to hand its
/// buffers back. Completions observed in that state are appended but never
/// resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Closed,
    Capturing,
    PausedCapturing,
    Draining,
}

impl CaptureState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::PausedCapturing)
    }

    /// Capturing or paused: a stream the controller can still operate on.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Capturing | Self::PausedCapturing)
    }
}

/// Playback engine state machine.
///
/// ```text
/// closed → playing ↔ paused_playing
///             ↓  ↘           ↓
///             ↓   finishing  ↓
///             ↓      ↓       ↓
///          draining ←────────┘
///             ↓
///           closed
/// ```
///
/// `Finishing` is entered from the completion callback once every buffer has
/// come back empty; the monitor thread performs the actual teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Closed,
    Playing,
    PausedPlaying,
    Finishing,
    Draining,
}

impl PlaybackState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::PausedPlaying)
    }

    /// Whether completions should still refill and resubmit buffers.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Playing | Self::PausedPlaying)
    }
}

/// Why a playback stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Every buffer came back empty.
    SourceExhausted,
    /// The projected remaining time reached zero before the device reported
    /// its final completion.
    DurationElapsed,
    /// The controller called `stop()`.
    Stopped,
}
