use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::format::AudioFormat;

/// What a capture stream produced, reported by `CaptureEngine::stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Audio bytes accumulated, header excluded.
    pub audio_bytes: u64,
    /// Pause-exclusive wall-clock duration of the stream.
    pub elapsed_ms: u64,
}

/// Result returned when accumulated capture data is saved to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_ms: u64,
    pub audio_bytes: u64,
    pub metadata: RecordingMetadata,
    pub checksum: String,
}

/// Metadata written alongside a saved recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_ms: u64,
    pub file_path: String,
    pub checksum: String,
    pub created_at: String,
    pub format: AudioFormat,
    pub audio_bytes: u64,
}

impl RecordingMetadata {
    pub fn new(format: AudioFormat, audio_bytes: u64, file_path: &str, checksum: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            duration_ms: format.duration_ms(audio_bytes),
            file_path: file_path.to_string(),
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            format,
            audio_bytes,
        }
    }
}
