use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::models::error::StreamError;
use crate::models::format::AudioFormat;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::processing::wav_format::{self, WAV_HEADER_SIZE};
use crate::storage::metadata;

/// In-memory capture output.
///
/// A single growable byte vector whose first 44 bytes are a placeholder WAV
/// header, reserved before any audio is appended. Appends come from the
/// device callback and never touch the filesystem; [`save_to_file`] runs on
/// the controller thread.
///
/// ```text
/// [44-byte header, sizes = 0][audio bytes as delivered...]
/// ```
///
/// [`save_to_file`]: AccumulationStore::save_to_file
#[derive(Debug, Default)]
pub struct AccumulationStore {
    bytes: Vec<u8>,
    format: Option<AudioFormat>,
}

impl AccumulationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard previous contents and reserve the header for `format`.
    pub fn begin(&mut self, format: AudioFormat, reserve: usize) {
        if self.audio_len() > 0 {
            log::warn!("Discarding {} unsaved audio bytes", self.audio_len());
        }
        self.bytes = Vec::with_capacity(reserve.max(WAV_HEADER_SIZE));
        self.bytes.extend_from_slice(&wav_format::header_placeholder(&format));
        self.format = Some(format);
    }

    /// Append delivered audio after the reserved header.
    pub fn append(&mut self, audio: &[u8]) {
        if self.format.is_none() {
            log::warn!("Dropping {} bytes appended before a header was reserved", audio.len());
            return;
        }
        self.bytes.extend_from_slice(audio);
    }

    /// Total length including the header.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Audio bytes, header excluded.
    pub fn audio_len(&self) -> u64 {
        self.bytes.len().saturating_sub(WAV_HEADER_SIZE) as u64
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn clear(&mut self) {
        self.bytes = Vec::new();
        self.format = None;
    }

    /// Write the store to `path` and patch the header sizes in place.
    ///
    /// Returns the saved file's details, including its SHA-256 checksum.
    /// With `write_sidecar`, a `.metadata.json` file is written next to it.
    pub fn save_to_file(&self, path: &Path, write_sidecar: bool) -> Result<RecordingResult, StreamError> {
        let format = self
            .format
            .ok_or_else(|| StreamError::InvalidState("nothing has been recorded".into()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StreamError::io("failed to create directory", e))?;
        }

        let file = File::create(path).map_err(|e| StreamError::io("failed to create file", e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&self.bytes)
            .map_err(|e| StreamError::io("write failed", e))?;

        let audio_bytes = self.audio_len();
        wav_format::finalize(&mut writer, audio_bytes)?;
        writer
            .into_inner()
            .map_err(|e| StreamError::io("flush failed", e.into_error()))?
            .sync_all()
            .map_err(|e| StreamError::io("sync failed", e))?;

        let checksum = sha256_file(path)?;
        let metadata = RecordingMetadata::new(format, audio_bytes, &path.to_string_lossy(), &checksum);
        if write_sidecar {
            metadata::write_metadata(&metadata, path)?;
        }

        log::info!("Saved {} audio bytes to {}", audio_bytes, path.display());
        Ok(RecordingResult {
            file_path: path.to_path_buf(),
            duration_ms: format.duration_ms(audio_bytes),
            audio_bytes,
            metadata,
            checksum,
        })
    }
}

/// Compute SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, StreamError> {
    let data = fs::read(path).map_err(|e| StreamError::io("failed to read file for checksum", e))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::wav_format::parse_header;
    use std::io::Cursor;

    fn mono_8k() -> AudioFormat {
        AudioFormat::new(1, 16, 8000)
    }

    #[test]
    fn header_is_reserved_before_audio() {
        let mut store = AccumulationStore::new();
        store.begin(mono_8k(), 1024);

        assert_eq!(store.len(), 44);
        assert_eq!(store.audio_len(), 0);

        store.append(&[1, 2, 3, 4]);
        assert_eq!(store.len(), 48);
        assert_eq!(store.audio_len(), 4);
    }

    #[test]
    fn append_without_header_is_dropped() {
        let mut store = AccumulationStore::new();
        store.append(&[1, 2, 3]);
        assert!(store.is_empty());
    }

    #[test]
    fn begin_discards_previous_take() {
        let mut store = AccumulationStore::new();
        store.begin(mono_8k(), 0);
        store.append(&[9; 10]);
        store.begin(AudioFormat::new(2, 16, 44100), 0);

        assert_eq!(store.len(), 44);
        assert_eq!(store.format(), Some(AudioFormat::new(2, 16, 44100)));
    }

    #[test]
    fn save_writes_finalized_wav_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("takes").join("take.wav");

        let mut store = AccumulationStore::new();
        store.begin(mono_8k(), 0);
        store.append(&[0x11; 16000]);

        let result = store.save_to_file(&path, true).unwrap();
        assert_eq!(result.audio_bytes, 16000);
        assert_eq!(result.duration_ms, 1000);
        assert_eq!(result.checksum.len(), 64);

        let file_data = fs::read(&path).unwrap();
        assert_eq!(file_data.len(), 44 + 16000);
        let data_size = u32::from_le_bytes([file_data[40], file_data[41], file_data[42], file_data[43]]);
        assert_eq!(data_size, 16000);
        let chunk_size = u32::from_le_bytes([file_data[4], file_data[5], file_data[6], file_data[7]]);
        assert_eq!(chunk_size, 16036);

        let header = parse_header(&mut Cursor::new(file_data)).unwrap();
        assert_eq!(header.format, mono_8k());
        assert_eq!(header.duration_ms(), 1000);

        let sidecar = metadata::read_metadata(&path).unwrap();
        assert_eq!(sidecar.checksum, result.checksum);
        assert_eq!(sidecar.format, mono_8k());
    }

    #[test]
    fn save_without_recording_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccumulationStore::new();
        assert!(matches!(
            store.save_to_file(&dir.path().join("empty.wav"), false),
            Err(StreamError::InvalidState(_))
        ));
    }

    #[test]
    fn clear_releases_contents() {
        let mut store = AccumulationStore::new();
        store.begin(mono_8k(), 4096);
        store.append(&[1; 100]);
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.format(), None);
    }
}
