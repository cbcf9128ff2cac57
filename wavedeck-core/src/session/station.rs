use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::models::config::EngineConfig;
use crate::models::device::DeviceInfo;
use crate::models::error::StreamError;
use crate::models::format::AudioFormat;
use crate::models::recording_result::{CaptureSummary, RecordingResult};
use crate::session::capture::CaptureEngine;
use crate::session::playback::PlaybackEngine;
use crate::session::transport::{format_clock, remaining_display};
use crate::traits::device_directory::DeviceDirectory;
use crate::traits::stream_delegate::StreamDelegate;

/// Outcome of a station command.
///
/// Conflicts with the task already running are reported here rather than
/// as errors; the caller typically shows them as a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Started,
    Paused,
    Resumed,
    Stopped,
    AlreadyRecording,
    AlreadyPlaying,
    NothingActive,
}

/// Snapshot for a transport display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationStatus {
    pub is_capturing: bool,
    pub is_playing: bool,
    pub is_paused: bool,
    pub elapsed_ms: u64,
    /// Length of the file being played.
    pub total_duration_ms: Option<u64>,
    pub remaining_ms: Option<u64>,
    /// Elapsed time while recording, remaining time while playing.
    pub clock: String,
    /// Audio bytes held by the capture store, header excluded.
    pub recorded_bytes: u64,
}

/// Record/playback control surface over one capture and one playback engine.
///
/// Only one task runs at a time: `record` while playing (or `play` while
/// recording) is refused with a [`CommandStatus`]. Dropping the station
/// stops whatever is running.
pub struct AudioStation<D: DeviceDirectory> {
    directory: Arc<D>,
    capture: CaptureEngine<D>,
    playback: PlaybackEngine<D>,
}

impl<D: DeviceDirectory> AudioStation<D> {
    pub fn new(directory: D, config: EngineConfig) -> Result<Self, StreamError> {
        let directory = Arc::new(directory);
        Ok(Self {
            capture: CaptureEngine::new(Arc::clone(&directory), config.clone())?,
            playback: PlaybackEngine::new(Arc::clone(&directory), config)?,
            directory,
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn StreamDelegate>) {
        self.capture.set_delegate(Arc::clone(&delegate));
        self.playback.set_delegate(delegate);
    }

    pub fn capture(&self) -> &CaptureEngine<D> {
        &self.capture
    }

    pub fn playback(&self) -> &PlaybackEngine<D> {
        &self.playback
    }

    pub fn capture_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        self.directory.capture_devices()
    }

    pub fn playback_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        self.directory.playback_devices()
    }

    fn busy(&self) -> Option<CommandStatus> {
        if !self.capture.state().is_closed() {
            Some(CommandStatus::AlreadyRecording)
        } else if !self.playback.state().is_closed() {
            Some(CommandStatus::AlreadyPlaying)
        } else {
            None
        }
    }

    /// Start recording from capture device `device_id`.
    pub fn record(&mut self, format: AudioFormat, device_id: u32) -> Result<CommandStatus, StreamError> {
        if let Some(status) = self.busy() {
            log::info!("Record refused: {:?}", status);
            return Ok(status);
        }
        self.capture.start(format, device_id)?;
        Ok(CommandStatus::Started)
    }

    /// Start playing the WAV file at `path` on playback device `device_id`.
    pub fn play(&mut self, path: &Path, device_id: u32) -> Result<CommandStatus, StreamError> {
        if let Some(status) = self.busy() {
            log::info!("Play refused: {:?}", status);
            return Ok(status);
        }
        self.playback.start_file(path, device_id)?;
        Ok(CommandStatus::Started)
    }

    /// Pause the running task, or resume it if it is paused.
    pub fn toggle_pause(&mut self) -> Result<CommandStatus, StreamError> {
        let capture = self.capture.state();
        if capture.is_capturing() {
            self.capture.pause()?;
            return Ok(CommandStatus::Paused);
        }
        if capture.is_paused() {
            self.capture.resume()?;
            return Ok(CommandStatus::Resumed);
        }

        let playback = self.playback.state();
        if playback.is_playing() {
            self.playback.pause()?;
            return Ok(CommandStatus::Paused);
        }
        if playback.is_paused() {
            self.playback.resume()?;
            return Ok(CommandStatus::Resumed);
        }
        Ok(CommandStatus::NothingActive)
    }

    /// Stop whichever task is running.
    pub fn stop(&mut self) -> Result<CommandStatus, StreamError> {
        if self.capture.state().is_open() {
            let summary: Option<CaptureSummary> = self.capture.stop()?;
            if let Some(summary) = summary {
                log::info!("Recorded {} bytes", summary.audio_bytes);
            }
            return Ok(CommandStatus::Stopped);
        }
        if !self.playback.state().is_closed() {
            self.playback.stop()?;
            return Ok(CommandStatus::Stopped);
        }
        Ok(CommandStatus::NothingActive)
    }

    /// Write the last recording to `path`.
    pub fn save_recording(&self, path: &Path) -> Result<RecordingResult, StreamError> {
        self.capture.save_to_file(path)
    }

    pub fn clear_recording(&self) -> Result<(), StreamError> {
        self.capture.clear()
    }

    pub fn status(&self) -> StationStatus {
        let capture = self.capture.state();
        let playback = self.playback.state();
        let recorded_bytes = self.capture.recorded_bytes();

        if capture.is_open() {
            let elapsed = self.capture.elapsed();
            return StationStatus {
                is_capturing: true,
                is_playing: false,
                is_paused: capture.is_paused(),
                elapsed_ms: elapsed.as_millis() as u64,
                total_duration_ms: None,
                remaining_ms: None,
                clock: format_clock(elapsed),
                recorded_bytes,
            };
        }

        if !playback.is_closed() {
            let remaining = self.playback.remaining();
            return StationStatus {
                is_capturing: false,
                is_playing: true,
                is_paused: playback.is_paused(),
                elapsed_ms: self.playback.elapsed().as_millis() as u64,
                total_duration_ms: Some(self.playback.total_duration().as_millis() as u64),
                remaining_ms: Some(remaining.as_millis() as u64),
                clock: remaining_display(remaining),
                recorded_bytes,
            };
        }

        StationStatus {
            is_capturing: false,
            is_playing: false,
            is_paused: false,
            elapsed_ms: 0,
            total_duration_ms: None,
            remaining_ms: None,
            clock: format_clock(Default::default()),
            recorded_bytes,
        }
    }
}

impl<D: DeviceDirectory> Drop for AudioStation<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Failed to stop active task on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::virtual_device::VirtualDirectory;
    use crate::models::state::{CaptureState, PlaybackState};

    fn config() -> EngineConfig {
        EngineConfig {
            capture_buffer_count: 2,
            buffer_bytes: Some(800),
            drain_timeout_ms: 200,
            monitor_interval_ms: 10,
            write_metadata: true,
            ..EngineConfig::default()
        }
    }

    fn station() -> (AudioStation<VirtualDirectory>, VirtualDirectory) {
        let directory = VirtualDirectory::new();
        let station = AudioStation::new(directory.clone(), config()).unwrap();
        (station, directory)
    }

    // 100 B/s keeps playback well clear of the duration self-stop.
    fn slow_format() -> AudioFormat {
        AudioFormat::new(1, 8, 100)
    }

    #[test]
    fn idle_station_reports_nothing_active() {
        let (mut station, _directory) = station();
        assert_eq!(station.stop().unwrap(), CommandStatus::NothingActive);
        assert_eq!(station.toggle_pause().unwrap(), CommandStatus::NothingActive);

        let status = station.status();
        assert!(!status.is_capturing && !status.is_playing);
        assert_eq!(status.clock, "00:00:00");
    }

    #[test]
    fn only_one_task_runs_at_a_time() {
        let (mut station, _directory) = station();
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(station.record(slow_format(), 0).unwrap(), CommandStatus::Started);
        assert_eq!(
            station.record(slow_format(), 0).unwrap(),
            CommandStatus::AlreadyRecording
        );
        assert_eq!(
            station.play(&dir.path().join("none.wav"), 0).unwrap(),
            CommandStatus::AlreadyRecording
        );
        assert_eq!(station.stop().unwrap(), CommandStatus::Stopped);
        assert_eq!(station.stop().unwrap(), CommandStatus::NothingActive);
    }

    #[test]
    fn record_save_and_play_back() {
        let (mut station, directory) = station();
        let mic = directory.capture_handle();
        let speakers = directory.playback_handle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        station.record(slow_format(), 0).unwrap();
        mic.deliver(&[0x42; 800]).unwrap();
        mic.deliver(&[0x43; 800]).unwrap();
        assert_eq!(station.toggle_pause().unwrap(), CommandStatus::Paused);
        assert!(station.status().is_paused);
        assert_eq!(station.toggle_pause().unwrap(), CommandStatus::Resumed);
        station.stop().unwrap();

        let saved = station.save_recording(&path).unwrap();
        assert_eq!(saved.audio_bytes, 1600);
        assert_eq!(saved.duration_ms, 16_000);
        assert!(dir.path().join("take.metadata.json").exists());

        assert_eq!(station.play(&path, 0).unwrap(), CommandStatus::Started);
        assert_eq!(
            station.record(slow_format(), 0).unwrap(),
            CommandStatus::AlreadyPlaying
        );

        let status = station.status();
        assert!(status.is_playing);
        assert_eq!(status.total_duration_ms, Some(16_000));

        speakers.complete_next().unwrap();
        speakers.complete_next().unwrap();
        assert_eq!(speakers.played().len(), 1600);
        assert_eq!(&speakers.played()[..800], &[0x42; 800][..]);
    }

    #[test]
    fn play_reports_a_missing_file() {
        let (mut station, _directory) = station();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            station.play(&dir.path().join("missing.wav"), 0),
            Err(StreamError::Io(_))
        ));
        assert_eq!(station.playback().state(), PlaybackState::Closed);
    }

    #[test]
    fn status_serializes_for_a_frontend() {
        let (mut station, _directory) = station();
        station.record(slow_format(), 0).unwrap();

        let json = serde_json::to_value(station.status()).unwrap();
        assert_eq!(json["is_capturing"], true);
        assert_eq!(json["clock"], "00:00:00");
        assert_eq!(json["total_duration_ms"], serde_json::Value::Null);
    }

    #[test]
    fn dropping_the_station_stops_recording() {
        let directory = VirtualDirectory::new();
        let mic = directory.capture_handle();
        {
            let mut station = AudioStation::new(directory.clone(), config()).unwrap();
            station.record(slow_format(), 0).unwrap();
            assert_eq!(station.capture().state(), CaptureState::Capturing);
        }
        assert!(!mic.is_open());
        assert!(mic.prepared().is_empty());
    }

    #[test]
    fn lists_devices() {
        let (station, _directory) = station();
        assert_eq!(station.capture_devices().unwrap()[0].name, "Virtual Microphone");
        assert_eq!(station.playback_devices().unwrap()[0].name, "Virtual Speakers");
    }
}
