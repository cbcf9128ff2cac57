use std::time::Duration;

use serde::Deserialize;

use super::error::StreamError;
use super::format::AudioFormat;

/// Longest block a device buffer may hold.
pub const MAX_BLOCK_SECS: f64 = 60.0;

/// Largest device buffer; `WAVEHDR::dwBufferLength` is 32 bits.
pub const MAX_BUFFER_BYTES: usize = u32::MAX as usize;

/// Tunables shared by the capture and playback engines.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use wavedeck_core::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "capture_buffer_count": 2 }"#).unwrap();
/// assert_eq!(config.capture_buffer_count, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Buffers kept queued on a capture device (default: 4, minimum 2).
    pub capture_buffer_count: usize,

    /// Audio held by one device buffer, in seconds (default: 4.0, at most
    /// [`MAX_BLOCK_SECS`]).
    pub block_secs: f64,

    /// Fixed buffer size in bytes. Overrides `block_secs` when set.
    pub buffer_bytes: Option<usize>,

    /// Upper bound on how long `stop()` waits for the device to return
    /// its buffers, in milliseconds (default: 2000).
    pub drain_timeout_ms: u64,

    /// Tick of the playback remaining-time monitor, in milliseconds
    /// (default: 250).
    pub monitor_interval_ms: u64,

    /// Initial reservation for the capture accumulation store (default: 1 MiB).
    pub store_reserve_bytes: usize,

    /// Write a `.metadata.json` sidecar next to saved recordings (default: true).
    pub write_metadata: bool,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capture_buffer_count < 2 {
            return Err(format!(
                "capture needs at least 2 buffers, got {}",
                self.capture_buffer_count
            ));
        }
        match self.buffer_bytes {
            Some(0) => return Err("buffer size must be positive".into()),
            Some(bytes) if bytes > MAX_BUFFER_BYTES => {
                return Err(format!(
                    "buffer size {} exceeds the {} byte device limit",
                    bytes, MAX_BUFFER_BYTES
                ))
            }
            Some(_) => {}
            None if !(self.block_secs > 0.0 && self.block_secs <= MAX_BLOCK_SECS) => {
                return Err(format!(
                    "block duration must be in (0, {}] seconds, got {}",
                    MAX_BLOCK_SECS, self.block_secs
                ))
            }
            None => {}
        }
        if self.monitor_interval_ms == 0 {
            return Err("monitor interval must be positive".into());
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, StreamError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StreamError::InvalidState(format!("invalid engine config: {}", e)))?;
        config.validate().map_err(StreamError::InvalidState)?;
        Ok(config)
    }

    /// Device buffer size for `format`, never smaller than one frame nor
    /// larger than [`MAX_BUFFER_BYTES`].
    pub fn buffer_size_for(&self, format: &AudioFormat) -> usize {
        let align = format.block_align().max(1) as usize;
        match self.buffer_bytes {
            Some(bytes) => bytes.clamp(1, MAX_BUFFER_BYTES),
            None => {
                let size = format.bytes_for_secs(self.block_secs).max(align);
                if size > MAX_BUFFER_BYTES {
                    MAX_BUFFER_BYTES - MAX_BUFFER_BYTES % align
                } else {
                    size
                }
            }
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_buffer_count: 4,
            block_secs: 4.0,
            buffer_bytes: None,
            drain_timeout_ms: 2000,
            monitor_interval_ms: 250,
            store_reserve_bytes: 1024 * 1024,
            write_metadata: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_single_capture_buffer() {
        let config = EngineConfig {
            capture_buffer_count: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_blocks() {
        for block_secs in [MAX_BLOCK_SECS + 1.0, 1e300, f64::INFINITY, f64::NAN] {
            let config = EngineConfig {
                block_secs,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "block_secs {} accepted", block_secs);
        }
        let max = EngineConfig {
            block_secs: MAX_BLOCK_SECS,
            ..Default::default()
        };
        assert!(max.validate().is_ok());

        assert!(EngineConfig::from_json_str(r#"{ "block_secs": 1e12 }"#).is_err());
    }

    #[test]
    fn rejects_buffer_larger_than_device_limit() {
        let config = EngineConfig {
            buffer_bytes: Some(MAX_BUFFER_BYTES + 1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn buffer_size_never_exceeds_device_limit() {
        let config = EngineConfig {
            block_secs: MAX_BLOCK_SECS,
            ..Default::default()
        };
        let fastest = AudioFormat::new(2, 16, u32::MAX / 4);
        let size = config.buffer_size_for(&fastest);
        assert!(size <= MAX_BUFFER_BYTES);
        assert_eq!(size % 4, 0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "block_secs": 0.5, "drain_timeout_ms": 100 }"#).unwrap();
        assert_eq!(config.block_secs, 0.5);
        assert_eq!(config.drain_timeout(), Duration::from_millis(100));
        assert_eq!(config.capture_buffer_count, 4);
        assert!(config.write_metadata);
    }

    #[test]
    fn invalid_json_config_is_rejected() {
        assert!(EngineConfig::from_json_str(r#"{ "monitor_interval_ms": 0 }"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn buffer_size_from_block_duration() {
        let config = EngineConfig {
            block_secs: 0.5,
            ..Default::default()
        };
        assert_eq!(config.buffer_size_for(&AudioFormat::new(1, 16, 8000)), 8000);

        let fixed = EngineConfig {
            buffer_bytes: Some(4096),
            ..Default::default()
        };
        assert_eq!(fixed.buffer_size_for(&AudioFormat::new(2, 16, 44100)), 4096);
    }
}
