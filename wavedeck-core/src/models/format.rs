use serde::{Deserialize, Serialize};

use super::error::StreamError;

/// Linear PCM stream format.
///
/// `block_align` and `byte_rate` are derived, never stored, so a format can
/// not disagree with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// 1 = mono, 2 = stereo.
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Frames per second in Hz.
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn new(channels: u16, bits_per_sample: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            bits_per_sample,
            sample_rate,
        }
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if ![1, 2].contains(&self.channels) {
            return Err(StreamError::InvalidFormat(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(StreamError::InvalidFormat(format!(
                "bits per sample must be a non-zero multiple of 8, got {}",
                self.bits_per_sample
            )));
        }
        if self.sample_rate == 0 {
            return Err(StreamError::InvalidFormat("sample rate must be positive".into()));
        }
        if self.sample_rate as u64 * self.block_align() as u64 > u32::MAX as u64 {
            return Err(StreamError::InvalidFormat(format!(
                "byte rate of {} Hz x {} bytes per frame does not fit in 32 bits",
                self.sample_rate,
                self.block_align()
            )));
        }
        Ok(())
    }

    /// Bytes per frame: `channels * bits_per_sample / 8`.
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    /// Bytes per second: `sample_rate * block_align`.
    ///
    /// Saturates for formats that `validate` rejects.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(self.block_align() as u32)
    }

    /// Playing time of `bytes` of audio in milliseconds.
    pub fn duration_ms(&self, bytes: u64) -> u64 {
        let byte_rate = self.byte_rate() as u64;
        if byte_rate == 0 {
            return 0;
        }
        bytes * 1000 / byte_rate
    }

    /// Byte count covering `secs` of audio, rounded down to a whole frame.
    pub fn bytes_for_secs(&self, secs: f64) -> usize {
        let raw = (self.byte_rate() as f64 * secs) as usize;
        let align = self.block_align().max(1) as usize;
        raw - raw % align
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            channels: 2,
            bits_per_sample: 16,
            sample_rate: 44100,
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz / {}-bit / {}",
            self.sample_rate,
            self.bits_per_sample,
            if self.channels == 1 { "mono" } else { "stereo" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields() {
        let format = AudioFormat::new(2, 16, 48000);
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.byte_rate(), 192000);

        let mono = AudioFormat::new(1, 16, 8000);
        assert_eq!(mono.block_align(), 2);
        assert_eq!(mono.byte_rate(), 16000);
    }

    #[test]
    fn rejects_invalid_formats() {
        assert!(AudioFormat::new(3, 16, 48000).validate().is_err());
        assert!(AudioFormat::new(1, 12, 48000).validate().is_err());
        assert!(AudioFormat::new(1, 0, 48000).validate().is_err());
        assert!(AudioFormat::new(2, 24, 0).validate().is_err());
        assert!(AudioFormat::new(2, 24, 96000).validate().is_ok());
    }

    #[test]
    fn rejects_byte_rate_overflow() {
        let format = AudioFormat::new(2, 16, 3_000_000_000);
        assert!(matches!(format.validate(), Err(StreamError::InvalidFormat(_))));
        assert_eq!(format.byte_rate(), u32::MAX);

        // 4 bytes per frame: the largest rate that still fits.
        assert!(AudioFormat::new(2, 16, u32::MAX / 4).validate().is_ok());
    }

    #[test]
    fn duration_uses_u64_math() {
        let format = AudioFormat::new(2, 16, 44100);
        // Large enough to overflow 32-bit intermediate math.
        let bytes = 3_000_000_000u64;
        assert_eq!(format.duration_ms(bytes), bytes * 1000 / 176400);
        assert_eq!(format.duration_ms(176400), 1000);
    }

    #[test]
    fn block_sizes_are_frame_aligned() {
        let format = AudioFormat::new(1, 16, 8000);
        assert_eq!(format.bytes_for_secs(0.5), 8000);
        assert_eq!(format.bytes_for_secs(4.0), 64000);

        let stereo24 = AudioFormat::new(2, 24, 44100);
        assert_eq!(stereo24.bytes_for_secs(0.001) % 6, 0);
    }
}
