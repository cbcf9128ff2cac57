//! WAV container utilities.
//!
//! Writes the canonical 44-byte RIFF header with placeholder sizes at stream
//! start, patches the two size fields in place at stream end, and parses the
//! header back for playback.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::models::error::StreamError;
use crate::models::format::AudioFormat;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Offset of the RIFF chunk size (file size - 8).
pub const CHUNK_SIZE_OFFSET: u64 = 4;

/// Offset of the `data` sub-chunk size.
pub const DATA_SIZE_OFFSET: u64 = 40;

const PCM_FORMAT_CODE: u16 = 1;
const PCM_FMT_CHUNK_SIZE: u32 = 16;

/// Parsed header of a PCM WAV stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveHeader {
    pub format: AudioFormat,
    /// Audio bytes in the `data` chunk.
    pub data_size: u32,
}

impl WaveHeader {
    /// Playing time of the data chunk in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.format.duration_ms(self.data_size as u64)
    }
}

/// Generate a 44-byte WAV RIFF header.
///
/// Format: PCM (format code 1), little-endian.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    chunk size = 36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * block_align
/// [32-33]  block_align = channels * bits_per_sample / 8
/// [34-35]  bits_per_sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let mut header = header_placeholder(format);
    patch_data_size(&mut header, data_size);
    patch_chunk_size(&mut header, data_size);
    header
}

/// Header written before any audio exists: both size fields are zero and
/// are patched by [`finalize`] once the byte count is known.
pub fn header_placeholder(format: &AudioFormat) -> [u8; WAV_HEADER_SIZE] {
    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&PCM_FMT_CHUNK_SIZE.to_le_bytes());
    header[20..22].copy_from_slice(&PCM_FORMAT_CODE.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");

    header
}

/// Patch the data-size field at offset 40.
pub fn patch_data_size(header: &mut [u8], data_size: u32) {
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
}

/// Patch the RIFF chunk size at offset 4 for `data_size` audio bytes.
pub fn patch_chunk_size(header: &mut [u8], data_size: u32) {
    let chunk_size = (WAV_HEADER_SIZE as u32 - 8).saturating_add(data_size);
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
}

/// Rewrite the two size fields of a header already written at the start of
/// `stream`, then leave the cursor at the end of the stream.
///
/// Only offsets 40 and 4 are touched; the rest of the stream is left as is.
pub fn finalize<W: Write + Seek + ?Sized>(stream: &mut W, total_audio_bytes: u64) -> Result<(), StreamError> {
    let data_size = u32::try_from(total_audio_bytes)
        .ok()
        .filter(|size| size.checked_add(WAV_HEADER_SIZE as u32 - 8).is_some())
        .ok_or_else(|| {
            StreamError::Io(format!(
                "{} audio bytes exceed the 4 GiB WAV limit",
                total_audio_bytes
            ))
        })?;
    let chunk_size = WAV_HEADER_SIZE as u32 - 8 + data_size;

    stream
        .seek(SeekFrom::Start(DATA_SIZE_OFFSET))
        .map_err(|e| StreamError::io("seek to data size", e))?;
    stream
        .write_all(&data_size.to_le_bytes())
        .map_err(|e| StreamError::io("patch data size", e))?;

    stream
        .seek(SeekFrom::Start(CHUNK_SIZE_OFFSET))
        .map_err(|e| StreamError::io("seek to chunk size", e))?;
    stream
        .write_all(&chunk_size.to_le_bytes())
        .map_err(|e| StreamError::io("patch chunk size", e))?;

    stream
        .seek(SeekFrom::End(0))
        .map_err(|e| StreamError::io("seek to end", e))?;
    stream.flush().map_err(|e| StreamError::io("flush", e))?;
    Ok(())
}

/// Read and validate the 44-byte header at the current position of
/// `stream`, leaving the cursor on the first audio byte.
///
/// Fails with `MalformedHeader` on a short read, wrong magic, a non-PCM or
/// invalid format, a byte rate that is zero or disagrees with the format,
/// or a data size larger than what remains in the stream.
pub fn parse_header<R: Read + Seek + ?Sized>(stream: &mut R) -> Result<WaveHeader, StreamError> {
    let mut header = [0u8; WAV_HEADER_SIZE];
    stream.read_exact(&mut header).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => StreamError::MalformedHeader(format!(
            "stream is shorter than the {}-byte header",
            WAV_HEADER_SIZE
        )),
        _ => StreamError::io("read header", e),
    })?;

    for (offset, magic) in [(0, b"RIFF"), (8, b"WAVE"), (12, b"fmt "), (36, b"data")] {
        if &header[offset..offset + 4] != magic {
            return Err(StreamError::MalformedHeader(format!(
                "expected {:?} at offset {}",
                String::from_utf8_lossy(magic),
                offset
            )));
        }
    }

    let format_code = read_u16(&header, 20);
    if format_code != PCM_FORMAT_CODE {
        return Err(StreamError::MalformedHeader(format!(
            "format code {} is not PCM",
            format_code
        )));
    }

    let format = AudioFormat {
        channels: read_u16(&header, 22),
        sample_rate: read_u32(&header, 24),
        bits_per_sample: read_u16(&header, 34),
    };
    format
        .validate()
        .map_err(|e| StreamError::MalformedHeader(e.to_string()))?;

    let byte_rate = read_u32(&header, 28);
    if byte_rate == 0 {
        return Err(StreamError::MalformedHeader("byte rate is zero".into()));
    }
    if byte_rate != format.byte_rate() {
        return Err(StreamError::MalformedHeader(format!(
            "byte rate {} does not match {} ({} expected)",
            byte_rate,
            format,
            format.byte_rate()
        )));
    }
    let block_align = read_u16(&header, 32);
    if block_align != format.block_align() {
        return Err(StreamError::MalformedHeader(format!(
            "block align {} does not match {}",
            block_align, format
        )));
    }

    let data_size = read_u32(&header, 40);
    let remaining = remaining_len(stream)?;
    if data_size as u64 > remaining {
        return Err(StreamError::MalformedHeader(format!(
            "data size {} exceeds the {} bytes left in the stream",
            data_size, remaining
        )));
    }

    Ok(WaveHeader { format, data_size })
}

/// Bytes between the current position and the end of `stream`.
pub(crate) fn remaining_len<S: Seek + ?Sized>(stream: &mut S) -> Result<u64, StreamError> {
    let position = stream
        .stream_position()
        .map_err(|e| StreamError::io("query position", e))?;
    let end = stream
        .seek(SeekFrom::End(0))
        .map_err(|e| StreamError::io("seek to end", e))?;
    stream
        .seek(SeekFrom::Start(position))
        .map_err(|e| StreamError::io("restore position", e))?;
    Ok(end.saturating_sub(position))
}

fn read_u16(header: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([header[offset], header[offset + 1]])
}

fn read_u32(header: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        header[offset],
        header[offset + 1],
        header[offset + 2],
        header[offset + 3],
    ])
}
