use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use crate::models::error::StreamError;

/// Seekable byte source a playback stream reads from.
pub trait SourceStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> SourceStream for T {}

/// Open a WAV file for playback.
///
/// Failing here aborts playback before any device is touched.
pub fn open_wave_file(path: &Path) -> Result<Box<dyn SourceStream>, StreamError> {
    let file = File::open(path)
        .map_err(|e| StreamError::io(&format!("failed to open {}", path.display()), e))?;
    Ok(Box::new(BufReader::new(file)))
}
