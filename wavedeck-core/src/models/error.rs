use thiserror::Error;

/// Errors surfaced by the stream engines, the buffer pool and WAV I/O.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("device not available")]
    DeviceNotAvailable,

    /// Device busy or format unsupported. The stream stays closed.
    #[error("failed to open device: {0}")]
    DeviceOpen(String),

    /// The device accepted the open but refused to start.
    #[error("failed to start device: {0}")]
    DeviceStart(String),

    /// Buffer allocation or header preparation was rejected by the device.
    #[error("buffer registration failed: {0}")]
    BufferRegistration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("malformed WAV header: {0}")]
    MalformedHeader(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Attempt to release or mutate a buffer the device still owns.
    #[error("buffer {0} is still owned by the device")]
    OwnershipViolation(usize),

    #[error("device did not return {0} buffer(s) before the drain timeout")]
    DrainTimeout(usize),
}

impl StreamError {
    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {}", context, err))
    }
}
