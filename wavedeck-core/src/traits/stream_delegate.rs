use crate::models::error::StreamError;
use crate::models::state::{CaptureState, FinishReason, PlaybackState};

/// Event delegate for stream notifications.
///
/// Methods may be called from the controller thread, the playback monitor
/// thread or the device callback thread, never with an engine lock held.
/// Implementations should marshal to a UI thread if needed.
pub trait StreamDelegate: Send + Sync {
    fn on_capture_state_changed(&self, state: CaptureState);

    fn on_playback_state_changed(&self, state: PlaybackState);

    /// Called when an error occurs away from a controller call, e.g. a
    /// failed resubmit on the callback thread.
    fn on_error(&self, error: &StreamError);

    fn on_playback_finished(&self, reason: FinishReason);
}
