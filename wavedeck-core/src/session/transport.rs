use std::time::{Duration, Instant};

use serde::Serialize;

/// Transport clock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Idle,
    Active,
    Paused,
}

/// Pause-exclusive elapsed-time bookkeeping for one capture or playback run.
///
/// ```text
/// idle ──start──→ active ──pause──→ paused
///   ↑               │   ←─resume──     │
///   └─────stop──────┴──────stop────────┘
/// ```
///
/// Every transition has an `*_at(now)` form so the arithmetic can be driven
/// with synthetic instants. Commands issued in the wrong state return
/// `false` and change nothing.
#[derive(Debug, Clone)]
pub struct TransportController {
    state: TransportState,
    started_at: Option<Instant>,
    paused_duration: Duration,
    last_pause_time: Option<Instant>,
}

impl Default for TransportController {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportController {
    pub fn new() -> Self {
        Self {
            state: TransportState::Idle,
            started_at: None,
            paused_duration: Duration::ZERO,
            last_pause_time: None,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransportState::Active
    }

    pub fn is_paused(&self) -> bool {
        self.state == TransportState::Paused
    }

    pub fn start(&mut self) -> bool {
        self.start_at(Instant::now())
    }

    pub fn start_at(&mut self, now: Instant) -> bool {
        if self.state != TransportState::Idle {
            return false;
        }
        self.state = TransportState::Active;
        self.started_at = Some(now);
        self.paused_duration = Duration::ZERO;
        self.last_pause_time = None;
        true
    }

    pub fn pause(&mut self) -> bool {
        self.pause_at(Instant::now())
    }

    pub fn pause_at(&mut self, now: Instant) -> bool {
        if self.state != TransportState::Active {
            return false;
        }
        self.state = TransportState::Paused;
        self.last_pause_time = Some(now);
        true
    }

    pub fn resume(&mut self) -> bool {
        self.resume_at(Instant::now())
    }

    pub fn resume_at(&mut self, now: Instant) -> bool {
        if self.state != TransportState::Paused {
            return false;
        }
        if let Some(paused_at) = self.last_pause_time.take() {
            self.paused_duration += now.saturating_duration_since(paused_at);
        }
        self.state = TransportState::Active;
        true
    }

    /// Return to idle. Elapsed time reads zero afterwards.
    pub fn stop(&mut self) -> bool {
        if self.state == TransportState::Idle {
            return false;
        }
        *self = Self::new();
        true
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    /// Active time since start, excluding every pause interval, including
    /// one still in progress.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let Some(start) = self.started_at else {
            return Duration::ZERO;
        };
        // A running pause counts up to the moment it began.
        let end = match self.last_pause_time {
            Some(paused_at) => paused_at,
            None => now,
        };
        end.saturating_duration_since(start)
            .saturating_sub(self.paused_duration)
    }

    /// `total - elapsed`, clamped at zero.
    pub fn remaining_at(&self, total: Duration, now: Instant) -> Duration {
        total.saturating_sub(self.elapsed_at(now))
    }
}

/// Render a duration as `hh:mm:ss`, truncating sub-second parts.
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Render a remaining time as `hh:mm:ss`, rounded to the nearest second.
pub fn remaining_display(remaining: Duration) -> String {
    let rounded = (remaining.as_millis() + 500) / 1000;
    format_clock(Duration::from_secs(rounded as u64))
}
