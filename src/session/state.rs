use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
    /// Terminal; reported once, then the controller returns to `Idle`.
    Completed,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        PlaybackStatus::Idle
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionCategory {
    Focus,
    Relaxation,
    Creativity,
    Sleep,
}

impl SessionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionCategory::Focus => "focus",
            SessionCategory::Relaxation => "relaxation",
            SessionCategory::Creativity => "creativity",
            SessionCategory::Sleep => "sleep",
        }
    }
}

/// Snapshot of the single active playback session. At most one exists per
/// controller; starting a new session tears down the previous one first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSession {
    pub id: String,
    pub focus_level: u8,
    pub title: String,
    pub category: SessionCategory,
    pub frequency_label: String,
    pub brainwave_label: String,
    pub total_duration_secs: u64,
    /// Advances once per tick while playing; frozen while paused.
    /// Invariant: `0 <= elapsed_secs <= total_duration_secs`.
    pub elapsed_secs: u64,
    pub status: PlaybackStatus,
    /// User-chosen volume in [0, 1]. Muting never alters this value.
    pub volume: f32,
    pub is_muted: bool,
    pub started_at: DateTime<Utc>,
}

impl PlaybackSession {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn remaining_secs(&self) -> u64 {
        self.total_duration_secs.saturating_sub(self.elapsed_secs)
    }

    /// What the gain stage actually receives: zero while muted, the stored
    /// volume otherwise.
    pub fn effective_volume(&self) -> f32 {
        if self.is_muted {
            0.0
        } else {
            self.volume
        }
    }
}
