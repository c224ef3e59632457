//! Focus-level frequency table and tone configuration.
//!
//! Each focus level maps to a pair of carrier frequencies a few Hz apart;
//! the difference between them is the perceived binaural beat.

use serde::{Deserialize, Serialize};

/// Oscillator wave shape, applied to both channels of a binaural pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaveShape {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl Default for WaveShape {
    fn default() -> Self {
        WaveShape::Sine
    }
}

/// Conventional brainwave band labels. The border variants describe
/// transition states between two adjacent bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Brainwave {
    Delta,
    ThetaDelta,
    DeepTheta,
    Theta,
    AlphaTheta,
    Alpha,
    Beta,
    Gamma,
}

impl Brainwave {
    pub fn label(&self) -> &'static str {
        match self {
            Brainwave::Delta => "Delta",
            Brainwave::ThetaDelta => "Theta/Delta",
            Brainwave::DeepTheta => "Deep Theta",
            Brainwave::Theta => "Theta",
            Brainwave::AlphaTheta => "Alpha/Theta",
            Brainwave::Alpha => "Alpha",
            Brainwave::Beta => "Beta",
            Brainwave::Gamma => "Gamma",
        }
    }
}

/// Nominal band ranges in Hz (display only; border states are excluded).
pub const BAND_RANGES_HZ: [(Brainwave, f32, f32); 5] = [
    (Brainwave::Delta, 0.5, 4.0),
    (Brainwave::Theta, 4.0, 8.0),
    (Brainwave::Alpha, 8.0, 14.0),
    (Brainwave::Beta, 14.0, 30.0),
    (Brainwave::Gamma, 30.0, 100.0),
];

/// Immutable description of one binaural tone pair. Built from a focus-level
/// lookup at session-start time and discarded when the session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneConfig {
    pub left_frequency: f32,
    pub right_frequency: f32,
    /// Total playback duration. `0` means play until explicitly stopped.
    pub duration_ms: u64,
    /// Output gain in [0, 1].
    pub volume: f32,
    pub wave_shape: WaveShape,
}

impl ToneConfig {
    /// Default configuration for a focus level; unmapped levels fall back
    /// to level 1.
    pub fn for_focus_level(level: u8) -> Self {
        let entry = lookup(level);
        Self {
            left_frequency: entry.left_frequency,
            right_frequency: entry.right_frequency,
            duration_ms: entry.default_duration_min * 60 * 1000,
            volume: entry.default_volume,
            wave_shape: WaveShape::Sine,
        }
    }

    /// Perceived beat frequency in Hz.
    pub fn beat_frequency(&self) -> f32 {
        (self.right_frequency - self.left_frequency).abs()
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }
}

/// One row of the static focus-level table.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusLevelEntry {
    pub level: u8,
    pub brainwave: Brainwave,
    pub left_frequency: f32,
    pub right_frequency: f32,
    pub beat_frequency: f32,
    pub default_duration_min: u64,
    pub default_volume: f32,
}

impl FocusLevelEntry {
    /// Display label for the beat frequency, e.g. "10 Hz".
    pub fn frequency_label(&self) -> String {
        format!("{} Hz", self.beat_frequency)
    }
}

/// Carrier pairs per focus level. Deeper levels use lower carriers and
/// slower beats, walking the Beta band down to the Theta/Delta border.
pub const FOCUS_LEVELS: [FocusLevelEntry; 6] = [
    FocusLevelEntry {
        level: 1,
        brainwave: Brainwave::Beta,
        left_frequency: 220.0,
        right_frequency: 235.0,
        beat_frequency: 15.0,
        default_duration_min: 15,
        default_volume: 0.3,
    },
    FocusLevelEntry {
        level: 3,
        brainwave: Brainwave::Alpha,
        left_frequency: 200.0,
        right_frequency: 210.0,
        beat_frequency: 10.0,
        default_duration_min: 20,
        default_volume: 0.25,
    },
    FocusLevelEntry {
        level: 10,
        brainwave: Brainwave::AlphaTheta,
        left_frequency: 180.0,
        right_frequency: 188.0,
        beat_frequency: 8.0,
        default_duration_min: 25,
        default_volume: 0.2,
    },
    FocusLevelEntry {
        level: 12,
        brainwave: Brainwave::Theta,
        left_frequency: 160.0,
        right_frequency: 166.0,
        beat_frequency: 6.0,
        default_duration_min: 30,
        default_volume: 0.2,
    },
    FocusLevelEntry {
        level: 15,
        brainwave: Brainwave::DeepTheta,
        left_frequency: 140.0,
        right_frequency: 145.0,
        beat_frequency: 5.0,
        default_duration_min: 35,
        default_volume: 0.15,
    },
    FocusLevelEntry {
        level: 21,
        brainwave: Brainwave::ThetaDelta,
        left_frequency: 120.0,
        right_frequency: 123.0,
        beat_frequency: 3.0,
        default_duration_min: 40,
        default_volume: 0.15,
    },
];

/// Total lookup: unmapped levels fall back to the level 1 entry.
pub fn lookup(level: u8) -> &'static FocusLevelEntry {
    FOCUS_LEVELS
        .iter()
        .find(|entry| entry.level == level)
        .unwrap_or(&FOCUS_LEVELS[0])
}
