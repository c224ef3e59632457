//! Waveform visualization driver.
//!
//! A continuous-phase accumulator renders a sinusoidal trace, two pulsing
//! channel indicators and expanding beat rings. The phase advances once per
//! rendered frame while the session is active, so visual speed follows the
//! host's frame cadence rather than wall-clock time. While inactive the
//! last frame is retained unchanged; reactivation resumes from the retained
//! phase for visual continuity across pause/resume.

use serde::Serialize;
use std::f32::consts::PI;

/// Phase advance per rendered frame.
const PHASE_STEP: f32 = 0.1;

/// Horizontal sampling step of the waveform trace, in pixels.
const WAVEFORM_STEP: f32 = 2.0;

const DEFAULT_COLOR: &str = "#8b5cf6";

/// Display color for a focus level; a total map with a defined default for
/// unmapped levels.
pub fn color_for_level(level: u8) -> &'static str {
    match level {
        1 => "#f59e0b",
        3 => "#10b981",
        10 => "#3b82f6",
        12 => "#8b5cf6",
        15 => "#ec4899",
        21 => "#ef4444",
        _ => DEFAULT_COLOR,
    }
}

/// Per-frame inputs from the session UI. The driver is a one-way sink; it
/// produces frames and nothing else.
#[derive(Debug, Clone, Copy)]
pub struct VisualizerInput {
    pub frequency: f32,
    pub amplitude: f32,
    pub is_active: bool,
    pub focus_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelIndicator {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatRing {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub opacity: f32,
}

/// One rendered frame. The waveform polyline and beat rings are empty when
/// the frame was computed in the inactive state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizerFrame {
    pub waveform: Vec<[f32; 2]>,
    pub left_indicator: ChannelIndicator,
    pub right_indicator: ChannelIndicator,
    pub beat_rings: Vec<BeatRing>,
    pub color: &'static str,
}

/// Lazy, infinite, restartable frame sequence. Call [`render`] (or pull from
/// the `Iterator` impl) roughly once per display frame; no exact rate is
/// assumed.
///
/// [`render`]: WaveformVisualizer::render
pub struct WaveformVisualizer {
    width: f32,
    height: f32,
    input: VisualizerInput,
    phase: f32,
    last_frame: Option<VisualizerFrame>,
}

impl WaveformVisualizer {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            input: VisualizerInput {
                frequency: 0.0,
                amplitude: 1.0,
                is_active: false,
                focus_level: 1,
            },
            phase: 0.0,
            last_frame: None,
        }
    }

    /// Replaces the input props. Takes effect on the next rendered frame.
    pub fn apply(&mut self, input: VisualizerInput) {
        self.input = input;
    }

    pub fn set_active(&mut self, is_active: bool) {
        self.input.is_active = is_active;
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Renders the next frame. Advances phase only while active; while
    /// inactive the previously rendered frame is returned unchanged, so
    /// stopping is immediate and side-effect-free.
    pub fn render(&mut self) -> VisualizerFrame {
        if self.input.is_active {
            self.phase += PHASE_STEP;
            let frame = self.compute_frame();
            self.last_frame = Some(frame.clone());
            return frame;
        }

        match &self.last_frame {
            Some(frame) => frame.clone(),
            None => {
                let frame = self.compute_frame();
                self.last_frame = Some(frame.clone());
                frame
            }
        }
    }

    fn compute_frame(&self) -> VisualizerFrame {
        let color = color_for_level(self.input.focus_level);

        VisualizerFrame {
            waveform: if self.input.is_active {
                self.waveform_points()
            } else {
                Vec::new()
            },
            left_indicator: self.indicator(self.width * 0.2, 0.0),
            right_indicator: self.indicator(self.width * 0.8, PI),
            beat_rings: if self.input.is_active {
                vec![
                    BeatRing {
                        x: self.width * 0.5,
                        y: self.height * 0.3,
                        radius: 20.0 + (self.phase * 0.5).sin() * 10.0,
                        opacity: 0.6,
                    },
                    BeatRing {
                        x: self.width * 0.5,
                        y: self.height * 0.3,
                        radius: 40.0 + (self.phase * 0.5 + PI).sin() * 15.0,
                        opacity: 0.4,
                    },
                ]
            } else {
                Vec::new()
            },
            color,
        }
    }

    /// Sine trace across the middle 80% of the viewport:
    /// `y = center + sin(normalizedX * 4π + phase) * amplitude * 20`.
    fn waveform_points(&self) -> Vec<[f32; 2]> {
        let center_y = self.height * 0.3;
        let wave_width = self.width * 0.8;
        let start_x = self.width * 0.1;

        let mut points = Vec::with_capacity((wave_width / WAVEFORM_STEP) as usize + 1);
        let mut x = 0.0;
        while x <= wave_width {
            let normalized_x = x / wave_width;
            let wave_y =
                (normalized_x * PI * 4.0 + self.phase).sin() * self.input.amplitude * 20.0;
            points.push([start_x + x, center_y + wave_y]);
            x += WAVEFORM_STEP;
        }
        points
    }

    /// Channel indicator pulsing at twice the phase rate; the right channel
    /// runs half a cycle behind the left.
    fn indicator(&self, x: f32, phase_offset: f32) -> ChannelIndicator {
        let (radius, opacity) = if self.input.is_active {
            (8.0 + (self.phase * 2.0 + phase_offset).sin() * 2.0, 0.8)
        } else {
            (6.0, 0.4)
        };
        ChannelIndicator {
            x,
            y: self.height * 0.5,
            radius,
            opacity,
        }
    }
}

impl Iterator for WaveformVisualizer {
    type Item = VisualizerFrame;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.render())
    }
}
