use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

use crate::tones::{ToneConfig, WaveShape};

/// Headroom scaling applied to every sample to prevent clipping.
const AMPLITUDE: f32 = 0.15;

const SAMPLE_RATE: u32 = 44100;

/// Binaural beat source: two carriers a few Hz apart rendered as interleaved
/// stereo, so each ear hears exactly one tone.
///
/// Both channels advance from the same sample clock and start at phase zero;
/// the perceptual beat depends on that initial alignment. Frequencies are
/// taken as-is (garbage in, garbage out) — range validation is the caller's
/// concern.
pub struct BinauralTone {
    left_freq: f32,
    right_freq: f32,
    shape: WaveShape,
    sample_rate: u32,
    left_phase: f32,
    right_phase: f32,
    num_sample: usize,
    /// Interleaved sample bound; `None` plays until the sink is stopped.
    limit: Option<usize>,
    duration: Option<Duration>,
}

impl BinauralTone {
    pub fn new(config: &ToneConfig) -> Self {
        // A zero duration means unbounded playback; the sink owner decides
        // when to stop.
        let (limit, duration) = if config.duration_ms > 0 {
            let frames = config.duration_ms * u64::from(SAMPLE_RATE) / 1000;
            (
                Some(frames as usize * 2),
                Some(Duration::from_millis(config.duration_ms)),
            )
        } else {
            (None, None)
        };

        Self {
            left_freq: config.left_frequency,
            right_freq: config.right_frequency,
            shape: config.wave_shape,
            sample_rate: SAMPLE_RATE,
            left_phase: 0.0,
            right_phase: 0.0,
            num_sample: 0,
            limit,
            duration,
        }
    }
}

/// Evaluates one wave shape at a normalized phase in [0, 1). Both channels
/// are evaluated from phase zero on the first frame, so left and right begin
/// in phase with each other regardless of shape.
fn shape_sample(shape: WaveShape, phase: f32) -> f32 {
    match shape {
        WaveShape::Sine => (2.0 * PI * phase).sin(),
        WaveShape::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        WaveShape::Triangle => 1.0 - 4.0 * ((phase + 0.25).fract() - 0.5).abs(),
        WaveShape::Sawtooth => 2.0 * (phase + 0.5).fract() - 1.0,
    }
}

impl Iterator for BinauralTone {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(limit) = self.limit {
            if self.num_sample >= limit {
                return None;
            }
        }

        // Even samples are the left channel, odd the right. Phases advance
        // once per stereo frame, after the right sample is emitted.
        let sample = if self.num_sample % 2 == 0 {
            shape_sample(self.shape, self.left_phase)
        } else {
            let value = shape_sample(self.shape, self.right_phase);
            let rate = self.sample_rate as f32;
            self.left_phase = (self.left_phase + self.left_freq / rate).fract();
            self.right_phase = (self.right_phase + self.right_freq / rate).fract();
            value
        };

        self.num_sample += 1;
        Some(sample * AMPLITUDE)
    }
}

impl Source for BinauralTone {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        self.duration
    }
}
