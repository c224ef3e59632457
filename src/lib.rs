//! Binaural beat session engine.
//!
//! Generates two precisely tuned tones (one per stereo channel), manages the
//! lifecycle of a single playback session (start, pause/resume, stop,
//! auto-completion, volume/mute) and drives a phase-accumulator waveform
//! visualization synchronized to session state.

pub mod audio;
pub mod error;
pub mod session;
pub mod store;
pub mod tones;
pub mod viz;

pub use audio::{AudioEngineHandle, ToneOutput};
pub use error::SessionError;
pub use session::{
    PlaybackSession, PlaybackStatus, SessionCategory, SessionController, SessionEvent, SessionPlan,
};
pub use store::{Database, SessionRecord, SessionStore};
pub use tones::{FocusLevelEntry, ToneConfig, WaveShape};
pub use viz::{VisualizerFrame, VisualizerInput, WaveformVisualizer};
