use thiserror::Error;

/// Failures surfaced by the synthesis engine and the playback controller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The audio output device could not be acquired, or the engine has been
    /// disposed. Never retried automatically; the caller may retry on an
    /// explicit user action.
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),

    /// The caller handed the controller a configuration it refuses to run,
    /// such as a zero duration or an out-of-range rating. The engine itself
    /// clamps rather than failing (a non-positive duration plays until
    /// explicitly stopped).
    #[error("invalid session configuration: {0}")]
    InvalidConfiguration(String),

    /// An operation required an active session and none exists.
    #[error("no active session")]
    NoActiveSession,

    /// The completion record could not be saved. Audio is already torn down
    /// by the time this is returned; playback state does not roll back.
    #[error("failed to persist session record")]
    Persistence(#[source] anyhow::Error),
}
