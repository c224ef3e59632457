pub mod controller;
pub mod state;

pub use controller::{SessionController, SessionEvent, SessionPlan};
pub use state::{PlaybackSession, PlaybackStatus, SessionCategory};
