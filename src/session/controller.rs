use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};
use uuid::Uuid;

use crate::{
    audio::ToneOutput,
    error::SessionError,
    session::state::{PlaybackSession, PlaybackStatus, SessionCategory},
    store::{SessionRecord, SessionStore},
    tones::{self, ToneConfig},
};

/// Output volume for a freshly started session.
const DEFAULT_SESSION_VOLUME: f32 = 0.3;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Start request from the UI collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlan {
    pub focus_level: u8,
    pub title: String,
    pub duration_secs: u64,
    pub category: SessionCategory,
}

/// Session lifecycle notifications. `Completed` is delivered at most once
/// per session, from exactly one of the tick loop or `complete`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SessionEvent {
    Started { session: PlaybackSession },
    Tick { elapsed_secs: u64, remaining_secs: u64 },
    Completed { record: SessionRecord },
    Stopped,
}

/// Orchestrates a single playback session atop the tone synthesis engine.
///
/// The 1 Hz tick owned here is authoritative for elapsed time and for
/// completion; the engine's own duration bound only silences audio at the
/// deadline and never reports completion, so the two timers can never race
/// to deliver the same event.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<Option<PlaybackSession>>>,
    engine: Arc<dyn ToneOutput>,
    store: Arc<dyn SessionStore>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn ToneOutput>, store: Arc<dyn SessionStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(None)),
            engine,
            store,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Read-only snapshot of the active session, if any.
    pub async fn snapshot(&self) -> Option<PlaybackSession> {
        self.state.lock().await.clone()
    }

    /// Builds a plan from the user's saved focus level, for when the UI does
    /// not supply one explicitly.
    pub async fn default_plan(&self) -> Result<SessionPlan, SessionError> {
        let level = self
            .store
            .read_current_focus_level()
            .await
            .map_err(SessionError::Persistence)?;
        let entry = tones::lookup(level);
        Ok(SessionPlan {
            focus_level: entry.level,
            title: format!("Focus {}", entry.level),
            duration_secs: entry.default_duration_min * 60,
            category: SessionCategory::Focus,
        })
    }

    /// Starts a new session, tearing down any active one first. On engine
    /// failure no session state is created, so the UI never shows a running
    /// timer without audio behind it.
    pub async fn start(&self, plan: SessionPlan) -> Result<PlaybackSession, SessionError> {
        if plan.duration_secs == 0 {
            return Err(SessionError::InvalidConfiguration(
                "duration_secs must be greater than zero".into(),
            ));
        }

        self.teardown_active().await;

        let entry = tones::lookup(plan.focus_level);
        let config = ToneConfig::for_focus_level(plan.focus_level)
            .with_duration_ms(plan.duration_secs * 1000)
            .with_volume(DEFAULT_SESSION_VOLUME);

        self.engine.start(config).await?;

        let session = PlaybackSession {
            id: Uuid::new_v4().to_string(),
            focus_level: plan.focus_level,
            title: plan.title,
            category: plan.category,
            frequency_label: entry.frequency_label(),
            brainwave_label: entry.brainwave.label().to_string(),
            total_duration_secs: plan.duration_secs,
            elapsed_secs: 0,
            status: PlaybackStatus::Playing,
            volume: DEFAULT_SESSION_VOLUME,
            is_muted: false,
            started_at: Utc::now(),
        };

        *self.state.lock().await = Some(session.clone());
        self.spawn_ticker().await;

        info!(
            "session started: focus level {} for {}s",
            session.focus_level, session.total_duration_secs
        );
        let _ = self.events.send(SessionEvent::Started {
            session: session.clone(),
        });

        Ok(session)
    }

    /// Stops the audio graph but preserves elapsed time. A no-op unless the
    /// session is currently playing.
    pub async fn pause(&self) -> Result<(), SessionError> {
        {
            let mut guard = self.state.lock().await;
            let session = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
            if session.status != PlaybackStatus::Playing {
                return Ok(());
            }
            session.status = PlaybackStatus::Paused;
        }

        self.cancel_ticker().await;
        self.engine.stop();
        Ok(())
    }

    /// Rebuilds the tone configuration with the remaining duration as the
    /// new stop offset and restarts the engine.
    pub async fn resume(&self) -> Result<(), SessionError> {
        let config = {
            let guard = self.state.lock().await;
            let session = guard.as_ref().ok_or(SessionError::NoActiveSession)?;
            if session.status != PlaybackStatus::Paused {
                return Ok(());
            }
            ToneConfig::for_focus_level(session.focus_level)
                .with_duration_ms(session.remaining_secs() * 1000)
                .with_volume(session.effective_volume())
        };

        self.engine.start(config).await?;

        {
            let mut guard = self.state.lock().await;
            if let Some(session) = guard.as_mut() {
                session.status = PlaybackStatus::Playing;
            }
        }
        self.spawn_ticker().await;
        Ok(())
    }

    /// Discards the session without recording a completion. Safe to call at
    /// any time, including when idle.
    pub async fn stop(&self) {
        self.teardown_active().await;
    }

    /// Explicit completion: tears the session down, reports the record to
    /// the persistence collaborator and returns it. A save failure is
    /// surfaced after teardown; the completion itself is never rolled back.
    pub async fn complete(
        &self,
        rating: Option<u8>,
        notes: Option<String>,
    ) -> Result<SessionRecord, SessionError> {
        if let Some(rating) = rating {
            if !(1..=5).contains(&rating) {
                return Err(SessionError::InvalidConfiguration(format!(
                    "rating must be between 1 and 5, got {rating}"
                )));
            }
        }

        let session = self
            .state
            .lock()
            .await
            .take()
            .ok_or(SessionError::NoActiveSession)?;

        self.cancel_ticker().await;
        self.engine.stop();

        let record = build_record(&session, rating, notes);
        let _ = self.events.send(SessionEvent::Completed {
            record: record.clone(),
        });

        self.store
            .append_session_record(&record)
            .await
            .map_err(SessionError::Persistence)?;

        info!("session completed: focus level {}", record.focus_level);
        Ok(record)
    }

    /// Updates the stored volume; applied to the engine immediately unless
    /// muted.
    pub async fn set_volume(&self, volume: f32) -> Result<(), SessionError> {
        let clamped = volume.clamp(0.0, 1.0);
        let mut guard = self.state.lock().await;
        let session = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
        session.volume = clamped;
        if !session.is_muted {
            self.engine.set_volume(clamped);
        }
        Ok(())
    }

    /// Flips mute and applies zero or the stored volume immediately. Muting
    /// never alters the stored volume. Returns the new mute state.
    pub async fn toggle_mute(&self) -> Result<bool, SessionError> {
        let mut guard = self.state.lock().await;
        let session = guard.as_mut().ok_or(SessionError::NoActiveSession)?;
        session.is_muted = !session.is_muted;
        self.engine.set_volume(session.effective_volume());
        Ok(session.is_muted)
    }

    /// Tears down whatever session is active: ticker first, then the audio
    /// graph. Emits `Stopped` only if there was something to stop.
    async fn teardown_active(&self) {
        let had_session = self.state.lock().await.take().is_some();
        self.cancel_ticker().await;
        self.engine.stop();
        if had_session {
            let _ = self.events.send(SessionEvent::Stopped);
        }
    }

    /// Replaces the tick task. At most one outstanding ticker exists: the
    /// owned handle is always aborted before a new one is installed.
    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let engine = self.engine.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            // First tick fires one interval from now, so each tick marks one
            // whole second of playback.
            let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
            loop {
                interval.tick().await;

                let finished = {
                    let mut guard = state.lock().await;
                    let Some(session) = guard.as_mut() else { break };
                    if session.status != PlaybackStatus::Playing {
                        break;
                    }

                    session.elapsed_secs =
                        (session.elapsed_secs + 1).min(session.total_duration_secs);

                    if session.elapsed_secs >= session.total_duration_secs {
                        session.status = PlaybackStatus::Completed;
                        // Take the state so no other path can report this
                        // session again.
                        guard.take()
                    } else {
                        let _ = events.send(SessionEvent::Tick {
                            elapsed_secs: session.elapsed_secs,
                            remaining_secs: session.remaining_secs(),
                        });
                        None
                    }
                };

                if let Some(session) = finished {
                    // The tick is authoritative for completion; the engine's
                    // duration bound has merely silenced the audio by now.
                    engine.stop();

                    let record = build_record(&session, None, None);
                    let _ = events.send(SessionEvent::Completed {
                        record: record.clone(),
                    });
                    if let Err(err) = store.append_session_record(&record).await {
                        error!("failed to persist completed session: {err:#}");
                    }
                    break;
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}

fn build_record(
    session: &PlaybackSession,
    rating: Option<u8>,
    notes: Option<String>,
) -> SessionRecord {
    SessionRecord {
        id: Uuid::new_v4().to_string(),
        focus_level: session.focus_level,
        duration_minutes: session.total_duration_secs as f64 / 60.0,
        completed_at: Utc::now(),
        rating,
        notes,
        frequency_label: session.frequency_label.clone(),
        brainwave_label: session.brainwave_label.clone(),
        category: session.category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex as StdMutex,
    };

    #[derive(Debug, Clone, PartialEq)]
    enum EngineCall {
        Start(ToneConfig),
        Stop,
        SetVolume(f32),
    }

    #[derive(Default)]
    struct FakeEngine {
        calls: StdMutex<Vec<EngineCall>>,
        playing: AtomicBool,
        fail_start: AtomicBool,
    }

    impl FakeEngine {
        fn calls(&self) -> Vec<EngineCall> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn starts(&self) -> Vec<ToneConfig> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    EngineCall::Start(config) => Some(config),
                    _ => None,
                })
                .collect()
        }

        fn stop_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| matches!(call, EngineCall::Stop))
                .count()
        }

        fn volumes(&self) -> Vec<f32> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    EngineCall::SetVolume(volume) => Some(volume),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ToneOutput for FakeEngine {
        async fn start(&self, config: ToneConfig) -> Result<(), SessionError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(SessionError::AudioUnavailable("no output device".into()));
            }
            // Mirrors the real engine: a prior graph is torn down before the
            // new one is built, so at most one exists afterwards.
            self.playing.store(true, Ordering::SeqCst);
            self.calls
                .lock()
                .expect("calls lock")
                .push(EngineCall::Start(config));
            Ok(())
        }

        fn stop(&self) {
            self.playing.store(false, Ordering::SeqCst);
            self.calls.lock().expect("calls lock").push(EngineCall::Stop);
        }

        fn set_volume(&self, volume: f32) {
            self.calls
                .lock()
                .expect("calls lock")
                .push(EngineCall::SetVolume(volume));
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        fn current_config(&self) -> Option<ToneConfig> {
            self.starts().last().cloned()
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: StdMutex<Vec<SessionRecord>>,
        fail_append: AtomicBool,
        level: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn append_session_record(&self, record: &SessionRecord) -> anyhow::Result<()> {
            if self.fail_append.load(Ordering::SeqCst) {
                return Err(anyhow!("disk full"));
            }
            // Appending raises the saved focus level, as the SQLite store
            // does.
            self.level
                .fetch_max(usize::from(record.focus_level), Ordering::SeqCst);
            self.records
                .lock()
                .expect("records lock")
                .push(record.clone());
            Ok(())
        }

        async fn read_current_focus_level(&self) -> anyhow::Result<u8> {
            Ok(self.level.load(Ordering::SeqCst) as u8)
        }
    }

    fn controller() -> (SessionController, Arc<FakeEngine>, Arc<MemoryStore>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let engine = Arc::new(FakeEngine::default());
        let store = Arc::new(MemoryStore::default());
        let controller = SessionController::new(engine.clone(), store.clone());
        (controller, engine, store)
    }

    fn plan(focus_level: u8, duration_secs: u64) -> SessionPlan {
        SessionPlan {
            focus_level,
            title: "Test Session".into(),
            duration_secs,
            category: SessionCategory::Focus,
        }
    }

    /// Lets the spawned ticker task observe newly advanced time.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_secs(secs: u64) {
        for _ in 0..secs {
            time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_is_rejected() {
        let (controller, engine, _) = controller();
        let result = controller.start(plan(1, 0)).await;
        assert!(matches!(result, Err(SessionError::InvalidConfiguration(_))));
        assert!(engine.starts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn starting_twice_keeps_a_single_graph() {
        let (controller, engine, _) = controller();
        controller.start(plan(1, 60)).await.expect("first start");
        controller.start(plan(3, 60)).await.expect("second start");

        // The prior session is fully torn down before the new graph exists.
        let calls = engine.calls();
        assert_eq!(
            calls.iter().filter(|c| matches!(c, EngineCall::Start(_))).count(),
            2
        );
        let second_start = calls
            .iter()
            .rposition(|c| matches!(c, EngineCall::Start(_)))
            .expect("second start position");
        assert!(calls[..second_start]
            .iter()
            .any(|c| matches!(c, EngineCall::Stop)));
        assert!(engine.is_playing());

        let snapshot = controller.snapshot().await.expect("active session");
        assert_eq!(snapshot.focus_level, 3);
        assert_eq!(snapshot.elapsed_secs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_then_resume_preserves_elapsed_exactly() {
        let (controller, _, _) = controller();
        controller.start(plan(3, 60)).await.expect("start");
        settle().await;
        advance_secs(5).await;

        controller.pause().await.expect("pause");
        let paused = controller.snapshot().await.expect("paused session");
        assert_eq!(paused.elapsed_secs, 5);
        assert_eq!(paused.status, PlaybackStatus::Paused);

        controller.resume().await.expect("resume");
        let resumed = controller.snapshot().await.expect("resumed session");
        assert_eq!(resumed.elapsed_secs, 5);
        assert_eq!(resumed.status, PlaybackStatus::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_passes_remaining_duration_to_engine() {
        let (controller, engine, _) = controller();
        controller.start(plan(3, 60)).await.expect("start");
        settle().await;
        advance_secs(5).await;

        controller.pause().await.expect("pause");
        controller.resume().await.expect("resume");

        let starts = engine.starts();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].duration_ms, 60_000);
        assert_eq!(starts[1].duration_ms, 55_000);
    }

    #[tokio::test(start_paused = true)]
    async fn ten_ticks_complete_a_ten_second_session() {
        let (controller, engine, store) = controller();
        controller.start(plan(1, 10)).await.expect("start");
        settle().await;
        advance_secs(10).await;

        assert!(controller.snapshot().await.is_none());
        assert_eq!(engine.stop_count(), 1);
        assert!(!engine.is_playing());
        assert_eq!(store.records.lock().expect("records").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_reported_exactly_once() {
        let (controller, _, store) = controller();
        let mut events = controller.subscribe();
        controller.start(plan(1, 3)).await.expect("start");
        settle().await;
        // Overshoot well past the deadline; the tick loop must not fire a
        // second completion.
        advance_secs(10).await;

        let completions = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| matches!(event, SessionEvent::Completed { .. }))
            .count();
        assert_eq!(completions, 1);
        assert_eq!(store.records.lock().expect("records").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_run_persists_one_record_with_plan_values() {
        let (controller, engine, store) = controller();
        controller.start(plan(3, 20 * 60)).await.expect("start");
        settle().await;
        advance_secs(20 * 60).await;

        let records = store.records.lock().expect("records").clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].focus_level, 3);
        assert_eq!(records[0].duration_minutes, 20.0);
        assert_eq!(records[0].rating, None);
        assert_eq!(records[0].brainwave_label, "Alpha");
        assert!(!engine.is_playing());
        assert!(controller.snapshot().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn mute_toggles_restore_effective_volume() {
        let (controller, engine, _) = controller();
        controller.start(plan(1, 60)).await.expect("start");

        controller.set_volume(0.7).await.expect("set volume");
        controller.toggle_mute().await.expect("mute");
        // Stored volume changes while muted, output stays silent.
        controller.set_volume(0.5).await.expect("set while muted");
        controller.toggle_mute().await.expect("unmute");

        assert_eq!(engine.volumes(), vec![0.7, 0.0, 0.5]);
        let session = controller.snapshot().await.expect("session");
        assert!(!session.is_muted);
        assert_eq!(session.volume, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_complete_records_rating_and_notes() {
        let (controller, engine, store) = controller();
        controller.start(plan(12, 30 * 60)).await.expect("start");

        let record = controller
            .complete(Some(5), Some("very deep".into()))
            .await
            .expect("complete");

        assert_eq!(record.rating, Some(5));
        assert_eq!(record.notes.as_deref(), Some("very deep"));
        assert_eq!(record.focus_level, 12);
        assert_eq!(engine.stop_count(), 1);
        assert!(controller.snapshot().await.is_none());
        assert_eq!(store.records.lock().expect("records").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_rating_is_rejected_before_teardown() {
        let (controller, engine, _) = controller();
        controller.start(plan(1, 60)).await.expect("start");

        let result = controller.complete(Some(6), None).await;
        assert!(matches!(result, Err(SessionError::InvalidConfiguration(_))));
        assert!(engine.is_playing());
        assert!(controller.snapshot().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_surfaces_after_teardown() {
        let (controller, engine, store) = controller();
        controller.start(plan(1, 60)).await.expect("start");
        store.fail_append.store(true, Ordering::SeqCst);

        let result = controller.complete(None, None).await;
        assert!(matches!(result, Err(SessionError::Persistence(_))));
        // Audio is stopped and state discarded regardless of the save.
        assert!(!engine.is_playing());
        assert!(controller.snapshot().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_without_recording() {
        let (controller, engine, store) = controller();
        controller.start(plan(1, 60)).await.expect("start");
        settle().await;
        advance_secs(3).await;

        controller.stop().await;
        assert!(controller.snapshot().await.is_none());
        assert!(!engine.is_playing());
        assert!(store.records.lock().expect("records").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_failure_leaves_controller_idle() {
        let (controller, engine, _) = controller();
        engine.fail_start.store(true, Ordering::SeqCst);

        let result = controller.start(plan(1, 60)).await;
        assert!(matches!(result, Err(SessionError::AudioUnavailable(_))));
        assert!(controller.snapshot().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_session_does_not_advance() {
        let (controller, _, _) = controller();
        controller.start(plan(1, 60)).await.expect("start");
        settle().await;
        advance_secs(2).await;

        controller.pause().await.expect("pause");
        advance_secs(30).await;

        let session = controller.snapshot().await.expect("session");
        assert_eq!(session.elapsed_secs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completing_a_deeper_level_updates_the_default_plan() {
        let (controller, _, store) = controller();
        store.level.store(1, Ordering::SeqCst);

        controller.start(plan(12, 30 * 60)).await.expect("start");
        controller.complete(Some(4), None).await.expect("complete");

        let next = controller.default_plan().await.expect("plan");
        assert_eq!(next.focus_level, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_completion_also_raises_saved_focus_level() {
        let (controller, _, store) = controller();
        store.level.store(1, Ordering::SeqCst);

        controller.start(plan(10, 5)).await.expect("start");
        settle().await;
        advance_secs(5).await;

        assert_eq!(store.level.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn default_plan_uses_saved_focus_level() {
        let (controller, _, store) = controller();
        store.level.store(12, Ordering::SeqCst);

        let plan = controller.default_plan().await.expect("plan");
        assert_eq!(plan.focus_level, 12);
        assert_eq!(plan.duration_secs, 30 * 60);
    }
}
