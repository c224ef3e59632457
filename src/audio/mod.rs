pub mod tone;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender},
    Arc, Mutex,
};
use std::thread;

use async_trait::async_trait;
use log::{error, info, warn};
use rodio::{OutputStream, Sink};
use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::tones::ToneConfig;
use tone::BinauralTone;

/// Seam between the playback controller and the audio output, so tests can
/// substitute a recording fake for the rodio-backed engine.
#[async_trait]
pub trait ToneOutput: Send + Sync {
    /// Tears down any running graph, then builds and starts a fresh one.
    /// Returns once the graph is running; never blocks for the duration.
    async fn start(&self, config: ToneConfig) -> Result<(), SessionError>;

    /// Stops and releases the graph. Infallible; a no-op when already
    /// stopped.
    fn stop(&self);

    /// Clamps to [0, 1] and applies immediately when a graph exists;
    /// otherwise the value is retained for the next start.
    fn set_volume(&self, volume: f32);

    fn is_playing(&self) -> bool;

    fn current_config(&self) -> Option<ToneConfig>;
}

enum AudioCommand {
    Start {
        config: ToneConfig,
        ready: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop,
    SetVolume(f32),
    Shutdown,
}

/// Rodio-backed tone synthesis engine.
///
/// The output stream and sink are not `Send`, so they live on a dedicated
/// audio thread driven by a command channel. The stream/sink pair is the
/// audio graph: either both exist (playing) or neither does (idle). Because
/// every `Start` command tears the previous pair down on the same thread
/// before building the next, two graphs can never coexist.
pub struct AudioEngineHandle {
    tx: Mutex<Option<Sender<AudioCommand>>>,
    playing: Arc<AtomicBool>,
    current: Arc<Mutex<Option<ToneConfig>>>,
    disposed: AtomicBool,
}

impl AudioEngineHandle {
    pub fn new() -> Self {
        Self {
            tx: Mutex::new(None),
            playing: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, SessionError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SessionError::AudioUnavailable(
                "engine has been disposed".into(),
            ));
        }

        let mut guard = self
            .tx
            .lock()
            .map_err(|_| SessionError::AudioUnavailable("audio command channel poisoned".into()))?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();
        let playing = Arc::clone(&self.playing);
        let current = Arc::clone(&self.current);

        // Dedicated thread holding the non-Send audio objects.
        thread::Builder::new()
            .name("entrain-audio".to_string())
            .spawn(move || audio_thread(rx, playing, current))
            .map_err(|err| {
                SessionError::AudioUnavailable(format!("failed to spawn audio thread: {err}"))
            })?;

        *guard = Some(tx.clone());
        Ok(tx)
    }

    /// Stops any session and releases the audio output permanently. The
    /// engine is unusable afterwards: further starts fail with
    /// `AudioUnavailable`. Safe to call at any time, including before a
    /// start has resolved.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(AudioCommand::Shutdown);
            }
        }
        info!("audio engine disposed");
    }
}

impl Default for AudioEngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioEngineHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[async_trait]
impl ToneOutput for AudioEngineHandle {
    async fn start(&self, config: ToneConfig) -> Result<(), SessionError> {
        let tx = self.ensure_thread()?;
        let (ready_tx, ready_rx) = oneshot::channel();
        tx.send(AudioCommand::Start {
            config,
            ready: ready_tx,
        })
        .map_err(|_| SessionError::AudioUnavailable("audio thread has exited".into()))?;

        ready_rx
            .await
            .map_err(|_| SessionError::AudioUnavailable("audio thread dropped start reply".into()))?
    }

    fn stop(&self) {
        // Deliberately infallible: stopping an idle or disposed engine is a
        // no-op, and repeated stops are safe.
        if let Ok(guard) = self.tx.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(AudioCommand::Stop);
            }
        }
    }

    fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        match self.ensure_thread() {
            Ok(tx) => {
                let _ = tx.send(AudioCommand::SetVolume(clamped));
            }
            Err(err) => warn!("volume change dropped: {err}"),
        }
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn current_config(&self) -> Option<ToneConfig> {
        self.current.lock().ok().and_then(|config| config.clone())
    }
}

fn audio_thread(
    rx: Receiver<AudioCommand>,
    playing: Arc<AtomicBool>,
    current: Arc<Mutex<Option<ToneConfig>>>,
) {
    // The stream must outlive the sink; dropping the pair releases the
    // output device.
    let mut graph: Option<(OutputStream, Sink)> = None;
    let mut pending_volume: Option<f32> = None;

    fn teardown(
        graph: &mut Option<(OutputStream, Sink)>,
        playing: &AtomicBool,
        current: &Mutex<Option<ToneConfig>>,
    ) {
        if let Some((_stream, sink)) = graph.take() {
            sink.stop();
        }
        playing.store(false, Ordering::SeqCst);
        if let Ok(mut config) = current.lock() {
            *config = None;
        }
    }

    while let Ok(command) = rx.recv() {
        match command {
            AudioCommand::Start { config, ready } => {
                teardown(&mut graph, &playing, &current);
                match build_graph(&config, pending_volume.take()) {
                    Ok(built) => {
                        graph = Some(built);
                        playing.store(true, Ordering::SeqCst);
                        if let Ok(mut slot) = current.lock() {
                            *slot = Some(config);
                        }
                        let _ = ready.send(Ok(()));
                    }
                    Err(err) => {
                        error!("failed to start audio graph: {err}");
                        let _ = ready.send(Err(err));
                    }
                }
            }
            AudioCommand::Stop => {
                teardown(&mut graph, &playing, &current);
            }
            AudioCommand::SetVolume(volume) => {
                if let Some((_stream, sink)) = graph.as_ref() {
                    sink.set_volume(volume);
                } else {
                    pending_volume = Some(volume);
                }
            }
            AudioCommand::Shutdown => {
                teardown(&mut graph, &playing, &current);
                break;
            }
        }
    }

    info!("audio thread shutting down");
}

/// Opens the default output device and starts a bounded binaural source on
/// a fresh sink. A volume set while idle overrides the config's volume for
/// this start.
fn build_graph(
    config: &ToneConfig,
    pending_volume: Option<f32>,
) -> Result<(OutputStream, Sink), SessionError> {
    let (stream, handle) = OutputStream::try_default().map_err(|err| {
        SessionError::AudioUnavailable(format!("failed to open output stream: {err}"))
    })?;
    let sink = Sink::try_new(&handle)
        .map_err(|err| SessionError::AudioUnavailable(format!("failed to create sink: {err}")))?;

    sink.set_volume(
        pending_volume
            .unwrap_or(config.volume)
            .clamp(0.0, 1.0),
    );
    sink.append(BinauralTone::new(config));
    sink.play();

    Ok((stream, sink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_after_dispose_is_audio_unavailable() {
        let engine = AudioEngineHandle::new();
        engine.dispose();
        let result = engine.start(ToneConfig::for_focus_level(1)).await;
        assert!(matches!(result, Err(SessionError::AudioUnavailable(_))));
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let engine = AudioEngineHandle::new();
        engine.stop();
        engine.stop();
        assert!(!engine.is_playing());
        assert!(engine.current_config().is_none());
    }

    #[test]
    fn dispose_is_idempotent() {
        let engine = AudioEngineHandle::new();
        engine.dispose();
        engine.dispose();
        assert!(!engine.is_playing());
    }
}
