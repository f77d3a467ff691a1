//! Speech recognition session management
//!
//! A [`RecognitionSession`] owns one recognizer for one recognition: it hands
//! the engine an [`EngineDriver`], exposes the results as a lazy stream that
//! closes right after the terminal value, fans lifecycle events out on a
//! broadcast channel, and enforces the recognition timeout plus the
//! audio-chunk interruption budget through a watchdog task.

pub mod engine;
pub mod events;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub use engine::RecognitionEngine;
pub use events::{RecognitionEvent, RecognitionResult};

/// Capacity of the event fanout and of the result stream.
const CHANNEL_CAPACITY: usize = 32;

/// The watchdog never fires earlier than this, whatever was requested.
const MIN_RECOGNITION_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecognitionError {
    #[error("Recognition was already started on this session")]
    AlreadyStarted,
    #[error("Audio recording permission denied")]
    PermissionDenied,
    #[error("Engine error: {0}")]
    Engine(String),
}

#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Requested recognition timeout. Values below 3000ms are clamped up.
    pub recognition_timeout: Duration,
    /// Interrupt recognition after this many audio chunks arrive without an
    /// intervening result. `None` disables the budget entirely.
    pub max_audio_chunks: Option<u32>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            recognition_timeout: Duration::from_millis(10000),
            max_audio_chunks: None,
        }
    }
}

impl RecognitionConfig {
    /// Effective watchdog timeout, never below the 3 second floor.
    pub fn effective_timeout(&self) -> Duration {
        self.recognition_timeout.max(MIN_RECOGNITION_TIMEOUT)
    }
}

/// What the session is currently doing. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Stopping,
    Cancelling,
    Terminated,
}

/// State shared between the session, the engine driver and the watchdog.
struct SessionInner {
    events: broadcast::Sender<RecognitionEvent>,
    /// Sender half of the result stream. Taken, and thereby closed, when the
    /// terminal result goes out, so nothing can ever follow it.
    results: tokio::sync::Mutex<Option<mpsc::Sender<RecognitionResult>>>,
    /// Audio chunks received since the last result. -1 means disarmed.
    chunks_since_result: AtomicI64,
    max_audio_chunks: Option<u32>,
    /// Set when the chunk budget runs out, so the interruption fires once.
    chunk_budget_spent: AtomicBool,
    state: std::sync::Mutex<SessionState>,
    /// Signalled once the terminal result has been delivered.
    terminated: Notify,
}

impl SessionInner {
    /// Nothing, event or result, is observable after the terminal result.
    fn emit(&self, event: RecognitionEvent) {
        if *self.state.lock().unwrap() == SessionState::Terminated {
            return;
        }
        let _ = self.events.send(event);
    }

    /// Re-arm the chunk counter at zero. Only meaningful when a chunk budget
    /// is configured; without one the counter stays disarmed.
    fn clear_counter(&self) {
        if self.max_audio_chunks.is_some() {
            self.chunks_since_result.store(0, Ordering::SeqCst);
        }
    }

    /// Disarm the chunk counter: chunks are no longer counted and the budget
    /// cannot trigger, regardless of its value.
    fn init_counter(&self) {
        self.chunks_since_result.store(-1, Ordering::SeqCst);
    }

    fn must_interrupt(&self) -> bool {
        match self.max_audio_chunks {
            Some(max) => self.chunks_since_result.load(Ordering::SeqCst) >= max as i64,
            None => false,
        }
    }

    async fn push_partial(&self, text: Option<String>) {
        let guard = self.results.lock().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(RecognitionResult::Partial(text)).await;
        }
    }

    /// Deliver the terminal result and close the stream. Only the first
    /// caller wins; terminals losing the race are dropped silently.
    async fn push_terminal(&self, result: RecognitionResult) {
        let mut guard = self.results.lock().await;
        if let Some(tx) = guard.take() {
            *self.state.lock().unwrap() = SessionState::Terminated;
            log::debug!("Recognition: terminal result {:?}", result);
            let _ = tx.send(result).await;
            self.terminated.notify_one();
        }
    }
}

/// Handed to the engine for the duration of one recognition. Every result
/// and event the engine produces flows back through it.
///
/// Callbacks are expected from the engine's own capture tasks, one at a time;
/// event and result ordering follows the callback order.
#[derive(Clone)]
pub struct EngineDriver {
    inner: Arc<SessionInner>,
}

impl EngineDriver {
    /// Another chunk of raw audio was recorded. Counts against the chunk
    /// budget while the counter is armed; when the budget runs out this
    /// additionally emits [`RecognitionEvent::Interrupted`] once and forces
    /// the `Interrupted` terminal result.
    pub async fn on_audio_buffer_received(&self, buffer: Vec<u8>) {
        let _ = self
            .inner
            .chunks_since_result
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count != -1).then_some(count + 1)
            });
        self.inner.emit(RecognitionEvent::AudioBufferReceived(buffer));
        if self.inner.must_interrupt()
            && !self.inner.chunk_budget_spent.swap(true, Ordering::SeqCst)
        {
            log::debug!("Recognition: audio chunk budget spent, interrupting");
            self.inner.emit(RecognitionEvent::Interrupted);
            self.inner.push_terminal(RecognitionResult::Interrupted).await;
        }
    }

    /// An intermediate hypothesis arrived. Re-arms the chunk counter.
    pub async fn on_partial_result(&self, text: Option<String>) {
        self.inner.clear_counter();
        self.inner.emit(RecognitionEvent::PartialResult(text.clone()));
        self.inner.push_partial(text).await;
    }

    /// The final hypothesis arrived. Re-arms the chunk counter and delivers
    /// the `Final` terminal result.
    pub async fn on_final_result(&self, text: Option<String>) {
        self.inner.clear_counter();
        match &text {
            Some(t) if !t.trim().is_empty() => {
                self.inner.emit(RecognitionEvent::Result(text.clone()))
            }
            _ => self.inner.emit(RecognitionEvent::EmptyResult),
        }
        self.inner.push_terminal(RecognitionResult::Final(text)).await;
    }

    /// The engine failed. Delivers the `Exception` terminal result.
    pub async fn on_error(&self, error: RecognitionError) {
        log::warn!("Recognition: engine error: {}", error);
        self.inner
            .push_terminal(RecognitionResult::Exception(error))
            .await;
    }

    /// Call this if the engine can detect the start of a speech.
    pub fn on_speech_start(&self) {
        self.inner.emit(RecognitionEvent::SpeechStartDetected);
    }

    /// Call this if the engine can detect the end of a speech.
    pub fn on_speech_end(&self) {
        self.inner.emit(RecognitionEvent::SpeechEndDetected);
    }

    /// Call this if the engine can detect record volume changes.
    pub fn on_sound_volume_rms_changed(&self, rms_db: f32) {
        self.inner.emit(RecognitionEvent::VolumeChanged(rms_db));
    }
}

/// One recognition from `start_recognition` to its terminal result.
///
/// The session is single-use: once terminated it stays terminated, and a new
/// recognition needs a fresh session. Subscribe to [`events`](Self::events)
/// before starting to observe the full event sequence.
pub struct RecognitionSession<E: RecognitionEngine> {
    engine: Arc<tokio::sync::Mutex<E>>,
    config: RecognitionConfig,
    inner: Arc<SessionInner>,
    cancel_token: CancellationToken,
    watchdog: std::sync::Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl<E: RecognitionEngine + 'static> RecognitionSession<E> {
    pub fn new(engine: E, config: RecognitionConfig) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let inner = Arc::new(SessionInner {
            events,
            results: tokio::sync::Mutex::new(None),
            chunks_since_result: AtomicI64::new(-1),
            max_audio_chunks: config.max_audio_chunks,
            chunk_budget_spent: AtomicBool::new(false),
            state: std::sync::Mutex::new(SessionState::Idle),
            terminated: Notify::new(),
        });
        Self {
            engine: Arc::new(tokio::sync::Mutex::new(engine)),
            config,
            inner,
            cancel_token: CancellationToken::new(),
            watchdog: std::sync::Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Subscribe to the session's lifecycle events. The channel is lossy
    /// under a slow subscriber; subscribe before starting to see everything.
    pub fn events(&self) -> broadcast::Receiver<RecognitionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().unwrap()
    }

    /// Re-arm the chunk counter, see [`EngineDriver::on_audio_buffer_received`].
    pub fn clear_counter(&self) {
        self.inner.clear_counter();
    }

    /// Disarm the chunk counter until the next result re-arms it.
    pub fn init_counter(&self) {
        self.inner.init_counter();
    }

    /// Begin capturing and recognizing speech.
    ///
    /// Returns the result stream: zero or more `Partial` values followed by
    /// exactly one of `Final`, `Interrupted` or `Exception`, after which the
    /// stream is closed. An engine that fails to start (a missing microphone
    /// capability, for instance) still yields a well-formed stream carrying a
    /// single `Exception`. Starting a session twice is a contract violation
    /// and fails with [`RecognitionError::AlreadyStarted`].
    pub async fn start_recognition(
        &self,
    ) -> Result<ReceiverStream<RecognitionResult>, RecognitionError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != SessionState::Idle {
                return Err(RecognitionError::AlreadyStarted);
            }
            *state = SessionState::Capturing;
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.inner.results.lock().await = Some(tx);
        self.inner.clear_counter();

        let driver = EngineDriver {
            inner: Arc::clone(&self.inner),
        };
        match self.engine.lock().await.start(driver).await {
            Ok(()) => {
                log::debug!(
                    "Recognition: started (timeout {:?}, chunk budget {:?})",
                    self.config.effective_timeout(),
                    self.config.max_audio_chunks
                );
                self.inner.emit(RecognitionEvent::Started);
                let watchdog = tokio::spawn(Self::watchdog(
                    Arc::clone(&self.engine),
                    Arc::clone(&self.inner),
                    self.cancel_token.clone(),
                    self.config.effective_timeout(),
                ));
                *self.watchdog.lock().unwrap() = Some(watchdog);
            }
            Err(e) => {
                log::error!("Recognition: engine failed to start: {}", e);
                self.inner
                    .push_terminal(RecognitionResult::Exception(e))
                    .await;
            }
        }

        Ok(ReceiverStream::new(rx))
    }

    /// Stop capturing audio, but await the best available final transcript.
    /// The stream still terminates with `Final`, possibly with empty text.
    /// No-op unless the session is capturing.
    pub async fn stop_recognition(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != SessionState::Capturing {
                return;
            }
            *state = SessionState::Stopping;
        }
        log::debug!("Recognition: stopping, awaiting final result");
        if let Err(e) = self.engine.lock().await.stop().await {
            log::warn!("Recognition: engine stop failed: {}", e);
            self.inner
                .push_terminal(RecognitionResult::Exception(e))
                .await;
        }
    }

    /// Cancel recognition entirely and abandon all results. The stream
    /// terminates with `Interrupted` unless a terminal already won the race.
    /// Returns once the engine and the watchdog have unwound; no-op when the
    /// session already terminated.
    pub async fn cancel_recognition(&self) {
        if !Self::cancel_flow(&self.engine, &self.inner).await {
            return;
        }
        self.cancel_token.cancel();
        self.join_watchdog().await;
    }

    /// Free all claimed resources. Safe to call multiple times; everything
    /// after the first call is a no-op. If no terminal result was produced
    /// the stream is closed without one.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("Recognition: destroying session");
        self.cancel_token.cancel();
        self.inner.results.lock().await.take();
        *self.inner.state.lock().unwrap() = SessionState::Terminated;
        self.join_watchdog().await;
        self.engine.lock().await.destroy();
    }

    /// The cancellation path shared by `cancel_recognition` and the watchdog
    /// timeout. Returns false when there was nothing left to cancel.
    async fn cancel_flow(engine: &Arc<tokio::sync::Mutex<E>>, inner: &Arc<SessionInner>) -> bool {
        {
            let mut state = inner.state.lock().unwrap();
            match *state {
                SessionState::Capturing | SessionState::Stopping => {
                    *state = SessionState::Cancelling
                }
                _ => return false,
            }
        }
        if let Err(e) = engine.lock().await.cancel().await {
            log::warn!("Recognition: engine cancel failed: {}", e);
        }
        inner.emit(RecognitionEvent::Cancelled);
        inner.push_terminal(RecognitionResult::Interrupted).await;
        true
    }

    /// Watches one recognition: interrupts it when no terminal result lands
    /// within the timeout, and cancels the engine after the chunk budget
    /// forced an interruption from the callback path.
    async fn watchdog(
        engine: Arc<tokio::sync::Mutex<E>>,
        inner: Arc<SessionInner>,
        cancel_token: CancellationToken,
        timeout: Duration,
    ) {
        tokio::select! {
            _ = cancel_token.cancelled() => {}
            _ = inner.terminated.notified() => {
                if inner.chunk_budget_spent.load(Ordering::SeqCst) {
                    if let Err(e) = engine.lock().await.cancel().await {
                        log::warn!("Recognition: engine cancel after chunk budget failed: {}", e);
                    }
                }
            }
            _ = tokio::time::sleep(timeout) => {
                log::debug!("Recognition: no result within {:?}, interrupting", timeout);
                Self::cancel_flow(&engine, &inner).await;
            }
        }
    }

    async fn join_watchdog(&self) {
        let handle = self.watchdog.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("Recognition: watchdog task panicked: {}", e);
            }
        }
    }
}
