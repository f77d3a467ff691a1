//! Speech synthesis playback session management
//!
//! A [`PlaybackSession`] owns one [`AudioOutput`] device for its whole life
//! and plays one source at a time: `play` suspends until the device reports
//! completion or failure, `cancel` unwinds the in-flight attempt and leaves
//! the device reusable, `release` destroys the device for good. Every exit
//! path, success, error or cancellation, resets the device before the
//! outcome reaches the caller.

pub mod cpal_output;
pub mod output;
pub mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use cpal_output::CpalOutput;
pub use output::{AudioOutput, OutputEvent, PlaybackHandle};
pub use source::{AudioData, AudioSource, FileSource, SpeechSynthesizer, SsmlSource, UrlSource};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("A playback is already in flight on this session")]
    Busy,
    #[error("The playback session was released")]
    Released,
    #[error("Playback was cancelled")]
    Cancelled,
    #[error("Audio device error code {code}")]
    Device { code: i32 },
    #[error("Output error: {0}")]
    Output(String),
    #[error("Failed to load audio source: {0}")]
    Source(String),
}

impl PlaybackError {
    /// Cancellation is not a failure; callers filter it out with this.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlaybackError::Cancelled)
    }
}

impl From<reqwest::Error> for PlaybackError {
    fn from(err: reqwest::Error) -> Self {
        PlaybackError::Source(err.to_string())
    }
}

/// Where the session currently is in its lifecycle. `Released` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Preparing,
    Playing,
    Resetting,
    Released,
}

fn set_state(state: &std::sync::Mutex<PlaybackState>, next: PlaybackState) {
    let mut guard = state.lock().unwrap();
    if *guard != PlaybackState::Released {
        *guard = next;
    }
}

/// A long-lived, single-flight playback session around one output device.
///
/// `play` runs each attempt on a child task so an explicit [`cancel`] can
/// unwind it; the child is never aborted, which keeps its reset step intact
/// on every path. Attempting a second `play` while one is in flight is a
/// contract violation and fails with [`PlaybackError::Busy`] before the
/// device is touched.
///
/// [`cancel`]: Self::cancel
pub struct PlaybackSession<O: AudioOutput> {
    output: Arc<O>,
    scope: CancellationToken,
    state: Arc<std::sync::Mutex<PlaybackState>>,
    active: tokio::sync::Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
    released: AtomicBool,
}

impl<O: AudioOutput + 'static> PlaybackSession<O> {
    pub fn new(output: O) -> Self {
        Self {
            output: Arc::new(output),
            scope: CancellationToken::new(),
            state: Arc::new(std::sync::Mutex::new(PlaybackState::Idle)),
            active: tokio::sync::Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap()
    }

    /// Play `source` to completion.
    ///
    /// Suspends until the device reports the natural end of playback or an
    /// error. Fails fast with [`PlaybackError::Busy`] while a previous `play`
    /// is still in flight and with [`PlaybackError::Released`] after
    /// [`release`](Self::release), both before any device state changes.
    /// A concurrent [`cancel`](Self::cancel) resolves this call with
    /// [`PlaybackError::Cancelled`].
    pub async fn play<S: AudioSource + 'static>(&self, source: S) -> Result<(), PlaybackError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PlaybackError::Released);
        }

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut active = self.active.lock().await;
            if let Some((handle, _)) = active.as_ref() {
                if !handle.is_finished() {
                    return Err(PlaybackError::Busy);
                }
            }

            let child_token = self.scope.child_token();
            set_state(&self.state, PlaybackState::Loading);

            let output = Arc::clone(&self.output);
            let state = Arc::clone(&self.state);
            let token = child_token.clone();
            let handle = tokio::spawn(async move {
                let result = match Self::drive(&output, source, &token, &state).await {
                    // Once cancellation was requested it wins over whatever
                    // the device reported while tearing down.
                    Err(e) if token.is_cancelled() => {
                        if !e.is_cancelled() {
                            log::debug!("Playback: {} during cancellation", e);
                        }
                        Err(PlaybackError::Cancelled)
                    }
                    other => other,
                };

                // Cleanup phase: no await points, so it always runs to
                // completion before the outcome is surfaced.
                set_state(&state, PlaybackState::Resetting);
                output.reset();
                set_state(&state, PlaybackState::Idle);

                match &result {
                    Ok(()) => log::debug!("Playback: completed"),
                    Err(e) if e.is_cancelled() => log::debug!("Playback: cancelled"),
                    Err(e) => log::warn!("Playback: failed: {}", e),
                }
                let _ = done_tx.send(result);
            });
            *active = Some((handle, child_token));
        }

        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(PlaybackError::Output("playback task failed".to_string())),
        }
    }

    /// Stop the device, reset it to a reusable state and wait for the
    /// in-flight attempt to fully unwind. The session accepts a new `play`
    /// as soon as this returns; a no-op when nothing is playing.
    pub async fn cancel(&self) {
        let mut active = self.active.lock().await;
        if let Some((_, token)) = active.as_ref() {
            token.cancel();
        }
        if let Err(e) = self.output.stop() {
            log::debug!("Playback: stop during cancel: {}", e);
        }
        self.output.reset();
        if let Some((handle, _)) = active.take() {
            if let Err(e) = handle.await {
                log::warn!("Playback: playback task panicked: {}", e);
            }
        }
        set_state(&self.state, PlaybackState::Idle);
        log::debug!("Playback: cancelled and reset");
    }

    /// Destroy the device and the session's cancellation scope. Terminal and
    /// idempotent: every later `play` fails with
    /// [`PlaybackError::Released`]. An attempt still in flight unwinds
    /// through the scope cancellation; its reset is a no-op on the released
    /// device.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("Playback: releasing session");
        self.scope.cancel();
        self.output.release();
        *self.state.lock().unwrap() = PlaybackState::Released;
    }

    /// One playback attempt: load, stage, prepare, start on readiness, then
    /// wait for the device to report the end of playback.
    async fn drive(
        output: &Arc<O>,
        source: impl AudioSource,
        cancel: &CancellationToken,
        state: &Arc<std::sync::Mutex<PlaybackState>>,
    ) -> Result<(), PlaybackError> {
        let data = tokio::select! {
            _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
            loaded = source.load() => loaded?,
        };
        log::debug!("Playback: source loaded ({} bytes)", data.len());
        output.set_source(data)?;

        set_state(state, PlaybackState::Preparing);
        let (handle, mut events) = PlaybackHandle::channel();
        output.prepare(handle)?;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
                event = events.recv() => event,
            };
            match event {
                Some(OutputEvent::Prepared) => {
                    output.start()?;
                    set_state(state, PlaybackState::Playing);
                    log::debug!("Playback: started");
                }
                Some(OutputEvent::Completed) => return Ok(()),
                Some(OutputEvent::Error(code)) => return Err(PlaybackError::Device { code }),
                None => {
                    // The device dropped the handle without a terminal
                    // notification; during cancel that is the reset itself.
                    return if cancel.is_cancelled() {
                        Err(PlaybackError::Cancelled)
                    } else {
                        Err(PlaybackError::Output(
                            "device dropped the playback handle".to_string(),
                        ))
                    };
                }
            }
        }
    }
}
