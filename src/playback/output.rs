//! Hardware output seam and the completion bridge for one playback attempt

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::source::AudioData;
use super::PlaybackError;

/// Progress a device reports for one playback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// Asynchronous preparation finished; the device can be started.
    Prepared,
    /// Playback ran to its natural end.
    Completed,
    /// The device failed with a vendor-specific error code.
    Error(i32),
}

/// Completion bridge handed to the device for one playback attempt.
///
/// `completed` and `error` are terminal: only the first one is honored and
/// everything reported afterwards is dropped, so a device callback firing
/// late (after the session resolved or cancelled the attempt) cannot resume
/// anything twice. `prepared` passes through until a terminal lands.
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<OutputEvent>,
    resolved: Arc<AtomicBool>,
}

impl PlaybackHandle {
    /// Create the handle plus the receiving half the session drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            resolved: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    /// The device finished preparing and is ready to start.
    pub fn prepared(&self) {
        if self.resolved.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(OutputEvent::Prepared);
    }

    /// Playback reached its natural end.
    pub fn completed(&self) {
        if !self.resolved.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(OutputEvent::Completed);
        }
    }

    /// The device failed with `code`.
    pub fn error(&self, code: i32) {
        if !self.resolved.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(OutputEvent::Error(code));
        }
    }
}

/// One exclusively owned audio output device.
///
/// The owning session serializes calls: `set_source`, then `prepare`, then
/// `start` once the handle reported [`OutputEvent::Prepared`]. The device
/// reports progress only through the [`PlaybackHandle`] given to `prepare`.
/// `reset` returns the device to an idle, reusable state whatever it was
/// doing, and must be a no-op after `release`.
pub trait AudioOutput: Send + Sync {
    /// Hand the device the audio for the next playback.
    fn set_source(&self, data: AudioData) -> Result<(), PlaybackError>;

    /// Kick off asynchronous preparation of the staged source.
    fn prepare(&self, handle: PlaybackHandle) -> Result<(), PlaybackError>;

    /// Start playback of the prepared source.
    fn start(&self) -> Result<(), PlaybackError>;

    /// Stop playback without dropping device state.
    fn stop(&self) -> Result<(), PlaybackError>;

    /// Drop any staged or queued audio and return to the idle state.
    fn reset(&self);

    /// Destroy the device. The device is never used again afterwards.
    fn release(&self);
}
