//! Engine adapter seam for concrete speech recognizers

use async_trait::async_trait;

use super::{EngineDriver, RecognitionError};

/// Adapter implemented by concrete speech recognizers, on-device or remote.
///
/// The owning session serializes calls: `start` is never invoked again until
/// the previous recognition reached a terminal result. All progress flows
/// back through the [`EngineDriver`] handed to `start`, from the engine's own
/// capture tasks. `cancel` can arrive after the engine already delivered a
/// final result and must be tolerated.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Begin capturing and recognizing. The engine keeps the driver for the
    /// duration of the recognition and reports through it until a terminal
    /// result went out or `cancel` was called.
    async fn start(&mut self, driver: EngineDriver) -> Result<(), RecognitionError>;

    /// Stop capturing audio, but still deliver the final transcript.
    async fn stop(&mut self) -> Result<(), RecognitionError>;

    /// Abandon recognition entirely; no further results may be delivered.
    async fn cancel(&mut self) -> Result<(), RecognitionError>;

    /// Free all claimed resources. Called at most once; the engine is never
    /// used again afterwards. Only required when swapping engines at runtime.
    fn destroy(&mut self) {}
}
