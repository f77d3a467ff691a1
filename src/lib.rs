pub mod assets;
pub mod playback;
pub mod recognition;

pub use assets::{AssetsConfig, AssetsError, ModelAssets};
pub use playback::{
    AudioData, AudioOutput, AudioSource, CpalOutput, FileSource, OutputEvent, PlaybackError,
    PlaybackHandle, PlaybackSession, PlaybackState, SpeechSynthesizer, SsmlSource, UrlSource,
};
pub use recognition::{
    EngineDriver, RecognitionConfig, RecognitionEngine, RecognitionError, RecognitionEvent,
    RecognitionResult, RecognitionSession, SessionState,
};
