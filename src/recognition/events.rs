//! Recognition events and the values of the result sequence

use super::RecognitionError;

/// Events published on the session's broadcast channel while recognition is
/// live. Events are informational fanout and never terminate the session on
/// their own. Not every engine produces all of them.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// The engine accepted the start request and audio capture is live
    Started,
    /// A partial hypothesis which may be revised by later results
    PartialResult(Option<String>),
    /// The final hypothesis of the session
    Result(Option<String>),
    /// The session finished without any usable text
    EmptyResult,
    /// The session was cancelled by the caller
    Cancelled,
    /// The audio chunk budget ran out before a result arrived
    Interrupted,

    /// Happens when the user starts talking.
    ///
    /// *Note: not every engine supports this event*
    SpeechStartDetected,

    /// Happens when the user stops talking.
    ///
    /// *Note: not every engine supports this event*
    SpeechEndDetected,

    /// Happens when the microphone input volume changes (RMS, in decibels).
    ///
    /// *Note: not every engine supports this event*
    VolumeChanged(f32),

    /// Happens when another chunk of raw audio was recorded.
    ///
    /// *Note: not every engine supports this event*
    AudioBufferReceived(Vec<u8>),
}

/// Values carried on the recognition output stream.
///
/// A session yields zero or more [`Partial`](RecognitionResult::Partial)
/// values followed by exactly one terminal value; the stream closes right
/// after the terminal, so nothing can follow it.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionResult {
    /// Intermediate hypothesis, may repeat
    Partial(Option<String>),
    /// Final transcript (terminal); `None` or blank text means nothing
    /// usable was recognized
    Final(Option<String>),
    /// Recognition ended before a final transcript arrived (terminal)
    Interrupted,
    /// Recognition failed (terminal)
    Exception(RecognitionError),
}

impl RecognitionResult {
    /// Returns true for values that close the output stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecognitionResult::Partial(_))
    }
}
