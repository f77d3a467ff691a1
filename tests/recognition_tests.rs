//! Recognition session scenarios driven through a scripted mock engine

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_stream::StreamExt;

use speech_io_rs::{
    EngineDriver, RecognitionConfig, RecognitionEngine, RecognitionError, RecognitionEvent,
    RecognitionResult, RecognitionSession, SessionState,
};

/// Hands its driver to the test so callbacks can be fed by hand, and
/// delivers a scripted final transcript when stopped.
struct MockEngine {
    driver: Arc<Mutex<Option<EngineDriver>>>,
    final_text: Option<String>,
    fail_start: bool,
    fail_stop: bool,
}

impl MockEngine {
    fn new(slot: &Arc<Mutex<Option<EngineDriver>>>) -> Self {
        Self {
            driver: Arc::clone(slot),
            final_text: Some("turn on the kitchen lights".to_string()),
            fail_start: false,
            fail_stop: false,
        }
    }
}

#[async_trait]
impl RecognitionEngine for MockEngine {
    async fn start(&mut self, driver: EngineDriver) -> Result<(), RecognitionError> {
        if self.fail_start {
            return Err(RecognitionError::PermissionDenied);
        }
        *self.driver.lock().unwrap() = Some(driver);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RecognitionError> {
        if self.fail_stop {
            return Err(RecognitionError::Engine("decoder crashed".to_string()));
        }
        let driver = self.driver.lock().unwrap().clone();
        if let Some(driver) = driver {
            driver.on_final_result(self.final_text.clone()).await;
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), RecognitionError> {
        Ok(())
    }
}

fn session_with(
    config: RecognitionConfig,
) -> (
    RecognitionSession<MockEngine>,
    Arc<Mutex<Option<EngineDriver>>>,
) {
    let slot = Arc::new(Mutex::new(None));
    let session = RecognitionSession::new(MockEngine::new(&slot), config);
    (session, slot)
}

fn take_driver(slot: &Arc<Mutex<Option<EngineDriver>>>) -> EngineDriver {
    slot.lock().unwrap().clone().expect("engine was started")
}

#[test_log::test(tokio::test)]
async fn test_chunk_budget_interrupts_on_the_last_chunk() {
    let (session, slot) = session_with(RecognitionConfig {
        max_audio_chunks: Some(3),
        ..Default::default()
    });
    let mut events = session.events();
    let mut results = session.start_recognition().await.unwrap();
    let driver = take_driver(&slot);

    for _ in 0..3 {
        driver.on_audio_buffer_received(vec![0u8; 320]).await;
    }

    // Event order is the callback order: three buffers, then the
    // interruption raised by the third one.
    assert_eq!(events.recv().await.unwrap(), RecognitionEvent::Started);
    for _ in 0..3 {
        assert_eq!(
            events.recv().await.unwrap(),
            RecognitionEvent::AudioBufferReceived(vec![0u8; 320])
        );
    }
    assert_eq!(events.recv().await.unwrap(), RecognitionEvent::Interrupted);

    assert_eq!(results.next().await, Some(RecognitionResult::Interrupted));
    assert_eq!(results.next().await, None);
    assert_eq!(session.state(), SessionState::Terminated);
}

#[test_log::test(tokio::test)]
async fn test_init_counter_disarms_the_chunk_budget() {
    let (session, slot) = session_with(RecognitionConfig {
        max_audio_chunks: Some(2),
        ..Default::default()
    });
    let mut results = session.start_recognition().await.unwrap();
    session.init_counter();
    let driver = take_driver(&slot);

    for _ in 0..5 {
        driver.on_audio_buffer_received(vec![0u8; 320]).await;
    }

    // Disarmed: well past the budget and still no terminal result.
    let pending = tokio::time::timeout(Duration::from_millis(100), results.next()).await;
    assert!(pending.is_err());
    assert_eq!(session.state(), SessionState::Capturing);

    session.cancel_recognition().await;
}

#[test_log::test(tokio::test)]
async fn test_results_rearm_the_chunk_counter() {
    let (session, slot) = session_with(RecognitionConfig {
        max_audio_chunks: Some(2),
        ..Default::default()
    });
    let mut results = session.start_recognition().await.unwrap();
    let driver = take_driver(&slot);

    driver.on_audio_buffer_received(vec![1]).await;
    driver.on_partial_result(Some("turn".to_string())).await;
    assert_eq!(
        results.next().await,
        Some(RecognitionResult::Partial(Some("turn".to_string())))
    );

    // The partial reset the count, so one more chunk stays under budget
    driver.on_audio_buffer_received(vec![2]).await;
    assert_eq!(session.state(), SessionState::Capturing);

    driver.on_audio_buffer_received(vec![3]).await;
    assert_eq!(results.next().await, Some(RecognitionResult::Interrupted));
    assert_eq!(results.next().await, None);
}

#[test_log::test(tokio::test)]
async fn test_stop_delivers_the_final_transcript() {
    let (session, slot) = session_with(RecognitionConfig::default());
    let mut results = session.start_recognition().await.unwrap();
    let driver = take_driver(&slot);

    driver.on_partial_result(Some("turn on".to_string())).await;
    session.stop_recognition().await;

    assert_eq!(
        results.next().await,
        Some(RecognitionResult::Partial(Some("turn on".to_string())))
    );
    assert_eq!(
        results.next().await,
        Some(RecognitionResult::Final(Some(
            "turn on the kitchen lights".to_string()
        )))
    );
    assert_eq!(results.next().await, None);
    assert_eq!(session.state(), SessionState::Terminated);
}

#[test_log::test(tokio::test)]
async fn test_cancel_delivers_interrupted_and_silences_the_engine() {
    let (session, slot) = session_with(RecognitionConfig::default());
    let mut events = session.events();
    let mut results = session.start_recognition().await.unwrap();
    let driver = take_driver(&slot);

    session.cancel_recognition().await;

    // Late engine callbacks after the terminal are invisible
    driver.on_partial_result(Some("too late".to_string())).await;
    driver.on_audio_buffer_received(vec![0u8; 320]).await;

    assert_eq!(results.next().await, Some(RecognitionResult::Interrupted));
    assert_eq!(results.next().await, None);

    assert_eq!(events.recv().await.unwrap(), RecognitionEvent::Started);
    assert_eq!(events.recv().await.unwrap(), RecognitionEvent::Cancelled);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test_log::test(tokio::test)]
async fn test_terminal_closes_the_stream() {
    let (session, slot) = session_with(RecognitionConfig::default());
    let mut events = session.events();
    let mut results = session.start_recognition().await.unwrap();
    let driver = take_driver(&slot);

    driver.on_final_result(Some("lights on".to_string())).await;

    // Whatever the engine reports after its terminal is invisible
    driver.on_audio_buffer_received(vec![0u8; 320]).await;
    driver.on_partial_result(Some("ghost".to_string())).await;

    assert_eq!(
        results.next().await,
        Some(RecognitionResult::Final(Some("lights on".to_string())))
    );
    assert_eq!(results.next().await, None);

    assert_eq!(events.recv().await.unwrap(), RecognitionEvent::Started);
    assert_eq!(
        events.recv().await.unwrap(),
        RecognitionEvent::Result(Some("lights on".to_string()))
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test_log::test(tokio::test)]
async fn test_failed_start_yields_a_single_exception() {
    let slot = Arc::new(Mutex::new(None));
    let mut engine = MockEngine::new(&slot);
    engine.fail_start = true;
    let session = RecognitionSession::new(engine, RecognitionConfig::default());

    let mut results = session.start_recognition().await.unwrap();
    assert_eq!(
        results.next().await,
        Some(RecognitionResult::Exception(
            RecognitionError::PermissionDenied
        ))
    );
    assert_eq!(results.next().await, None);
    assert_eq!(session.state(), SessionState::Terminated);
}

#[test_log::test(tokio::test)]
async fn test_engine_error_during_stop_is_an_exception() {
    let slot = Arc::new(Mutex::new(None));
    let mut engine = MockEngine::new(&slot);
    engine.fail_stop = true;
    let session = RecognitionSession::new(engine, RecognitionConfig::default());

    let mut results = session.start_recognition().await.unwrap();
    session.stop_recognition().await;

    assert_eq!(
        results.next().await,
        Some(RecognitionResult::Exception(RecognitionError::Engine(
            "decoder crashed".to_string()
        )))
    );
    assert_eq!(results.next().await, None);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_timeout_is_floored_and_interrupts() {
    let (session, _slot) = session_with(RecognitionConfig {
        // Requested well below the floor; the watchdog waits 3 s anyway
        recognition_timeout: Duration::from_millis(500),
        ..Default::default()
    });
    let mut results = session.start_recognition().await.unwrap();

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(session.state(), SessionState::Capturing);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(results.next().await, Some(RecognitionResult::Interrupted));
    assert_eq!(results.next().await, None);
    assert_eq!(session.state(), SessionState::Terminated);
}

#[test_log::test(tokio::test)]
async fn test_boundary_and_volume_events_pass_through() {
    let (session, slot) = session_with(RecognitionConfig::default());
    let mut events = session.events();
    let _results = session.start_recognition().await.unwrap();
    let driver = take_driver(&slot);

    driver.on_speech_start();
    driver.on_sound_volume_rms_changed(-18.5);
    driver.on_speech_end();

    assert_eq!(events.recv().await.unwrap(), RecognitionEvent::Started);
    assert_eq!(
        events.recv().await.unwrap(),
        RecognitionEvent::SpeechStartDetected
    );
    assert_eq!(
        events.recv().await.unwrap(),
        RecognitionEvent::VolumeChanged(-18.5)
    );
    assert_eq!(
        events.recv().await.unwrap(),
        RecognitionEvent::SpeechEndDetected
    );

    session.cancel_recognition().await;
}

#[test_log::test(tokio::test)]
async fn test_blank_final_text_is_an_empty_result() {
    let (session, slot) = session_with(RecognitionConfig::default());
    let mut events = session.events();
    let mut results = session.start_recognition().await.unwrap();
    let driver = take_driver(&slot);

    driver.on_final_result(None).await;

    assert_eq!(events.recv().await.unwrap(), RecognitionEvent::Started);
    assert_eq!(events.recv().await.unwrap(), RecognitionEvent::EmptyResult);
    assert_eq!(results.next().await, Some(RecognitionResult::Final(None)));
    assert_eq!(results.next().await, None);
}

#[test_log::test(tokio::test)]
async fn test_destroy_closes_the_stream_without_a_terminal() {
    let (session, slot) = session_with(RecognitionConfig::default());
    let mut results = session.start_recognition().await.unwrap();
    let _driver = take_driver(&slot);

    session.destroy().await;

    assert_eq!(results.next().await, None);
    assert_eq!(session.state(), SessionState::Terminated);
}
