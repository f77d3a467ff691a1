//! cpal-backed output device
//!
//! A dedicated thread owns the cpal stream and consumes commands from the
//! session; the device callback drains a shared sample queue, interpolating
//! 16 kHz mono up to whatever rate and channel count the device wants.
//! Playback is complete when the queue runs dry.

use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::output::{AudioOutput, PlaybackHandle};
use super::source::AudioData;
use super::PlaybackError;

/// Reported when the output stream itself fails.
pub const ERROR_CODE_STREAM: i32 = 1;
/// Reported when `prepare` runs without a staged source.
pub const ERROR_CODE_NO_SOURCE: i32 = 2;

enum OutputCommand {
    SetSource(AudioData),
    Prepare(PlaybackHandle),
    Start,
    Stop,
    Reset,
    Release,
}

/// Playback state shared with the device callback.
struct Shared {
    /// Samples of the running playback, f32 mono at 16 kHz.
    queue: Vec<f32>,
    playing: bool,
    /// Completion handle of the current attempt.
    handle: Option<PlaybackHandle>,
}

fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Linear interpolation into the queue; silence past the end.
fn sample_at(queue: &[f32], pos: f32) -> f32 {
    let lo = pos.floor() as usize;
    let fract = pos.fract();
    let a = queue.get(lo).copied().unwrap_or(0.0);
    let b = queue.get(lo + 1).copied().unwrap_or(0.0);
    a * (1.0 - fract) + b * fract
}

/// [`AudioOutput`] on the default cpal output device.
///
/// The stream runs for the lifetime of the device and emits silence while
/// nothing is playing, so starting a playback never waits on device setup.
pub struct CpalOutput {
    commands: Sender<OutputCommand>,
    device_thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new() -> Result<Self, PlaybackError> {
        log::debug!("Playback: creating cpal output");
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Output("no output device found".to_string()))?;
        let supported_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        log::debug!(
            "Playback: output device {:?} with config {:?}",
            device.name(),
            supported_config
        );

        let output_rate = supported_config.sample_rate().0;
        let output_channels = supported_config.channels() as usize;

        let shared = Arc::new(Mutex::new(Shared {
            queue: Vec::new(),
            playing: false,
            handle: None,
        }));
        let shared_cb = Arc::clone(&shared);
        let shared_err = Arc::clone(&shared);

        let (commands, command_rx) = channel();

        let device_thread = thread::spawn(move || {
            let stream = match device.build_output_stream(
                &supported_config.config(),
                move |frames: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut shared = shared_cb.lock().unwrap();
                    if !shared.playing {
                        frames.fill(0.0);
                        return;
                    }

                    let output_frames = frames.len() / output_channels;
                    let step = AudioData::SAMPLE_RATE as f32 / output_rate as f32;
                    let needed = (output_frames as f32 * step).ceil() as usize;

                    let mut pos = 0.0f32;
                    for frame in frames.chunks_mut(output_channels) {
                        let sample = sample_at(&shared.queue, pos);
                        for channel in frame.iter_mut() {
                            *channel = sample;
                        }
                        pos += step;
                    }

                    let consumed = needed.min(shared.queue.len());
                    shared.queue.drain(0..consumed);

                    if shared.queue.is_empty() {
                        shared.playing = false;
                        if let Some(handle) = shared.handle.take() {
                            handle.completed();
                        }
                    }
                },
                move |err| {
                    log::error!("Playback: output stream error: {}", err);
                    let mut shared = shared_err.lock().unwrap();
                    shared.playing = false;
                    shared.queue.clear();
                    if let Some(handle) = shared.handle.take() {
                        handle.error(ERROR_CODE_STREAM);
                    }
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Playback: failed to create output stream: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Playback: failed to start output stream: {}", e);
                return;
            }

            // Staged by SetSource, decoded by Prepare, queued by Start.
            let mut staged: Option<AudioData> = None;
            let mut prepared: Vec<f32> = Vec::new();

            while let Ok(command) = command_rx.recv() {
                match command {
                    OutputCommand::SetSource(data) => staged = Some(data),
                    OutputCommand::Prepare(handle) => match staged.take() {
                        Some(data) => {
                            prepared = pcm16_to_f32(&data.bytes);
                            shared.lock().unwrap().handle = Some(handle.clone());
                            log::debug!("Playback: prepared {} samples", prepared.len());
                            handle.prepared();
                        }
                        None => handle.error(ERROR_CODE_NO_SOURCE),
                    },
                    OutputCommand::Start => {
                        let mut shared = shared.lock().unwrap();
                        shared.queue = std::mem::take(&mut prepared);
                        shared.playing = true;
                    }
                    OutputCommand::Stop => shared.lock().unwrap().playing = false,
                    OutputCommand::Reset => {
                        staged = None;
                        prepared.clear();
                        let mut shared = shared.lock().unwrap();
                        shared.playing = false;
                        shared.queue.clear();
                        shared.handle = None;
                    }
                    OutputCommand::Release => break,
                }
            }
            // The stream drops with the thread.
            log::debug!("Playback: device thread exiting");
        });

        Ok(Self {
            commands,
            device_thread: Some(device_thread),
        })
    }

    fn send(&self, command: OutputCommand) -> Result<(), PlaybackError> {
        self.commands
            .send(command)
            .map_err(|_| PlaybackError::Output("output device is released".to_string()))
    }
}

impl AudioOutput for CpalOutput {
    fn set_source(&self, data: AudioData) -> Result<(), PlaybackError> {
        self.send(OutputCommand::SetSource(data))
    }

    fn prepare(&self, handle: PlaybackHandle) -> Result<(), PlaybackError> {
        self.send(OutputCommand::Prepare(handle))
    }

    fn start(&self) -> Result<(), PlaybackError> {
        self.send(OutputCommand::Start)
    }

    fn stop(&self) -> Result<(), PlaybackError> {
        self.send(OutputCommand::Stop)
    }

    fn reset(&self) {
        let _ = self.commands.send(OutputCommand::Reset);
    }

    fn release(&self) {
        let _ = self.commands.send(OutputCommand::Release);
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.commands.send(OutputCommand::Release);
        if let Some(thread) = self.device_thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Playback: failed to join device thread: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_conversion() {
        let bytes = [
            0i16.to_le_bytes(),
            i16::MAX.to_le_bytes(),
            (-i16::MAX).to_le_bytes(),
        ]
        .concat();
        let samples = pcm16_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 1.0);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn test_interpolation_between_samples() {
        let queue = [0.0, 1.0];
        assert_eq!(sample_at(&queue, 0.0), 0.0);
        assert_eq!(sample_at(&queue, 0.5), 0.5);
        assert_eq!(sample_at(&queue, 1.0), 1.0);
        // Past the end the device hears silence
        assert_eq!(sample_at(&queue, 1.5), 0.5);
        assert_eq!(sample_at(&queue, 2.0), 0.0);
        assert_eq!(sample_at(&[], 0.0), 0.0);
    }

    #[test]
    fn test_cpal_output_creation() {
        match CpalOutput::new() {
            Ok(output) => output.release(),
            Err(e) => {
                log::warn!(
                    "Audio device not available in test environment - this is expected: {}",
                    e
                );
            }
        }
    }
}
