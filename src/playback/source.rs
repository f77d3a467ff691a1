//! Audio sources a playback session can play
//!
//! Everything the session plays goes through [`AudioSource::load`], which
//! materializes device-ready audio. Loading may block on file or network
//! I/O; the session never runs it on the device callback path, and the file
//! decoder is isolated on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::PlaybackError;

/// Decoded audio in the device contract: 16 kHz mono PCM16, little endian.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    pub bytes: Vec<u8>,
}

impl AudioData {
    /// Sample rate every source must deliver.
    pub const SAMPLE_RATE: u32 = 16_000;

    pub fn from_pcm16(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback duration at the contract rate.
    pub fn duration(&self) -> Duration {
        let samples = self.bytes.len() / 2;
        Duration::from_secs_f64(samples as f64 / Self::SAMPLE_RATE as f64)
    }
}

/// Anything that can materialize device-ready audio for one playback.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn load(&self) -> Result<AudioData, PlaybackError>;
}

/// Raw bytes are already device-ready.
#[async_trait]
impl AudioSource for AudioData {
    async fn load(&self) -> Result<AudioData, PlaybackError> {
        Ok(self.clone())
    }
}

/// A WAV file on local storage. Decoded on the blocking pool; anything that
/// is not 16 kHz mono PCM16 is rejected rather than resampled.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_wav(path: &Path) -> Result<AudioData, PlaybackError> {
        let mut reader = hound::WavReader::open(path).map_err(|e| {
            PlaybackError::Source(format!("failed to open {}: {}", path.display(), e))
        })?;

        let spec = reader.spec();
        if spec.channels != 1
            || spec.sample_rate != AudioData::SAMPLE_RATE
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(PlaybackError::Source(format!(
                "{}: expected 16kHz mono PCM16, got {:?}",
                path.display(),
                spec
            )));
        }

        let mut bytes = Vec::with_capacity(reader.len() as usize * 2);
        for sample in reader.samples::<i16>() {
            let sample = sample.map_err(|e| {
                PlaybackError::Source(format!("failed to decode {}: {}", path.display(), e))
            })?;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        Ok(AudioData::from_pcm16(bytes))
    }
}

#[async_trait]
impl AudioSource for FileSource {
    async fn load(&self) -> Result<AudioData, PlaybackError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read_wav(&path))
            .await
            .map_err(|e| PlaybackError::Source(format!("WAV decode task failed: {}", e)))?
    }
}

/// Audio fetched over HTTP. The body is expected to already satisfy the
/// device contract.
pub struct UrlSource {
    url: Url,
    client: Client,
}

impl UrlSource {
    pub fn new(url: &str) -> Result<Self, PlaybackError> {
        let url = Url::parse(url)
            .map_err(|e| PlaybackError::Source(format!("invalid audio URL {}: {}", url, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlaybackError::Source(e.to_string()))?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl AudioSource for UrlSource {
    async fn load(&self) -> Result<AudioData, PlaybackError> {
        log::debug!("Playback: fetching audio from {}", self.url);
        let response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaybackError::Source(format!(
                "GET {} returned {}",
                self.url, status
            )));
        }

        let bytes = response.bytes().await?.to_vec();
        Ok(AudioData::from_pcm16(bytes))
    }
}

/// Synthesis engine seam: turns SSML markup into device-ready audio.
/// Concrete synthesizers, on-device or remote, live outside this crate.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, ssml: &str) -> Result<AudioData, PlaybackError>;
}

/// SSML markup rendered through a [`SpeechSynthesizer`] at load time.
pub struct SsmlSource<S> {
    ssml: String,
    synthesizer: Arc<S>,
}

impl<S> SsmlSource<S> {
    pub fn new(ssml: impl Into<String>, synthesizer: Arc<S>) -> Self {
        Self {
            ssml: ssml.into(),
            synthesizer,
        }
    }

    pub fn ssml(&self) -> &str {
        &self.ssml
    }
}

#[async_trait]
impl<S: SpeechSynthesizer> AudioSource for SsmlSource<S> {
    async fn load(&self) -> Result<AudioData, PlaybackError> {
        self.synthesizer.synthesize(&self.ssml).await
    }
}
