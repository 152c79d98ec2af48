//! ElevenLabs streaming TTS
//!
//! Streams PCM from the ElevenLabs text-to-speech endpoint straight into a
//! [`SpeechBuffer`]. The response body is consumed incrementally; nothing
//! touches disk and nothing here knows about the audio device.
//!
//! Deadline semantics: `tts_timeout` covers request start through the first
//! PCM byte. Once audio is flowing the stream runs to completion; a
//! mid-stream failure truncates at the last decoded sample and still counts
//! as delivered audio.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::base::{SpeechSynthesizer, TtsConfig, TtsError, TtsResult, VoiceSettings};
use crate::core::audio::SpeechBuffer;

pub struct ElevenLabsTts {
    http: reqwest::Client,
    config: TtsConfig,
}

impl ElevenLabsTts {
    pub fn new(config: TtsConfig) -> TtsResult<Self> {
        if config.api_key.is_empty() {
            return Err(TtsError::InvalidConfiguration(
                "API key is required for ElevenLabs".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| TtsError::NetworkError(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Build the streaming synthesis request with URL, headers and body.
    fn build_request(&self, text: &str, excitement: u8) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/v1/text-to-speech/{}/stream?output_format=pcm_{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id,
            self.config.sample_rate
        );

        let body = json!({
            "text": text,
            "model_id": self.config.model_id,
            "voice_settings": VoiceSettings::for_excitement(excitement),
        });

        self.http
            .post(url)
            .header("xi-api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "audio/pcm")
            .json(&body)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsTts {
    async fn synthesize(
        &self,
        text: &str,
        excitement: u8,
        buffer: SpeechBuffer,
        cancel: CancellationToken,
    ) -> TtsResult<()> {
        let deadline = Instant::now() + self.config.timeout;
        let request = self.build_request(text, excitement);

        let response = match timeout_at(deadline, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                buffer.fail();
                return Err(TtsError::NetworkError(e.to_string()));
            }
            Err(_) => {
                buffer.fail();
                return Err(TtsError::Timeout);
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            buffer.fail();
            return Err(TtsError::ProviderError { status, body });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = PcmDecoder::new();
        let mut delivered = 0usize;

        // First chunk is still under the deadline; after that the stream
        // runs at its own pace.
        match timeout_at(deadline, stream.next()).await {
            Ok(Some(Ok(bytes))) => {
                delivered += decoder.push(&bytes, &buffer);
            }
            Ok(Some(Err(e))) => {
                buffer.fail();
                return Err(TtsError::NetworkError(e.to_string()));
            }
            Ok(None) => {
                buffer.fail();
                return Err(TtsError::ProviderError {
                    status: 200,
                    body: "empty audio stream".to_string(),
                });
            }
            Err(_) => {
                buffer.fail();
                return Err(TtsError::Timeout);
            }
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("TTS fetch cancelled after {} samples", delivered);
                    buffer.finish();
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(bytes)) => {
                        delivered += decoder.push(&bytes, &buffer);
                    }
                    Some(Err(e)) => {
                        // Truncate at the last decoded sample; what has
                        // been handed over still plays.
                        warn!("TTS stream error after {} samples: {}", delivered, e);
                        buffer.finish();
                        return Ok(());
                    }
                    None => break,
                }
            }
        }

        buffer.finish();
        debug!("TTS synthesis complete: {} samples", delivered);
        Ok(())
    }
}

/// Incremental 16-bit little-endian PCM decoder. Chunks off the wire can
/// split a sample across a boundary; the odd byte carries over.
struct PcmDecoder {
    carry: Option<u8>,
    scratch: Vec<f32>,
}

impl PcmDecoder {
    fn new() -> Self {
        Self {
            carry: None,
            scratch: Vec::new(),
        }
    }

    /// Decode `bytes` and append the samples to `buffer`. Returns the
    /// number of samples appended.
    fn push(&mut self, bytes: &[u8], buffer: &SpeechBuffer) -> usize {
        self.scratch.clear();

        let mut data = bytes;
        if let Some(high_pending) = self.carry.take() {
            if let Some((&first, rest)) = data.split_first() {
                self.scratch
                    .push(i16::from_le_bytes([high_pending, first]) as f32 / 32768.0);
                data = rest;
            } else {
                self.carry = Some(high_pending);
                return 0;
            }
        }

        let mut pairs = data.chunks_exact(2);
        for pair in &mut pairs {
            self.scratch
                .push(i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0);
        }
        if let [leftover] = pairs.remainder() {
            self.carry = Some(*leftover);
        }

        buffer.append(&self.scratch);
        self.scratch.len()
    }
}
