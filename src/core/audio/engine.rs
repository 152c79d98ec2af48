//! Audio engine
//!
//! Owns the output device for the life of the process. The cpal stream and
//! its callback live on a dedicated thread (the stream type is not `Send`);
//! the rest of the engine talks to the mixer through an `Arc<Mutex<_>>`
//! that the callback only ever `try_lock`s. A missed lock zero-fills that
//! block and counts an underrun rather than stalling the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::mixer::{MixerCore, PlaybackOutcome, TtsSubmission};

/// Output channel count. The mixer always produces interleaved stereo.
const OUTPUT_CHANNELS: u16 = 2;

/// Device block size requested from the audio subsystem.
const BLOCK_FRAMES: u32 = 1024;

/// Errors opening or running the output stream. `DeviceUnavailable` and
/// `Stream` at startup are fatal (exit code 2).
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No output audio device available")]
    DeviceUnavailable,

    #[error("Failed to build output stream: {0}")]
    Build(String),

    #[error("Failed to start output stream: {0}")]
    Stream(String),
}

/// Result type for audio engine operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Owned handle on the running audio output.
pub struct AudioEngine {
    core: Arc<Mutex<MixerCore>>,
    underruns: Arc<AtomicU64>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioEngine {
    /// Open the default output device and start the callback.
    ///
    /// Ambience playback begins immediately; TTS slots start empty.
    pub fn start(core: MixerCore, sample_rate: u32) -> AudioResult<Self> {
        let core = Arc::new(Mutex::new(core));
        let underruns = Arc::new(AtomicU64::new(0));

        let (init_tx, init_rx) = std::sync::mpsc::channel::<AudioResult<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let thread_core = core.clone();
        let thread_underruns = underruns.clone();

        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match build_stream(thread_core, thread_underruns, sample_rate) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = init_tx.send(Err(AudioError::Stream(e.to_string())));
                    return;
                }

                let _ = init_tx.send(Ok(()));

                // Keep the stream alive until the engine is stopped; the
                // callback does all the work from here.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        match init_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    "Audio engine started ({} Hz, {} ch, block {})",
                    sample_rate, OUTPUT_CHANNELS, BLOCK_FRAMES
                );
                Ok(Self {
                    core,
                    underruns,
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::Stream(
                "audio thread exited during initialization".to_string(),
            )),
        }
    }

    /// Hand a synthesized buffer to the mixer. The receiver resolves with
    /// the slot's terminal outcome (finished, preempted, or failed).
    pub fn submit(&self, submission: TtsSubmission) -> oneshot::Receiver<PlaybackOutcome> {
        self.core.lock().submit(submission)
    }

    /// Underruns observed so far (missed callback locks / device gaps).
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Stop playback, resolving any in-flight slots, and close the device.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.core.lock().clear();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let underruns = self.underruns();
        if underruns > 0 {
            warn!("Audio engine stopped with {} underruns", underruns);
        } else {
            info!("Audio engine stopped");
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if self.stop_tx.is_some() {
            self.shutdown();
        }
    }
}

fn build_stream(
    core: Arc<Mutex<MixerCore>>,
    underruns: Arc<AtomicU64>,
    sample_rate: u32,
) -> AudioResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::DeviceUnavailable)?;

    let config = cpal::StreamConfig {
        channels: OUTPUT_CHANNELS,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Fixed(BLOCK_FRAMES),
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // The callback must never wait on anyone. If another thread
                // holds the mixer (a submit in flight), emit silence for
                // this block and count it.
                match core.try_lock() {
                    Some(mut mixer) => mixer.render(data, OUTPUT_CHANNELS as usize),
                    None => {
                        data.fill(0.0);
                        underruns.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            |err| {
                error!("Audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| AudioError::Build(e.to_string()))?;

    Ok(stream)
}
