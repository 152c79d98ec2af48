//! Ambience loop
//!
//! The crowd bed: a WAV decoded once at startup and looped forever under
//! the mix. The last few milliseconds are cross-faded into the first few at
//! load time so the wrap point is inaudible. No decoding or file access
//! happens after startup, and no resampling is performed: the file must
//! match the engine's configured sample rate.

use std::path::Path;

use thiserror::Error;
use tracing::info;

/// Cross-fade window applied at the loop seam.
const CROSSFADE_MS: u32 = 20;

/// Errors loading the ambience asset. All of them leave the engine running
/// with a silent ambience channel; none are fatal.
#[derive(Debug, Error)]
pub enum AmbienceError {
    #[error("Failed to read ambience file: {0}")]
    Io(#[from] hound::Error),

    #[error("Ambience sample rate {found} does not match engine rate {expected}")]
    SampleRateMismatch { found: u32, expected: u32 },

    #[error("Unsupported ambience channel count: {0}")]
    UnsupportedChannels(u16),
}

/// Decoded, seam-blended ambience frames with a wrapping read pointer.
#[derive(Debug)]
pub struct AmbienceLoop {
    frames: Vec<[f32; 2]>,
    pos: usize,
}

impl AmbienceLoop {
    /// Load and prepare the ambience bed.
    pub fn load(path: &Path, expected_rate: u32) -> Result<Self, AmbienceError> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        if spec.sample_rate != expected_rate {
            return Err(AmbienceError::SampleRateMismatch {
                found: spec.sample_rate,
                expected: expected_rate,
            });
        }
        if spec.channels == 0 || spec.channels > 2 {
            return Err(AmbienceError::UnsupportedChannels(spec.channels));
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()?,
        };

        let mut frames: Vec<[f32; 2]> = if spec.channels == 1 {
            samples.iter().map(|&s| [s, s]).collect()
        } else {
            samples.chunks_exact(2).map(|c| [c[0], c[1]]).collect()
        };

        blend_seam(&mut frames, expected_rate);

        info!(
            "Loaded ambience: {} ({} frames, {} Hz, {} ch)",
            path.display(),
            frames.len(),
            spec.sample_rate,
            spec.channels
        );

        Ok(Self { frames, pos: 0 })
    }

    /// A silent ambience channel, used when the asset is missing.
    pub fn silent() -> Self {
        Self {
            frames: Vec::new(),
            pos: 0,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.frames.is_empty()
    }

    /// Next stereo frame, wrapping at the seam.
    #[inline]
    pub fn next_frame(&mut self) -> [f32; 2] {
        if self.frames.is_empty() {
            return [0.0, 0.0];
        }
        let frame = self.frames[self.pos];
        self.pos += 1;
        if self.pos == self.frames.len() {
            self.pos = 0;
        }
        frame
    }
}

/// Cross-fade the tail of the loop into its head so the wrap is seamless.
fn blend_seam(frames: &mut [[f32; 2]], sample_rate: u32) {
    let window = ((sample_rate as usize * CROSSFADE_MS as usize) / 1000).min(frames.len() / 2);
    if window == 0 {
        return;
    }

    let len = frames.len();
    for i in 0..window {
        let t = (i + 1) as f32 / window as f32;
        let head = frames[i];
        let tail = &mut frames[len - window + i];
        tail[0] = tail[0] * (1.0 - t) + head[0] * t;
        tail[1] = tail[1] * (1.0 - t) + head[1] * t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let value = ((i % 100) as i16) * 100;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_mono_and_wrap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bed.wav");
        write_wav(&path, 22050, 1, 4410);

        let mut ambience = AmbienceLoop::load(&path, 22050).unwrap();
        assert!(!ambience.is_silent());

        // Walk past the seam twice; the pointer must wrap, never run out.
        for _ in 0..(4410 * 2 + 5) {
            let [l, r] = ambience.next_frame();
            assert_eq!(l, r, "mono expands to identical channels");
        }
    }

    #[test]
    fn test_load_stereo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bed.wav");
        write_wav(&path, 22050, 2, 2000);

        let mut ambience = AmbienceLoop::load(&path, 22050).unwrap();
        let _ = ambience.next_frame();
    }

    #[test]
    fn test_sample_rate_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bed.wav");
        write_wav(&path, 44100, 1, 1000);

        let err = AmbienceLoop::load(&path, 22050).unwrap_err();
        assert!(matches!(
            err,
            AmbienceError::SampleRateMismatch {
                found: 44100,
                expected: 22050
            }
        ));
    }

    #[test]
    fn test_missing_file_is_an_error_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let err = AmbienceLoop::load(&dir.path().join("missing.wav"), 22050);
        assert!(err.is_err());
    }

    #[test]
    fn test_silent_channel() {
        let mut ambience = AmbienceLoop::silent();
        assert!(ambience.is_silent());
        assert_eq!(ambience.next_frame(), [0.0, 0.0]);
    }
}
