//! Block mixer
//!
//! `MixerCore` owns everything the realtime callback touches: the ambience
//! pointer, the ducking gain, the single active TTS slot and the small
//! pending queue. `render` runs once per device block; `submit` runs on
//! whatever thread hands a synthesized buffer over and only takes the same
//! short lock the callback takes.
//!
//! Preemption protocol: a submission with strictly higher priority than the
//! active slot replaces it at the next block boundary; the displaced slot
//! reports how many frames it actually played so the caller can decide
//! whether that counts as spoken. Equal or lower priority appends behind
//! the active slot in (priority, arrival) order.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tracing::debug;

use super::ambience::AmbienceLoop;
use super::buffer::SpeechBuffer;
use super::ducking::DuckingController;

/// Capture headroom reserved per slot when history saving is on, so the
/// callback itself never reallocates for typical utterances.
const CAPTURE_RESERVE_FRAMES: usize = 22_050 * 30;

/// How a playback slot ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Buffer drained to completion (including truncated-but-played
    /// streams).
    Finished,
    /// Displaced by a higher-priority submission.
    Preempted,
    /// The fetch produced no audio at all (timeout or error before the
    /// first sample). No duck happened.
    Failed,
}

/// Terminal report for one submission.
#[derive(Debug)]
pub struct PlaybackOutcome {
    pub event_id: String,
    pub end: PlaybackEnd,
    /// Frames of this submission that reached the device mix.
    pub frames_played: u64,
    /// Mixed waveform over the slot's span (mono), empty unless history
    /// capture is enabled.
    pub captured: Vec<f32>,
}

/// One synthesized utterance handed to the mixer.
pub struct TtsSubmission {
    pub event_id: String,
    pub priority: u8,
    pub buffer: SpeechBuffer,
}

struct Slot {
    event_id: String,
    priority: u8,
    buffer: SpeechBuffer,
    /// Set once the first sample has been mixed; gates the duck.
    started: bool,
    frames_played: u64,
    captured: Vec<f32>,
    done: Option<oneshot::Sender<PlaybackOutcome>>,
    seq: u64,
}

impl Slot {
    fn resolve(mut self, end: PlaybackEnd) {
        let outcome = PlaybackOutcome {
            event_id: std::mem::take(&mut self.event_id),
            end,
            frames_played: self.frames_played,
            captured: std::mem::take(&mut self.captured),
        };
        if let Some(done) = self.done.take() {
            // The receiver may have given up waiting; that is fine.
            let _ = done.send(outcome);
        }
    }
}

pub struct MixerCore {
    ambience: AmbienceLoop,
    ducking: DuckingController,
    active: Option<Slot>,
    pending: VecDeque<Slot>,
    seq: u64,
    save_audio: bool,
    /// Per-block staging for drained TTS samples; sized on first use.
    scratch: Vec<f32>,
}

impl MixerCore {
    pub fn new(ambience: AmbienceLoop, ducking: DuckingController, save_audio: bool) -> Self {
        Self {
            ambience,
            ducking,
            active: None,
            pending: VecDeque::new(),
            seq: 0,
            save_audio,
            scratch: Vec::new(),
        }
    }

    /// Hand a submission to the mixer. The returned receiver resolves with
    /// the slot's terminal outcome.
    pub fn submit(&mut self, submission: TtsSubmission) -> oneshot::Receiver<PlaybackOutcome> {
        let (done_tx, done_rx) = oneshot::channel();
        self.seq += 1;
        let mut slot = Slot {
            event_id: submission.event_id,
            priority: submission.priority,
            buffer: submission.buffer,
            started: false,
            frames_played: 0,
            captured: Vec::new(),
            done: Some(done_tx),
            seq: self.seq,
        };
        if self.save_audio {
            slot.captured.reserve(CAPTURE_RESERVE_FRAMES);
        }

        let preempts = self
            .active
            .as_ref()
            .map(|active| slot.priority < active.priority)
            .unwrap_or(false);

        if preempts {
            if let Some(displaced) = self.active.take() {
                debug!(
                    "Preempting '{}' (priority {}) with '{}' (priority {})",
                    displaced.event_id, displaced.priority, slot.event_id, slot.priority
                );
                displaced.resolve(PlaybackEnd::Preempted);
            }
            self.active = Some(slot);
        } else if self.active.is_none() && self.pending.is_empty() {
            self.active = Some(slot);
        } else {
            let at = self
                .pending
                .iter()
                .position(|queued| (slot.priority, slot.seq) < (queued.priority, queued.seq))
                .unwrap_or(self.pending.len());
            self.pending.insert(at, slot);
        }

        done_rx
    }

    /// Mix one block of interleaved output. Called from the device callback;
    /// must stay allocation-free in the steady state and never block.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let frames = out.len() / channels;

        if self.scratch.len() < frames {
            self.scratch.resize(frames, 0.0);
        }

        self.reap_failed_slots();
        if self.active.is_none() {
            self.promote_next();
        }

        // Duck the moment the first PCM actually exists; a slot whose fetch
        // is still waiting leaves the ambience untouched.
        let mut tts_samples = 0usize;
        if let Some(slot) = self.active.as_mut() {
            let status = slot.buffer.status();
            if !slot.started && status.available > 0 {
                slot.started = true;
                self.ducking.duck();
            }
            if slot.started {
                tts_samples = slot.buffer.drain(&mut self.scratch[..frames]);
            }
        }

        let capture = self.save_audio && self.active.as_ref().is_some_and(|s| s.started);

        for i in 0..frames {
            let gain = self.ducking.advance();
            let [mut left, mut right] = self.ambience.next_frame();
            left *= gain;
            right *= gain;

            if i < tts_samples {
                let speech = self.scratch[i];
                left += speech;
                right += speech;
            }

            out[i * channels] = left;
            if channels > 1 {
                out[i * channels + 1] = right;
                for extra in 2..channels {
                    out[i * channels + extra] = 0.0;
                }
            }

            if let Some(slot) = self.active.as_mut() {
                if i < tts_samples {
                    slot.frames_played += 1;
                }
                if capture {
                    slot.captured.push(0.5 * (left + right));
                }
            }
        }

        self.finish_drained_slot();
    }

    /// Drop queued or active slots whose fetch ended without producing any
    /// audio. No duck has happened for these.
    fn reap_failed_slots(&mut self) {
        let dead = |slot: &Slot| {
            let status = slot.buffer.status();
            !slot.started && status.closed && status.available == 0
        };

        if let Some(slot) = self.active.take_if(|slot| dead(slot)) {
            debug!("Clearing failed slot '{}'", slot.event_id);
            slot.resolve(PlaybackEnd::Failed);
        }

        let mut i = 0;
        while i < self.pending.len() {
            if dead(&self.pending[i]) {
                if let Some(slot) = self.pending.remove(i) {
                    debug!("Clearing failed queued slot '{}'", slot.event_id);
                    slot.resolve(PlaybackEnd::Failed);
                }
            } else {
                i += 1;
            }
        }
    }

    fn promote_next(&mut self) {
        if let Some(slot) = self.pending.pop_front() {
            self.active = Some(slot);
        }
    }

    fn finish_drained_slot(&mut self) {
        let drained = self.active.take_if(|slot| {
            let status = slot.buffer.status();
            slot.started && status.closed && status.available == 0
        });

        if let Some(slot) = drained {
            debug!(
                "Slot '{}' finished after {} frames",
                slot.event_id, slot.frames_played
            );
            slot.resolve(PlaybackEnd::Finished);
            self.promote_next();
        }

        if self.active.is_none() && self.pending.is_empty() {
            self.ducking.restore();
        }
    }

    /// Current ambience gain, exposed for observability and tests.
    pub fn ambience_gain(&self) -> f32 {
        self.ducking.current()
    }

    pub fn has_active_slot(&self) -> bool {
        self.active.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Resolve every slot as preempted and drop it. Used at shutdown.
    pub fn clear(&mut self) {
        if let Some(slot) = self.active.take() {
            slot.resolve(PlaybackEnd::Preempted);
        }
        while let Some(slot) = self.pending.pop_front() {
            slot.resolve(PlaybackEnd::Preempted);
        }
        self.ducking.restore();
    }
}
