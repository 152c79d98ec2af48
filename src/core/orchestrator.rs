//! Orchestrator
//!
//! The single consumer loop: pull the next event from the queue, resolve
//! match lifecycle (announcements fire before the event that revealed
//! them), synthesize, hand the buffer to the mixer, and commit once the
//! mixer declares the slot drained or cleanly preempted. A periodic status
//! poll keeps team names and the innings phase fresh even when no events
//! arrive.
//!
//! Commit policy: an event that played at least one frame is committed
//! (partial playback counts as spoken); a submission displaced before any
//! frame is dropped and logged; a fetch that produced no audio is skipped
//! but still committed so it is never retried on restart.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::api::ApiClient;
use crate::core::audio::{
    AudioEngine, HistoryJob, HistorySink, PlaybackEnd, PlaybackOutcome, SpeechBuffer,
    TtsSubmission,
};
use crate::core::event::{Event, PRIORITY_ANNOUNCEMENT};
use crate::core::match_state::MatchState;
use crate::core::queue::EventQueue;
use crate::core::stream::{StreamClient, StreamHandle};
use crate::core::tts::SpeechSynthesizer;

/// Session counters, logged as a summary at shutdown.
#[derive(Debug, Default)]
pub struct Metrics {
    pub received: u64,
    pub spoken: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub preempted: u64,
}

impl Metrics {
    fn log_summary(&self, queue_depth: usize, underruns: u64) {
        info!(
            "Session summary: received={} spoken={} skipped={} dropped={} preempted={} \
             pending={} underruns={}",
            self.received,
            self.spoken,
            self.skipped,
            self.dropped,
            self.preempted,
            queue_depth,
            underruns
        );
    }
}

/// A submission whose outcome is still pending at the mixer.
struct InFlight {
    event_id: String,
    priority: u8,
    rx: oneshot::Receiver<PlaybackOutcome>,
}

pub struct Orchestrator {
    config: EngineConfig,
    queue: EventQueue,
    api: Arc<ApiClient>,
    synth: Arc<dyn SpeechSynthesizer>,
    audio: AudioEngine,
    history: Option<HistorySink>,
    stream: Option<StreamHandle>,
    match_state: MatchState,
    cancel: CancellationToken,
    metrics: Metrics,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        queue: EventQueue,
        api: Arc<ApiClient>,
        synth: Arc<dyn SpeechSynthesizer>,
        audio: AudioEngine,
        history: Option<HistorySink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            queue,
            api,
            synth,
            audio,
            history,
            stream: None,
            match_state: MatchState::new(),
            cancel,
            metrics: Metrics::default(),
        }
    }

    /// Run until cancelled or the queue closes, then shut down the audio
    /// engine and flush the history sink.
    pub async fn run(mut self) {
        self.resolve_initial_match().await;

        let mut poll = tokio::time::interval(self.config.match_poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        poll.reset();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = poll.tick() => self.check_match_status().await,
                event = self.queue.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        info!("Orchestrator shutting down");
        self.queue.close();

        if let Some(stream) = self.stream.take() {
            stream.stop().await;
        }

        let underruns = self.audio.underruns();
        self.audio.stop();

        if let Some(history) = self.history.take() {
            history.shutdown().await;
        }

        self.metrics.log_summary(self.queue.len(), underruns);
    }

    /// Determine the match to subscribe to at startup: the configured id
    /// when pinned, otherwise whatever the booking endpoint reports.
    async fn resolve_initial_match(&mut self) {
        if let Some(id) = self.config.match_id.clone() {
            info!("Pinned to configured match {}", id);
            self.queue.set_match_id(&id).await;
            self.match_state.match_id = Some(id.clone());
            self.start_stream(id);
            // Best-effort enrichment with team names and phase.
            self.check_match_status().await;
        } else {
            self.check_match_status().await;
            if self.stream.is_none() {
                info!("No active match yet; will keep polling");
            }
        }
    }

    fn start_stream(&mut self, match_id: String) {
        let client = StreamClient::new(
            self.config.clone(),
            self.api.clone(),
            self.queue.clone(),
            match_id,
        );
        self.stream = Some(client.spawn(self.cancel.child_token()));
    }

    /// Periodic poll: refresh match facts and innings phase, switch matches
    /// when discovery is enabled, and fire any announcements the new phase
    /// calls for.
    async fn check_match_status(&mut self) {
        let info = match self.api.fetch_current_match().await {
            Ok(Some(info)) => info,
            Ok(None) => {
                debug!("No match scheduled for the current slot");
                return;
            }
            Err(e) => {
                debug!("Match status poll failed: {}", e);
                return;
            }
        };

        let pinned = self.config.match_id.is_some();
        let current = self.match_state.match_id.clone();

        if pinned && current.as_deref() != Some(info.match_id.as_str()) {
            // Stay on the configured match; ignore other bookings.
            debug!("Ignoring booking for other match {}", info.match_id);
            return;
        }

        let is_new = self.match_state.update_from_match(&info);
        if is_new {
            self.queue.set_match_id(&info.match_id).await;
            if let Some(old) = self.stream.take() {
                old.stop().await;
            }
            self.start_stream(info.match_id.clone());
        }

        match self.api.fetch_innings_phase(&info.match_id).await {
            Ok(Some(phase)) => {
                self.match_state.set_phase(phase);
            }
            Ok(None) => {}
            Err(e) => debug!("Innings poll failed: {}", e),
        }

        self.emit_due_announcements().await;
    }

    async fn handle_event(&mut self, event: Event) {
        self.metrics.received += 1;

        if self.match_state.match_id.as_deref() != Some(event.match_id.as_str()) {
            self.switch_match(&event.match_id).await;
        }

        // Lifecycle announcements jump the line: they are injected (and
        // committed) before the event that arrived.
        self.emit_due_announcements().await;

        if !event.has_text() {
            warn!("Event {} has empty text, skipping", event.event_id);
            self.queue.commit(&event.event_id).await;
            self.metrics.skipped += 1;
            return;
        }

        self.dispatch(event).await;
    }

    /// An event for an unknown match means upstream moved on; reset the
    /// lifecycle state and follow it.
    async fn switch_match(&mut self, match_id: &str) {
        info!("Match changed to {}", match_id);
        self.match_state = MatchState::new();
        self.match_state.match_id = Some(match_id.to_string());
        self.queue.set_match_id(match_id).await;

        if let Some(old) = self.stream.take() {
            old.stop().await;
        }
        self.start_stream(match_id.to_string());

        if let Ok(Some(info)) = self.api.fetch_current_match().await {
            if info.match_id == match_id {
                self.match_state.update_from_match(&info);
            }
        }
    }

    /// Play the inbound event, staying responsive to strictly
    /// higher-priority arrivals: those are submitted immediately and the
    /// mixer preempts at the next block boundary.
    async fn dispatch(&mut self, event: Event) {
        let mut current = self.submit(event);
        let mut queue_open = true;

        loop {
            tokio::select! {
                outcome = &mut current.rx => {
                    match outcome {
                        Ok(outcome) => self.settle(outcome).await,
                        Err(_) => {
                            // Mixer dropped the slot without reporting;
                            // treat like an un-played preemption.
                            warn!("No outcome for {}", current.event_id);
                            self.metrics.dropped += 1;
                        }
                    }
                    return;
                }

                preemptor = self.queue.next_preempting(current.priority),
                    if queue_open && current.priority > PRIORITY_ANNOUNCEMENT =>
                {
                    match preemptor {
                        Some(preemptor) => {
                            self.metrics.received += 1;
                            if !preemptor.has_text() {
                                self.queue.commit(&preemptor.event_id).await;
                                self.metrics.skipped += 1;
                                continue;
                            }
                            let displaced = std::mem::replace(
                                &mut current,
                                self.submit(preemptor),
                            );
                            // The displaced outcome resolves at once.
                            if let Ok(outcome) = displaced.rx.await {
                                self.settle(outcome).await;
                            }
                        }
                        None => queue_open = false,
                    }
                }

                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Start the streaming fetch and hand the (still filling) buffer to
    /// the mixer.
    fn submit(&self, event: Event) -> InFlight {
        let excitement = event.excitement();
        self.submit_with_excitement(event, excitement)
    }

    /// As [`submit`](Self::submit), with the voice excitement given
    /// explicitly rather than derived from the event's intensity.
    fn submit_with_excitement(&self, event: Event, excitement: u8) -> InFlight {
        let buffer = SpeechBuffer::new();
        let event_id = event.event_id.clone();

        let synth = self.synth.clone();
        let fetch_buffer = buffer.clone();
        let fetch_cancel = self.cancel.child_token();
        let fetch_id = event_id.clone();
        let text = event.text.clone();
        tokio::spawn(async move {
            if let Err(e) = synth
                .synthesize(&text, excitement, fetch_buffer, fetch_cancel)
                .await
            {
                warn!("TTS fetch for {} failed: {}", fetch_id, e);
            }
        });

        let rx = self.audio.submit(TtsSubmission {
            event_id: event_id.clone(),
            priority: event.priority,
            buffer,
        });

        debug!(
            "Submitted '{}' (priority {}, excitement {})",
            event_id, event.priority, excitement
        );

        InFlight {
            event_id,
            priority: event.priority,
            rx,
        }
    }

    /// Apply the commit policy to a terminal playback outcome.
    async fn settle(&mut self, outcome: PlaybackOutcome) {
        match outcome.end {
            PlaybackEnd::Finished => {
                self.archive(&outcome);
                self.queue.commit(&outcome.event_id).await;
                self.metrics.spoken += 1;
            }
            PlaybackEnd::Preempted => {
                self.metrics.preempted += 1;
                if outcome.frames_played > 0 {
                    // Partial playback counts as spoken.
                    self.archive(&outcome);
                    self.queue.commit(&outcome.event_id).await;
                    self.metrics.spoken += 1;
                } else {
                    info!(
                        "Event {} displaced before playback, dropped",
                        outcome.event_id
                    );
                    self.metrics.dropped += 1;
                }
            }
            PlaybackEnd::Failed => {
                // Skipped, but committed: stale commentary is worse than
                // none, so it must not replay on restart.
                warn!("Event {} produced no audio, skipping", outcome.event_id);
                self.queue.commit(&outcome.event_id).await;
                self.metrics.skipped += 1;
            }
        }
    }

    fn archive(&self, outcome: &PlaybackOutcome) {
        let Some(history) = &self.history else { return };
        if outcome.captured.is_empty() {
            return;
        }
        let Some(match_id) = self.match_state.match_id.clone() else {
            return;
        };
        history.submit(HistoryJob {
            event_id: outcome.event_id.clone(),
            match_id,
            samples: outcome.captured.clone(),
        });
    }

    /// Fire every announcement the current phase calls for, in lifecycle
    /// order. Announcement ids are committed on submission.
    async fn emit_due_announcements(&mut self) {
        if self.match_state.should_announce_welcome() {
            let text = format!(
                "Ladies and gentlemen, welcome to this exciting indoor cricket match \
                 between {} and {}! Here we go!",
                self.match_state.team_one_name, self.match_state.team_two_name
            );
            self.emit_announcement("welcome", text, 9).await;
            self.match_state.mark_welcomed();
        }

        if self.match_state.should_announce_break() {
            let text =
                "That's the end of the first innings! Time for a short break.".to_string();
            self.emit_announcement("break", text, 4).await;
            self.match_state.mark_break_announced();
        }

        if self.match_state.should_announce_end() {
            let text = match self.match_state.winner_name() {
                Some(winner) => format!(
                    "And that's the game! {winner} wins this thrilling contest! What a match!"
                ),
                None => {
                    "And that's the game! It's a thrilling draw! What a contest!".to_string()
                }
            };
            self.emit_announcement("end", text, 10).await;
            self.match_state.mark_end_announced();
        }
    }

    async fn emit_announcement(&mut self, kind: &str, text: String, excitement: u8) {
        let event_id = format!("special_event_announcement_{}_{}", kind, unix_now());
        info!("Announcing ({}): {}", kind, text);

        let event = Event {
            event_id: event_id.clone(),
            match_id: self.match_state.match_id.clone().unwrap_or_default(),
            text,
            intensity: intensity_for(excitement),
            priority: PRIORITY_ANNOUNCEMENT,
        };

        // The template's excitement drives the voice directly; the
        // intensity label on the synthetic event is nominal (the enum
        // cannot represent every template level, e.g. the break's 4).
        let in_flight = self.submit_with_excitement(event, excitement);

        // Committed as soon as submitted.
        self.queue.commit(&event_id).await;
        self.metrics.spoken += 1;

        // Announcements archive like any other mixed event.
        tokio::select! {
            outcome = in_flight.rx => {
                if let Ok(outcome) = outcome {
                    if outcome.frames_played > 0 {
                        self.archive(&outcome);
                    }
                }
            }
            _ = self.cancel.cancelled() => {}
        }
    }
}

/// Closest intensity label for a template's excitement level. Lossy for
/// levels the enum cannot represent; announcement playback passes the
/// literal excitement to the fetcher and never re-derives it from this.
fn intensity_for(excitement: u8) -> crate::core::event::Intensity {
    use crate::core::event::Intensity;
    match excitement {
        0..=2 => Intensity::Low,
        3..=5 => Intensity::Normal,
        6..=7 => Intensity::Medium,
        8..=9 => Intensity::High,
        _ => Intensity::Extreme,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intensity_for_template_levels() {
        use crate::core::event::Intensity;
        assert_eq!(intensity_for(4), Intensity::Normal);
        assert_eq!(intensity_for(9), Intensity::High);
        assert_eq!(intensity_for(10), Intensity::Extreme);
    }
}
