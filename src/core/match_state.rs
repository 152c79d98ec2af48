//! In-memory match lifecycle state
//!
//! Tracks team names, the innings phase, and the one-shot announcement
//! flags that gate the welcome / break / end announcements. Derived from
//! upstream; never persisted. Reset whenever the match id changes.

use tracing::info;

/// Innings phase as reported by the innings endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InningsPhase {
    ToBegin,
    Innings1,
    InningsBreak,
    Innings2,
    Ended,
}

impl InningsPhase {
    /// Map the upstream phase string. Unknown strings return `None` and the
    /// previous phase is kept.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "To Begin" => Some(InningsPhase::ToBegin),
            "Innings 1" => Some(InningsPhase::Innings1),
            "Innings Break" => Some(InningsPhase::InningsBreak),
            "Innings 2" => Some(InningsPhase::Innings2),
            "End Innings" => Some(InningsPhase::Ended),
            _ => None,
        }
    }
}

/// Snapshot of current-match facts fetched from the booking endpoint.
#[derive(Debug, Clone, Default)]
pub struct MatchInfo {
    pub match_id: String,
    pub team_one_name: String,
    pub team_two_name: String,
    pub team_one_id: Option<i64>,
    pub team_two_id: Option<i64>,
    pub winner_id: Option<i64>,
}

#[derive(Debug, Default)]
pub struct MatchState {
    pub match_id: Option<String>,
    pub team_one_name: String,
    pub team_two_name: String,
    team_one_id: Option<i64>,
    team_two_id: Option<i64>,
    winner_id: Option<i64>,
    pub phase: Option<InningsPhase>,

    // One-shot announcement flags
    welcomed: bool,
    break_announced: bool,
    ended_announced: bool,
}

impl MatchState {
    pub fn new() -> Self {
        Self {
            team_one_name: "Team 1".to_string(),
            team_two_name: "Team 2".to_string(),
            ..Default::default()
        }
    }

    /// Apply a match snapshot. Returns true when this is a new match, in
    /// which case the announcement flags and phase have been reset.
    pub fn update_from_match(&mut self, info: &MatchInfo) -> bool {
        let is_new = self.match_id.as_deref() != Some(info.match_id.as_str());
        if is_new {
            info!(
                "New match: {} ({} vs {})",
                info.match_id, info.team_one_name, info.team_two_name
            );
            self.reset_for_new_match();
        }

        self.match_id = Some(info.match_id.clone());
        self.team_one_name = info.team_one_name.clone();
        self.team_two_name = info.team_two_name.clone();
        self.team_one_id = info.team_one_id;
        self.team_two_id = info.team_two_id;
        self.winner_id = info.winner_id;
        is_new
    }

    /// Apply a phase observation. Returns true when the phase changed.
    pub fn set_phase(&mut self, phase: InningsPhase) -> bool {
        let changed = self.phase != Some(phase);
        if changed {
            info!("Innings phase changed: {:?} -> {:?}", self.phase, phase);
            self.phase = Some(phase);
        }
        changed
    }

    fn reset_for_new_match(&mut self) {
        self.phase = None;
        self.winner_id = None;
        self.welcomed = false;
        self.break_announced = false;
        self.ended_announced = false;
    }

    pub fn should_announce_welcome(&self) -> bool {
        self.phase == Some(InningsPhase::ToBegin) && !self.welcomed
    }

    pub fn should_announce_break(&self) -> bool {
        self.phase == Some(InningsPhase::InningsBreak) && !self.break_announced
    }

    pub fn should_announce_end(&self) -> bool {
        self.phase == Some(InningsPhase::Ended) && !self.ended_announced
    }

    pub fn mark_welcomed(&mut self) {
        self.welcomed = true;
    }

    pub fn mark_break_announced(&mut self) {
        self.break_announced = true;
    }

    pub fn mark_end_announced(&mut self) {
        self.ended_announced = true;
    }

    /// Winner team name, or `None` for a draw / unknown winner.
    pub fn winner_name(&self) -> Option<&str> {
        let winner_id = self.winner_id?;
        if Some(winner_id) == self.team_one_id {
            Some(&self.team_one_name)
        } else if Some(winner_id) == self.team_two_id {
            Some(&self.team_two_name)
        } else {
            None
        }
    }
}
