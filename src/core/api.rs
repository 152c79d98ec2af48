//! REST client for the match backend
//!
//! Three lookups: the current match (booking by time slot), the innings
//! phase, and the missed-events catch-up batch. All failures here are
//! transient from the engine's point of view; callers log and move on.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::event::Event;
use super::match_state::{InningsPhase, MatchInfo};

/// Errors from backend API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(reqwest::StatusCode),
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct BookingResponse {
    #[serde(default)]
    message: String,
    #[serde(rename = "match", default)]
    match_data: Option<WireMatch>,
}

#[derive(Debug, Deserialize)]
struct WireMatch {
    #[serde(default)]
    match_id: Option<serde_json::Value>,
    #[serde(default)]
    slot_id: Option<serde_json::Value>,
    #[serde(rename = "teamOneName", default)]
    team_one_name: Option<String>,
    #[serde(rename = "teamTwoName", default)]
    team_two_name: Option<String>,
    #[serde(rename = "teamOneId", default)]
    team_one_id: Option<i64>,
    #[serde(rename = "teamTwoId", default)]
    team_two_id: Option<i64>,
    #[serde(rename = "winnerId", default)]
    winner_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InningsResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    innings: Option<WireInnings>,
}

#[derive(Debug, Deserialize)]
struct WireInnings {
    #[serde(default)]
    inning: Option<String>,
}

/// Client for the cricket match backend.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("wicketcast/0.3")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the match booked for the current time slot.
    ///
    /// Returns `None` when no match is scheduled.
    pub async fn fetch_current_match(&self) -> ApiResult<Option<MatchInfo>> {
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%dT%H:00:00")
            .to_string();
        let url = format!("{}/bookings/get_booking_by_time/", self.base_url);

        let response = self
            .http
            .get(&url)
            .query(&[("timestamp", timestamp.as_str())])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }

        let body: BookingResponse = response.json().await?;
        if body.message != "Successfully fetched Match Slot" {
            debug!("No match for timestamp {}: {}", timestamp, body.message);
            return Ok(None);
        }

        Ok(body.match_data.and_then(match_info_from_wire))
    }

    /// Fetch the innings phase for a match. Unknown phase strings map to
    /// `None`.
    pub async fn fetch_innings_phase(&self, match_id: &str) -> ApiResult<Option<InningsPhase>> {
        let url = format!("{}/innings/get_innings", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("match_id", match_id)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }

        let body: InningsResponse = response.json().await?;
        if body.message != "Successfully fetched Innings" {
            return Ok(None);
        }

        Ok(body
            .innings
            .and_then(|i| i.inning)
            .and_then(|s| InningsPhase::parse(&s)))
    }

    /// Fetch events missed while disconnected, in chronological order.
    ///
    /// 404 and an empty array both mean nothing was missed. Malformed
    /// entries are logged and skipped; one bad row must not poison the
    /// batch.
    pub async fn fetch_missed_events(
        &self,
        match_id: &str,
        after_id: Option<&str>,
    ) -> ApiResult<Vec<Event>> {
        let url = format!("{}/commentary/missed-events", self.base_url);
        let mut query: Vec<(&str, &str)> = vec![("match_id", match_id)];
        if let Some(after) = after_id {
            query.push(("after_id", after));
        }

        let response = self.http.get(&url).query(&query).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }

        let rows: Vec<serde_json::Value> = response.json().await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match Event::from_json(row) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping malformed missed event: {}", e),
            }
        }
        Ok(events)
    }
}

fn match_info_from_wire(wire: WireMatch) -> Option<MatchInfo> {
    let match_id = wire
        .match_id
        .or(wire.slot_id)
        .map(json_id_to_string)
        .filter(|id| !id.is_empty())?;

    Some(MatchInfo {
        match_id,
        team_one_name: wire.team_one_name.unwrap_or_else(|| "Team 1".to_string()),
        team_two_name: wire.team_two_name.unwrap_or_else(|| "Team 2".to_string()),
        team_one_id: wire.team_one_id,
        team_two_id: wire.team_two_id,
        winner_id: wire.winner_id,
    })
}

/// The backend serves ids as either strings or integers.
fn json_id_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}
