//! Commentary event model and wire format
//!
//! One `Event` is one unit of commentary: an opaque id, the authoritative
//! text, an intensity (which drives the TTS voice emotion), and a playback
//! priority derived from the upstream classification. Events are immutable
//! once parsed.

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while decoding an inbound event payload.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Event missing required field: {0}")]
    MissingField(&'static str),
}

/// Commentary intensity as delivered by the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    Low,
    Normal,
    Medium,
    High,
    Extreme,
}

impl Intensity {
    /// Parse the wire string; unknown values fall back to `Normal`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "low" => Intensity::Low,
            "medium" => Intensity::Medium,
            "high" => Intensity::High,
            "extreme" => Intensity::Extreme,
            _ => Intensity::Normal,
        }
    }

    /// Fixed intensity → excitement mapping (0-10, monotonic).
    pub fn excitement(self) -> u8 {
        match self {
            Intensity::Low => 2,
            Intensity::Normal => 5,
            Intensity::Medium => 7,
            Intensity::High => 9,
            Intensity::Extreme => 10,
        }
    }
}

/// Playback priority; smaller wins.
pub const PRIORITY_ANNOUNCEMENT: u8 = 0;
pub const PRIORITY_SPECIAL: u8 = 1;
pub const PRIORITY_NORMAL: u8 = 2;

/// Raw wire shape of an inbound event.
#[derive(Debug, Deserialize)]
struct WireEvent {
    event_id: Option<String>,
    match_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    batsman_name: Option<String>,
    sentences: Option<String>,
    #[serde(default)]
    intensity: Option<String>,
    #[serde(default)]
    priority_class: Option<String>,
}

/// One accepted unit of commentary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_id: String,
    pub match_id: String,
    /// Authoritative utterance. Never transformed.
    pub text: String,
    pub intensity: Intensity,
    /// Derived at parse time; smaller = higher priority.
    pub priority: u8,
}

impl Event {
    /// Decode an inbound JSON payload into an event.
    ///
    /// `event_id`, `match_id` and `sentences` are required; everything else
    /// is tolerant. Priority comes from the explicit `priority_class` field
    /// when present; the legacy id-prefix encoding is a fallback only.
    pub fn parse(payload: &str) -> Result<Self, EventParseError> {
        Self::from_wire(serde_json::from_str(payload)?)
    }

    /// Decode an already-parsed JSON value (catch-up batches arrive as an
    /// array of these).
    pub fn from_json(value: serde_json::Value) -> Result<Self, EventParseError> {
        Self::from_wire(serde_json::from_value(value)?)
    }

    fn from_wire(wire: WireEvent) -> Result<Self, EventParseError> {
        let event_id = wire
            .event_id
            .filter(|v| !v.is_empty())
            .ok_or(EventParseError::MissingField("event_id"))?;
        let match_id = wire
            .match_id
            .filter(|v| !v.is_empty())
            .ok_or(EventParseError::MissingField("match_id"))?;
        let text = wire
            .sentences
            .ok_or(EventParseError::MissingField("sentences"))?;

        let intensity = Intensity::parse(wire.intensity.as_deref().unwrap_or("normal"));
        let priority = classify(wire.priority_class.as_deref(), &event_id);

        Ok(Event {
            event_id,
            match_id,
            text,
            intensity,
            priority,
        })
    }

    /// Excitement level for the TTS voice, derived from intensity.
    pub fn excitement(&self) -> u8 {
        self.intensity.excitement()
    }

    /// Whether the text carries anything worth speaking.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Compute playback priority from the upstream classification.
///
/// The explicit `priority_class` field always wins. Older publishers encode
/// the class inside the event id (`special_event_<type>_<ts>`); that parse
/// is kept as a fallback, mapping announcement/system → 0, wicket/special
/// → 1, everything else → 2.
fn classify(priority_class: Option<&str>, event_id: &str) -> u8 {
    if let Some(class) = priority_class {
        return match class.trim().to_lowercase().as_str() {
            "announcement" => PRIORITY_ANNOUNCEMENT,
            "special" => PRIORITY_SPECIAL,
            _ => PRIORITY_NORMAL,
        };
    }

    let mut parts = event_id.splitn(4, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("special"), Some("event"), Some(kind)) => match kind.to_lowercase().as_str() {
            "announcement" | "system" => PRIORITY_ANNOUNCEMENT,
            "wicket" | "special" => PRIORITY_SPECIAL,
            _ => PRIORITY_NORMAL,
        },
        _ => PRIORITY_NORMAL,
    }
}
