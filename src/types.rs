use crate::consts::UNKNOWN_NUMBER;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Which physical line a monitor watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIdentity {
    pub line: String,
    pub description: String,
}

/// A call in progress (or just ended) on one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: Uuid,
    pub line: String,
    pub description: String,
    /// Caller-ID digits, or `"unknown"` until a payload arrives
    pub number: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub rings: u32,
}

impl Call {
    pub fn new(identity: &LineIdentity, number: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            line: identity.line.clone(),
            description: identity.description.clone(),
            number: number.unwrap_or_else(|| UNKNOWN_NUMBER.to_string()),
            started_at: OffsetDateTime::now_utc(),
            rings: 1,
        }
    }
}

/// Lifecycle notifications published by a line monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum MonitorEvent {
    #[serde(rename = "init")]
    Init(LineIdentity),
    #[serde(rename = "ringing.start")]
    RingingStart(Call),
    #[serde(rename = "ringing")]
    Ringing(Call),
    #[serde(rename = "ringing.end")]
    RingingEnd(Call),
}

impl MonitorEvent {
    pub fn line(&self) -> &str {
        match self {
            MonitorEvent::Init(identity) => &identity.line,
            MonitorEvent::RingingStart(call)
            | MonitorEvent::Ringing(call)
            | MonitorEvent::RingingEnd(call) => &call.line,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Init(_) => "init",
            MonitorEvent::RingingStart(_) => "ringing.start",
            MonitorEvent::Ringing(_) => "ringing",
            MonitorEvent::RingingEnd(_) => "ringing.end",
        }
    }
}

pub struct AppState {
    pub events: broadcast::Sender<MonitorEvent>,
    // line => ongoing call
    pub calls: Arc<Mutex<HashMap<String, Call>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> LineIdentity {
        LineIdentity {
            line: "100".to_string(),
            description: "Front desk".to_string(),
        }
    }

    #[test]
    fn new_call_defaults_to_unknown_number() {
        let call = Call::new(&identity(), None);
        assert_eq!(call.number, "unknown");
        assert_eq!(call.rings, 1);
        assert_eq!(call.line, "100");
        assert_eq!(call.description, "Front desk");
    }

    #[test]
    fn events_serialize_with_dotted_tags() {
        let call = Call::new(&identity(), Some("2025550123".to_string()));
        let json = serde_json::to_value(MonitorEvent::RingingStart(call.clone())).unwrap();
        assert_eq!(json["event"], "ringing.start");
        assert_eq!(json["number"], "2025550123");
        assert_eq!(json["line"], "100");

        let json = serde_json::to_string(&MonitorEvent::RingingEnd(call.clone())).unwrap();
        let back: MonitorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MonitorEvent::RingingEnd(call));
    }

    #[test]
    fn init_event_carries_line() {
        let event = MonitorEvent::Init(identity());
        assert_eq!(event.line(), "100");
        assert_eq!(event.name(), "init");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "init");
        assert_eq!(json["description"], "Front desk");
    }
}
