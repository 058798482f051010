use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A camera notification after parsing, independent of its wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Camera serial number
    pub serial: String,
    /// Event kind as reported by the camera
    pub event_type: String,
    /// Moment the event occurred, milliseconds since the Unix epoch
    pub ts: i64,
}

impl EventRecord {
    pub fn new(serial: impl Into<String>, event_type: impl Into<String>, ts: i64) -> Self {
        Self {
            serial: serial.into(),
            event_type: event_type.into(),
            ts,
        }
    }

    /// One line of the accepted-event log.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Display for EventRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.serial, self.event_type, self.ts)
    }
}
