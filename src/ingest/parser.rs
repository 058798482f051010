use serde::{Deserialize, Serialize};

use super::xml::{parse_alert, parse_date_time};
use crate::config::IngestConfig;
use crate::error::Error;
use crate::models::EventRecord;

/// Wire format of an inbound camera event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFormat {
    /// Pick per request from Content-Type, falling back to the body itself
    #[default]
    Auto,
    /// `EventNotificationAlert` markup with `serial`, `eventType`, `dateTime`
    Xml,
    /// Key/value text with `serial`, `event_type`, `ts`
    Json,
}

impl std::str::FromStr for EventFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EventFormat::Auto),
            "xml" => Ok(EventFormat::Xml),
            "json" => Ok(EventFormat::Json),
            other => Err(format!("Unknown event format: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonEvent {
    serial: String,
    #[serde(alias = "eventType")]
    event_type: String,
    #[serde(default)]
    ts: Option<i64>,
}

/// Turns request bodies into [`EventRecord`]s
#[derive(Debug, Clone)]
pub struct EventParser {
    format: EventFormat,
    stamp_receipt_time: bool,
}

impl EventParser {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            format: config.format,
            stamp_receipt_time: config.stamp_receipt_time,
        }
    }

    /// Format to use for one request
    pub fn resolve_format(&self, content_type: Option<&str>, body: &[u8]) -> EventFormat {
        if self.format != EventFormat::Auto {
            return self.format;
        }

        if let Some(content_type) = content_type.map(str::to_ascii_lowercase) {
            if content_type.contains("xml") {
                return EventFormat::Xml;
            }
            if content_type.contains("json") {
                return EventFormat::Json;
            }
        }

        match body.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => EventFormat::Xml,
            _ => EventFormat::Json,
        }
    }

    /// Parse a request body. `received_at` (ms) stamps events without a usable time.
    pub fn parse(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        received_at: i64,
    ) -> Result<EventRecord, Error> {
        let record = match self.resolve_format(content_type, body) {
            EventFormat::Json => self.parse_json(body, received_at)?,
            _ => self.parse_xml(body, received_at)?,
        };

        if record.serial.is_empty() {
            return Err(Error::Parse("serial must not be empty".to_string()));
        }

        Ok(record)
    }

    fn parse_xml(&self, body: &[u8], received_at: i64) -> Result<EventRecord, Error> {
        let text = std::str::from_utf8(body)
            .map_err(|e| Error::Parse(format!("Event markup is not UTF-8: {}", e)))?;
        let alert = parse_alert(text).map_err(Error::Parse)?;

        let ts = match alert.date_time.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => parse_date_time(value).map_err(Error::Parse)?,
            _ => received_at,
        };

        Ok(EventRecord::new(
            alert.serial.trim(),
            alert.event_type.trim(),
            ts,
        ))
    }

    fn parse_json(&self, body: &[u8], received_at: i64) -> Result<EventRecord, Error> {
        let event: JsonEvent = serde_json::from_slice(body)
            .map_err(|e| Error::Parse(format!("Failed to parse event: {}", e)))?;

        let ts = match event.ts {
            Some(ts) if !self.stamp_receipt_time => ts,
            _ => received_at,
        };

        Ok(EventRecord::new(event.serial.trim(), event.event_type, ts))
    }
}
