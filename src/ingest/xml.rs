use chrono::{DateTime, NaiveDateTime, Utc};
use yaserde::de::from_str;
use yaserde_derive::{YaDeserialize, YaSerialize};

// Low-level XML parsing struct (matches the camera alert markup)
#[derive(Debug, YaSerialize, YaDeserialize, Default)]
#[yaserde(rename = "EventNotificationAlert")]
pub struct EventNotificationAlert {
    #[yaserde(rename = "serial")]
    pub serial: String,

    #[yaserde(rename = "eventType")]
    pub event_type: String,

    #[yaserde(rename = "dateTime")]
    pub date_time: Option<String>,
}

/// Parse the camera alert markup into its low-level representation
pub fn parse_alert(xml: &str) -> Result<EventNotificationAlert, String> {
    from_str(xml).map_err(|e| format!("Failed to parse event markup: {}", e))
}

/// Parse a camera `dateTime` value into milliseconds since the epoch.
///
/// RFC 3339 with or without fractional seconds is accepted; a value without
/// an offset is taken as UTC.
pub fn parse_date_time(value: &str) -> Result<i64, String> {
    let value = value.trim();

    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Ok(dt.with_timezone(&Utc).timestamp_millis()),
        Err(e) => {
            // Some cameras omit the offset entirely
            match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
                Ok(dt) => Ok(dt.and_utc().timestamp_millis()),
                Err(_) => Err(format!("Failed to parse dateTime '{}': {}", value, e)),
            }
        }
    }
}
