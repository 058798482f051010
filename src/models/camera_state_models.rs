use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::EventRecord;

/// Namespace shared by every camera state key in the store.
pub const STATE_KEY_PREFIX: &str = "cam_";

/// Per-camera debounce record, persisted as `{"serial":..,"ts":..,"count":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraState {
    pub serial: String,
    /// Time of the last accepted event in milliseconds
    #[serde(rename = "ts")]
    pub last_ts: i64,
    /// Events accepted since the last rollup
    pub count: u64,
}

impl CameraState {
    /// State for a camera whose first event was just accepted.
    pub fn first(event: &EventRecord) -> Self {
        Self {
            serial: event.serial.clone(),
            last_ts: event.ts,
            count: 1,
        }
    }

    /// Store key for a camera serial.
    pub fn key(serial: &str) -> String {
        format!("{}{}", STATE_KEY_PREFIX, serial)
    }

    /// Whether `ts` lies at or beyond the end of the window opened by the last acceptance.
    pub fn window_elapsed(&self, ts: i64, window_ms: i64) -> bool {
        ts >= self.last_ts.saturating_add(window_ms)
    }

    /// State after accepting another event at `ts`.
    pub fn accept(&self, ts: i64) -> Self {
        Self {
            serial: self.serial.clone(),
            last_ts: ts,
            count: self.count + 1,
        }
    }

    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw).map_err(|e| Error::Decode(e.to_string()))
    }
}
