use log::{debug, warn};

use crate::config::{CorruptStatePolicy, DebounceConfig};
use crate::error::Error;
use crate::models::{CameraState, EventRecord};
use crate::store::StoreClient;

/// Outcome of evaluating one event against its camera's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Event is new; carries the state that was written
    Accepted(CameraState),
    /// Event repeats within the window; carries the untouched state
    Suppressed(CameraState),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted(_))
    }

    pub fn state(&self) -> &CameraState {
        match self {
            Decision::Accepted(state) | Decision::Suppressed(state) => state,
        }
    }
}

/// Per-camera sliding debounce over the associative store.
///
/// The window trails the last *accepted* event: an event is accepted when
/// `ts >= last_ts + window_ms`. Reads and writes are joined by a
/// compare-and-swap so two concurrent events for one camera can never both
/// be accepted inside the same window.
#[derive(Clone)]
pub struct DebounceEngine {
    store: StoreClient,
    window_ms: i64,
    max_cas_attempts: u32,
    on_corrupt_state: CorruptStatePolicy,
}

impl DebounceEngine {
    pub fn new(store: StoreClient, config: &DebounceConfig) -> Self {
        Self {
            store,
            window_ms: config.window_ms,
            max_cas_attempts: config.max_cas_attempts.max(1),
            on_corrupt_state: config.on_corrupt_state,
        }
    }

    /// Decide whether `event` is new for its camera and record the acceptance.
    ///
    /// Writes to the store exactly once on acceptance and never on suppression
    /// or error.
    pub async fn evaluate(&self, event: &EventRecord) -> Result<Decision, Error> {
        let key = CameraState::key(&event.serial);

        for attempt in 1..=self.max_cas_attempts {
            let current = self.store.get(&key).await?;

            let (next, expected) = match current.as_deref() {
                None => (CameraState::first(event), None),
                Some(raw) => match CameraState::decode(raw) {
                    Ok(state) => {
                        if !state.window_elapsed(event.ts, self.window_ms) {
                            return Ok(Decision::Suppressed(state));
                        }
                        (state.accept(event.ts), Some(raw))
                    }
                    Err(err) => match self.on_corrupt_state {
                        CorruptStatePolicy::Reject => {
                            warn!("Rejecting event for {}: stored state unreadable: {}", key, err);
                            return Err(err);
                        }
                        CorruptStatePolicy::Overwrite => {
                            warn!("Replacing unreadable state for {}: {}", key, err);
                            (CameraState::first(event), Some(raw))
                        }
                    },
                },
            };

            let encoded = next.encode()?;
            match self.store.compare_and_swap(&key, expected, &encoded).await {
                Ok(true) => {
                    debug!("Accepted {} (count {})", event, next.count);
                    return Ok(Decision::Accepted(next));
                }
                Ok(false) => {}
                Err(err) if err.is_transient() => {
                    // the write may have committed with only the reply lost
                    if self.store.get(&key).await?.as_deref() == Some(encoded.as_str()) {
                        warn!("Write for {} confirmed after failed reply: {}", key, err);
                        return Ok(Decision::Accepted(next));
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }

            debug!(
                "State for {} changed during evaluation (attempt {}/{})",
                key, attempt, self.max_cas_attempts
            );
        }

        Err(Error::Contention(format!(
            "{} still changing after {} attempts",
            key, self.max_cas_attempts
        )))
    }
}
