pub mod camera_state_models;
pub mod event_models;

pub use camera_state_models::{CameraState, STATE_KEY_PREFIX};
pub use event_models::EventRecord;
