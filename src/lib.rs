pub mod api;
pub mod archive;
pub mod config;
pub mod context;
pub mod db;
pub mod debounce;
pub mod error;
pub mod ingest;
pub mod models;
pub mod rollup;
pub mod store;

// Re-export main components for easier use
pub use context::{AppContext, Application};
pub use debounce::{DebounceEngine, Decision};
pub use error::Error;
pub use models::{CameraState, EventRecord};
pub use rollup::{RollupJob, RollupReport};
