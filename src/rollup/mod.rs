pub mod job;
pub mod scheduler;

pub use job::{ClearMode, RollupBatch, RollupJob, RollupReport};
pub use scheduler::{Cadence, RollupScheduler};
