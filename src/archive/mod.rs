pub mod queue;
pub mod sink;

pub use queue::{ArchiveHandle, ArchiveQueue, ArchiveStats, ArchiveStatsSnapshot};
pub use sink::ArchiveSink;
