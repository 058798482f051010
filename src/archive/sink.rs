use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::Error;

/// Append-only destination for accepted event records.
///
/// The destination is opened and released around every record so it can be
/// a named pipe read by another process.
#[derive(Debug, Clone)]
pub struct ArchiveSink {
    path: PathBuf,
    create_if_missing: bool,
}

impl ArchiveSink {
    pub fn new(path: impl Into<PathBuf>, create_if_missing: bool) -> Self {
        Self {
            path: path.into(),
            create_if_missing,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record followed by a newline.
    pub async fn append(&self, record: &str) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(self.create_if_missing)
            .open(&self.path)
            .await
            .map_err(|e| {
                Error::Archive(format!("Failed to open {}: {}", self.path.display(), e))
            })?;

        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        file.write_all(line.as_bytes()).await.map_err(|e| {
            Error::Archive(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        file.flush().await?;

        Ok(())
    }
}
