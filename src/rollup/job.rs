use chrono::NaiveDate;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::Error;
use crate::models::{CameraState, STATE_KEY_PREFIX};
use crate::store::StoreClient;

/// How the store is emptied after a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearMode {
    /// Delete exactly the keys that were archived, each only if unchanged
    /// since it was read. Acceptances racing the rollup survive it.
    #[default]
    Snapshot,
    /// Wipe the whole store after the snapshot
    FlushAll,
}

/// One snapshot document as appended to the dated file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupBatch {
    pub data: Vec<CameraState>,
}

/// What a single rollup cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupReport {
    /// Camera states written to the snapshot
    pub records: usize,
    /// Keys that could not be read or decoded
    pub skipped: usize,
    /// Snapshot file, when anything was written
    pub file: Option<PathBuf>,
    /// Keys removed from the store (not counted for `FlushAll`)
    pub cleared: usize,
    /// Keys that changed during the cycle and were kept with only their new acceptances
    pub carried: usize,
}

const CARRY_OVER_ATTEMPTS: u32 = 8;

/// A key read for the snapshot, with the value it had
struct Archived {
    key: String,
    raw: String,
    state: Option<CameraState>,
}

/// Archives every camera state into `<events_dir>/<YYYY-MM-DD>.json` and resets tracking
#[derive(Clone)]
pub struct RollupJob {
    store: StoreClient,
    events_dir: PathBuf,
    clear_mode: ClearMode,
}

impl RollupJob {
    pub fn new(store: StoreClient, events_dir: impl Into<PathBuf>, clear_mode: ClearMode) -> Self {
        Self {
            store,
            events_dir: events_dir.into(),
            clear_mode,
        }
    }

    /// Snapshot file for a calendar date
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.events_dir
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Run one cycle, naming the output after `date`.
    ///
    /// A failed scan or snapshot write aborts the cycle with the store left
    /// untouched so the next cycle archives the same state.
    pub async fn run_once(&self, date: NaiveDate) -> Result<RollupReport, Error> {
        info!("Running camera state rollup for {}", date);

        let keys = self
            .store
            .scan_prefix(STATE_KEY_PREFIX)
            .await
            .map_err(|e| Error::Rollup(format!("Failed to enumerate camera state: {}", e)))?;

        let mut report = RollupReport::default();
        let mut batch = RollupBatch { data: Vec::new() };
        let mut seen = Vec::with_capacity(keys.len());

        for key in keys {
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                // removed since the scan
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping {} in rollup: {}", key, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let state = match CameraState::decode(&raw) {
                Ok(state) => {
                    batch.data.push(state.clone());
                    Some(state)
                }
                Err(e) => {
                    warn!("Skipping unreadable state {} in rollup: {}", key, e);
                    report.skipped += 1;
                    None
                }
            };
            seen.push(Archived { key, raw, state });
        }

        report.records = batch.data.len();

        if !batch.data.is_empty() {
            let path = self.file_for(date);
            self.append_batch(&path, &batch).await.map_err(|e| {
                Error::Rollup(format!("Failed to write {}: {}", path.display(), e))
            })?;
            report.file = Some(path);
        }

        self.clear(&seen, &mut report).await?;

        info!(
            "Rollup for {} archived {} cameras, skipped {}, cleared {}, carried {}",
            date, report.records, report.skipped, report.cleared, report.carried
        );

        Ok(report)
    }

    async fn append_batch(&self, path: &Path, batch: &RollupBatch) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.events_dir).await?;

        let mut line = serde_json::to_string(batch)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn clear(&self, seen: &[Archived], report: &mut RollupReport) -> Result<(), Error> {
        match self.clear_mode {
            ClearMode::FlushAll => {
                self.store
                    .flush_all()
                    .await
                    .map_err(|e| Error::Rollup(format!("Failed to clear store: {}", e)))?;
            }
            ClearMode::Snapshot => {
                for item in seen {
                    match self.store.delete_if(&item.key, &item.raw).await {
                        Ok(true) => report.cleared += 1,
                        Ok(false) => match &item.state {
                            Some(archived) => {
                                if self.carry_over(&item.key, archived).await {
                                    report.carried += 1;
                                }
                            }
                            None => info!(
                                "{} changed during rollup, keeping it for the next cycle",
                                item.key
                            ),
                        },
                        Err(e) => error!("Failed to clear {} after rollup: {}", item.key, e),
                    }
                }
            }
        }

        Ok(())
    }

    /// Subtract the acceptances already archived from a key that changed after it was read.
    ///
    /// `last_ts` is kept so the debounce window stays intact. A value that no
    /// longer extends the archived one (reset or unreadable) is left as is.
    async fn carry_over(&self, key: &str, archived: &CameraState) -> bool {
        for _ in 0..CARRY_OVER_ATTEMPTS {
            let raw = match self.store.get(key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => return false,
                Err(e) => {
                    error!("Failed to re-read {} after rollup: {}", key, e);
                    return false;
                }
            };

            let current = match CameraState::decode(&raw) {
                Ok(state) if state.count > archived.count => state,
                Ok(_) => return false,
                Err(e) => {
                    warn!("Keeping unreadable {} after rollup: {}", key, e);
                    return false;
                }
            };

            let remaining = CameraState {
                count: current.count - archived.count,
                ..current
            };
            let encoded = match remaining.encode() {
                Ok(encoded) => encoded,
                Err(e) => {
                    error!("Failed to encode carried state for {}: {}", key, e);
                    return false;
                }
            };

            match self.store.compare_and_swap(key, Some(&raw), &encoded).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    let committed = matches!(
                        self.store.get(key).await,
                        Ok(Some(value)) if value == encoded
                    );
                    if !committed {
                        error!("Failed to carry {} over to the next cycle: {}", key, e);
                        return false;
                    }
                }
            }

            info!(
                "{} changed during rollup, carrying {} acceptances to the next cycle",
                key, remaining.count
            );
            return true;
        }

        warn!("{} still changing after rollup, kept unchanged", key);
        false
    }
}
