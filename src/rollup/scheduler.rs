use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::job::RollupJob;

/// Calendar schedule of the rollup trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Every day at midnight
    #[default]
    Daily,
    /// At the top of every hour
    Hourly,
    /// Fixed interval from the previous trigger
    Every { seconds: u64 },
}

impl Cadence {
    /// First trigger instant strictly after `now`.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let boundary = match self {
            Cadence::Daily => now
                .date_naive()
                .succ_opt()
                .and_then(|day| day.and_hms_opt(0, 0, 0)),
            Cadence::Hourly => now
                .date_naive()
                .and_hms_opt(now.hour(), 0, 0)
                .map(|hour| hour + ChronoDuration::hours(1)),
            Cadence::Every { seconds } => {
                let step = ChronoDuration::seconds((*seconds).max(1) as i64);
                return now.clone() + step;
            }
        };

        boundary
            .and_then(|naive| resolve_local(&now.timezone(), naive))
            .filter(|next| next > now)
            .unwrap_or_else(|| now.clone() + self.fallback_step())
    }

    fn fallback_step(&self) -> ChronoDuration {
        match self {
            Cadence::Daily => ChronoDuration::days(1),
            Cadence::Hourly => ChronoDuration::hours(1),
            Cadence::Every { seconds } => ChronoDuration::seconds((*seconds).max(1) as i64),
        }
    }
}

// Wall-clock times skipped by a DST change resolve to the first instant after the gap
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        tz.from_local_datetime(&(naive + ChronoDuration::hours(1)))
            .earliest()
    })
}

/// Runs a [`RollupJob`] on its cadence until cancelled
pub struct RollupScheduler {
    job: RollupJob,
    cadence: Cadence,
    utc: bool,
}

impl RollupScheduler {
    pub fn new(job: RollupJob, cadence: Cadence, utc: bool) -> Self {
        Self { job, cadence, utc }
    }

    /// Start the rollup loop in the background
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        info!("Starting rollup scheduler ({:?})", self.cadence);

        tokio::spawn(async move {
            loop {
                let (wait, date) = self.next_trigger();

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                if let Err(e) = self.job.run_once(date).await {
                    error!("Rollup cycle skipped: {}", e);
                }
            }

            info!("Rollup scheduler stopped");
        })
    }

    /// Time until the next trigger and the date its snapshot is filed under
    fn next_trigger(&self) -> (Duration, NaiveDate) {
        if self.utc {
            wait_and_date(&self.cadence, Utc::now())
        } else {
            wait_and_date(&self.cadence, Local::now())
        }
    }
}

fn wait_and_date<Tz: TimeZone>(cadence: &Cadence, now: DateTime<Tz>) -> (Duration, NaiveDate) {
    let next = cadence.next_after(&now);
    let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);
    // label the snapshot with the day that just ended, not the one starting at midnight
    let label = next - ChronoDuration::milliseconds(1);
    (wait, label.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::rollup::ClearMode;
    use crate::store::{MemoryStore, StateStore, StoreClient};
    use chrono::FixedOffset;
    use std::sync::Arc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn daily_fires_at_next_midnight() {
        let next = Cadence::Daily.next_after(&at(2024, 3, 9, 13, 45, 0));
        assert_eq!(next, at(2024, 3, 10, 0, 0, 0));
    }

    #[test]
    fn daily_at_midnight_waits_a_full_day() {
        let next = Cadence::Daily.next_after(&at(2024, 12, 31, 0, 0, 0));
        assert_eq!(next, at(2025, 1, 1, 0, 0, 0));
    }

    #[test]
    fn hourly_fires_at_top_of_hour() {
        assert_eq!(
            Cadence::Hourly.next_after(&at(2024, 3, 9, 23, 59, 59)),
            at(2024, 3, 10, 0, 0, 0)
        );
        assert_eq!(
            Cadence::Hourly.next_after(&at(2024, 3, 9, 7, 0, 0)),
            at(2024, 3, 9, 8, 0, 0)
        );
    }

    #[test]
    fn interval_is_relative() {
        let cadence = Cadence::Every { seconds: 90 };
        assert_eq!(
            cadence.next_after(&at(2024, 3, 9, 7, 0, 0)),
            at(2024, 3, 9, 7, 1, 30)
        );
    }

    #[test]
    fn daily_respects_offset() {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap();
        let next = Cadence::Daily.next_after(&now);
        assert_eq!(next, tz.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn midnight_rollup_is_filed_under_the_ending_day() {
        let (wait, date) = wait_and_date(&Cadence::Daily, at(2024, 3, 9, 23, 0, 0));
        assert_eq!(wait, Duration::from_secs(3600));
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
    }

    #[test]
    fn interval_rollup_is_filed_under_trigger_day() {
        let (_, date) = wait_and_date(&Cadence::Every { seconds: 60 }, at(2024, 3, 9, 12, 0, 0));
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
    }

    #[tokio::test]
    async fn scheduler_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let job = RollupJob::new(
            StoreClient::new(store, &StoreConfig::default()),
            dir.path(),
            ClearMode::Snapshot,
        );
        let shutdown = CancellationToken::new();
        let handle = RollupScheduler::new(job, Cadence::Daily, true).start(shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_scheduler_runs_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .set("cam_CAM1", r#"{"serial":"CAM1","ts":1,"count":1}"#)
            .await;
        let job = RollupJob::new(
            StoreClient::new(store.clone(), &StoreConfig::default()),
            dir.path(),
            ClearMode::Snapshot,
        );
        let shutdown = CancellationToken::new();
        let handle =
            RollupScheduler::new(job, Cadence::Every { seconds: 5 }, true).start(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(store.is_empty().await);
    }
}
