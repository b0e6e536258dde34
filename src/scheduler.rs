//! Fires the daily report at a fixed local time of day.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Days, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{DailyReportConfig, SmtpSettings};
use crate::report::run_report;
use crate::storage::MessageStore;

const STOP_TIMEOUT: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),
}

pub fn parse_schedule_time(value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(value.to_string()))
}

pub fn parse_timezone(value: &str) -> Result<Tz, ScheduleError> {
    value
        .trim()
        .parse()
        .map_err(|_| ScheduleError::InvalidTimezone(value.to_string()))
}

/// The first instant strictly after `now` at which the clock in `tz` reads
/// `time`. A time skipped by a DST jump fires an hour later; a repeated
/// time fires at its first occurrence.
pub fn next_fire(now: DateTime<Utc>, time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();

    (0..3)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|date| local_instant(date, time, tz))
        .find(|instant| *instant > now)
        .unwrap_or_else(|| now + Duration::days(1))
}

fn local_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
    };
    local.map(|dt| dt.with_timezone(&Utc))
}

/// Background task running the daily report
pub struct ReportScheduler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReportScheduler {
    /// Start the scheduler. Returns `None` when reports are disabled.
    pub fn start(
        store: MessageStore,
        settings: DailyReportConfig,
        smtp: SmtpSettings,
    ) -> Result<Option<Self>, ScheduleError> {
        if !settings.enabled {
            info!("Daily report is disabled");
            return Ok(None);
        }

        let time = parse_schedule_time(&settings.schedule_time)?;
        let tz = parse_timezone(&settings.timezone)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_schedule(store, settings, smtp, time, tz, stop_rx));

        info!("Daily report scheduled at {} ({})", time.format("%H:%M"), tz);
        Ok(Some(Self { stop_tx, handle }))
    }

    /// Signal the task and wait briefly for it. A report that is still
    /// running is left to finish on its own.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);

        match tokio::time::timeout(STOP_TIMEOUT, &mut self.handle).await {
            Ok(Ok(())) => info!("Report scheduler stopped"),
            Ok(Err(e)) => error!("Report scheduler task failed: {}", e),
            Err(_) => warn!(
                "Report scheduler did not stop within {}s, leaving it running",
                STOP_TIMEOUT.as_secs()
            ),
        }
    }
}

async fn run_schedule(
    store: MessageStore,
    settings: DailyReportConfig,
    smtp: SmtpSettings,
    time: NaiveTime,
    tz: Tz,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let now = Utc::now();
        let fire_at = next_fire(now, time, tz);
        let wait = (fire_at - now).to_std().unwrap_or_default();
        info!("Next daily report at {}", fire_at.with_timezone(&tz));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        if let Err(e) = run_report(&store, &settings, &smtp, Utc::now()).await {
            error!("Daily report failed: {}", e);
        }
    }
}
