//! Background notification scheduler.
//!
//! One long-lived loop ticks on a fixed cadence and compares wall-clock time
//! against the configured daily-reminder and weekly-report triggers. A trigger
//! fires at most once per calendar period: the period identifier of the last
//! dispatch (ISO date for daily, ISO week for weekly) is persisted through the
//! store, so restarts neither duplicate nor drop a dispatch, and a boundary
//! missed while the process was down fires once on the next qualifying tick.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::Serialize;
use srs_core::LearnerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::storage::{ReviewStore, StoreResult, TriggerKind};

/// Attempts to persist a dispatch marker before giving up on the period.
const MARKER_RETRY_ATTEMPTS: u32 = 5;

/// Base delay between marker retries, doubled per attempt.
const MARKER_RETRY_BASE: std::time::Duration = std::time::Duration::from_millis(200);

/// One logically-due notification, handed to the delivery layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationIntent {
    pub learner_id: LearnerId,
    pub kind: TriggerKind,
    pub generated_at: chrono::DateTime<Utc>,
}

/// Trigger times lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct Triggers {
    pub daily_time: NaiveTime,
    pub weekly_day: Weekday,
    pub weekly_time: NaiveTime,
}

impl Triggers {
    pub fn from_config(config: &Config) -> Self {
        Self {
            daily_time: config.daily_reminder_time(),
            weekly_day: config.weekly_report_day(),
            weekly_time: config.weekly_report_time(),
        }
    }
}

/// Period identifier for the daily trigger: the ISO calendar date.
fn daily_period(now: NaiveDateTime) -> String {
    now.date().format("%Y-%m-%d").to_string()
}

/// Period identifier for the weekly trigger: the ISO week.
fn weekly_period(now: NaiveDateTime) -> String {
    let week = now.date().iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// The weekly trigger instant inside the week containing `now`.
fn weekly_boundary(now: NaiveDateTime, day: Weekday, time: NaiveTime) -> NaiveDateTime {
    let monday = now.date() - Duration::days(i64::from(now.weekday().num_days_from_monday()));
    let trigger_date = monday + Duration::days(i64::from(day.num_days_from_monday()));
    trigger_date.and_time(time)
}

/// Decide whether the daily trigger fires at `now`, given the last dispatched
/// period. Returns the new period identifier when it does.
fn daily_due(now: NaiveDateTime, trigger: NaiveTime, last: Option<&str>) -> Option<String> {
    if now.time() < trigger {
        return None;
    }
    let period = daily_period(now);
    (last != Some(period.as_str())).then_some(period)
}

/// Same decision for the weekly trigger. Fires any time after this week's
/// boundary, so a restart later in the week still delivers the report once.
fn weekly_due(
    now: NaiveDateTime,
    day: Weekday,
    time: NaiveTime,
    last: Option<&str>,
) -> Option<String> {
    if now < weekly_boundary(now, day, time) {
        return None;
    }
    let period = weekly_period(now);
    (last != Some(period.as_str())).then_some(period)
}

pub struct NotificationScheduler {
    store: Arc<dyn ReviewStore>,
    triggers: Triggers,
    tick: std::time::Duration,
    outbox: mpsc::Sender<NotificationIntent>,
}

impl NotificationScheduler {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        config: &Config,
        outbox: mpsc::Sender<NotificationIntent>,
    ) -> Self {
        Self {
            store,
            triggers: Triggers::from_config(config),
            tick: std::time::Duration::from_secs(config.scheduler.tick_seconds),
            outbox,
        }
    }

    /// Run the tick loop until the token is cancelled. Store failures are
    /// logged and retried on later ticks; only a closed outbox ends the loop
    /// early.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            daily = %self.triggers.daily_time,
            weekly_day = ?self.triggers.weekly_day,
            weekly = %self.triggers.weekly_time,
            tick_secs = self.tick.as_secs(),
            "notification scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("notification scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let local_now = chrono::Local::now().naive_local();
                    match self.tick_once(local_now, Utc::now()).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!("notification outbox closed, stopping scheduler");
                            break;
                        }
                        Err(e) => warn!("scheduler tick failed, will retry: {e}"),
                    }
                }
            }
        }
    }

    /// Evaluate both triggers at the given instant. Returns `Ok(false)` when
    /// the outbox receiver is gone.
    pub async fn tick_once(
        &self,
        local_now: NaiveDateTime,
        as_of: chrono::DateTime<Utc>,
    ) -> StoreResult<bool> {
        let last_daily = self.store.get_dispatch_marker(TriggerKind::DueReminder).await?;
        if let Some(period) = daily_due(local_now, self.triggers.daily_time, last_daily.as_deref())
        {
            let learners = self.store.list_learners_with_due(as_of).await?;
            if !self
                .dispatch(TriggerKind::DueReminder, &period, &learners, as_of)
                .await?
            {
                return Ok(false);
            }
        }

        let last_weekly = self.store.get_dispatch_marker(TriggerKind::WeeklyReport).await?;
        if let Some(period) = weekly_due(
            local_now,
            self.triggers.weekly_day,
            self.triggers.weekly_time,
            last_weekly.as_deref(),
        ) {
            let learners = self.store.list_learners().await?;
            if !self
                .dispatch(TriggerKind::WeeklyReport, &period, &learners, as_of)
                .await?
            {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Emit one intent per learner, then persist the marker. The marker write
    /// is retried with backoff before the period counts as done; a period
    /// that never gets marked refires on a later tick, trading a possible
    /// duplicate for never losing a notification.
    async fn dispatch(
        &self,
        kind: TriggerKind,
        period: &str,
        learners: &[LearnerId],
        generated_at: chrono::DateTime<Utc>,
    ) -> StoreResult<bool> {
        debug!(%kind, period, learners = learners.len(), "dispatching");
        for &learner_id in learners {
            let intent = NotificationIntent {
                learner_id,
                kind,
                generated_at,
            };
            if self.outbox.send(intent).await.is_err() {
                return Ok(false);
            }
        }

        let mut delay = MARKER_RETRY_BASE;
        for attempt in 1..=MARKER_RETRY_ATTEMPTS {
            match self.store.set_dispatch_marker(kind, period).await {
                Ok(()) => {
                    info!(%kind, period, learners = learners.len(), "dispatch complete");
                    return Ok(true);
                }
                Err(e) if attempt < MARKER_RETRY_ATTEMPTS => {
                    warn!(%kind, period, attempt, "marker write failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("marker retry loop always returns");
    }
}
