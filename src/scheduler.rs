//! Cron-driven report scheduling.
//!
//! A poll loop checks the three cadence entries once a minute in the business
//! timezone. Sleep/wake gaps show up as time jumps between polls; jobs missed
//! inside a grace window run late with a `Missed` trigger. The scheduler only
//! decides *when*; execution happens wherever the messages are received, with
//! the period resolved at the scheduled instant so a late run still covers
//! the intended window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::mpsc;

use crate::config::{ScheduleEntry, Schedules};
use crate::error::PipelineError;
use crate::period::PeriodKey;
use crate::state::{AppState, RunTrigger};
use crate::subscribers::Cadence;

/// Grace period for missed daily jobs (2 hours).
const MISSED_JOB_GRACE_PERIOD_SECS: i64 = 7_200;

/// Weekly and monthly jobs get a day of grace; missing the Monday morning
/// slot must not silently skip a whole week's report.
const MISSED_LONG_CADENCE_GRACE_SECS: i64 = 86_400;

/// Time jump threshold to detect sleep/wake (5 minutes).
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for the scheduler loop (1 minute).
const POLL_INTERVAL_SECS: u64 = 60;

/// Message sent when a cadence report is due.
#[derive(Debug, Clone)]
pub struct SchedulerMessage {
    pub cadence: Cadence,
    pub trigger: RunTrigger,
    /// The instant the job was due. Periods resolve against this, not the
    /// moment the message is handled.
    pub scheduled_for: DateTime<Utc>,
}

/// The window each cadence reports on. Daily covers the scheduled day in
/// full; weekly and monthly cover the last completed week/month.
pub fn period_key(cadence: Cadence) -> PeriodKey {
    match cadence {
        Cadence::Daily => PeriodKey::Today,
        Cadence::Weekly => PeriodKey::LastWeek,
        Cadence::Monthly => PeriodKey::LastMonth,
    }
}

pub struct Scheduler {
    state: Arc<AppState>,
    sender: mpsc::Sender<SchedulerMessage>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self { state, sender }
    }

    /// Run indefinitely, checking for due jobs every minute.
    pub async fn run(&self) {
        let mut last_check = Utc::now();

        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
            let now = Utc::now();

            let time_jump = (now - last_check).num_seconds();
            if time_jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "time jumped {} seconds (system wake?), checking for missed jobs",
                    time_jump
                );
                self.check_missed_jobs(now).await;
            }

            self.check_due_jobs(now).await;
            last_check = now;
        }
    }

    async fn check_due_jobs(&self, now: DateTime<Utc>) {
        let tz = self.state.config.tz();
        for cadence in [Cadence::Daily, Cadence::Weekly, Cadence::Monthly] {
            let entry = entry_for(&self.state.config.schedules, cadence);
            if !entry.enabled {
                continue;
            }
            match due_now(entry, tz, self.state.get_last_scheduled_run(cadence), now) {
                Ok(Some(scheduled_for)) => {
                    self.state.set_last_scheduled_run(cadence, scheduled_for);
                    self.send(cadence, RunTrigger::Scheduled, scheduled_for).await;
                }
                Ok(None) => {}
                Err(e) => log::error!("{} schedule is invalid: {}", cadence, e),
            }
        }
    }

    async fn check_missed_jobs(&self, now: DateTime<Utc>) {
        let tz = self.state.config.tz();
        for cadence in [Cadence::Daily, Cadence::Weekly, Cadence::Monthly] {
            let entry = entry_for(&self.state.config.schedules, cadence);
            if !entry.enabled {
                continue;
            }
            match find_missed_job(
                entry,
                cadence,
                tz,
                self.state.get_last_scheduled_run(cadence),
                now,
            ) {
                Ok(Some(scheduled_for)) => {
                    log::info!(
                        "found missed {} job scheduled for {}, running now",
                        cadence,
                        scheduled_for
                    );
                    self.state.set_last_scheduled_run(cadence, scheduled_for);
                    self.send(cadence, RunTrigger::Missed, scheduled_for).await;
                }
                Ok(None) => {}
                Err(e) => log::error!("{} schedule is invalid: {}", cadence, e),
            }
        }
    }

    async fn send(&self, cadence: Cadence, trigger: RunTrigger, scheduled_for: DateTime<Utc>) {
        let message = SchedulerMessage {
            cadence,
            trigger,
            scheduled_for,
        };
        if self.sender.send(message).await.is_err() {
            log::error!("scheduler channel closed, dropping {} run", cadence);
        }
    }
}

fn entry_for(schedules: &Schedules, cadence: Cadence) -> &ScheduleEntry {
    match cadence {
        Cadence::Daily => &schedules.daily,
        Cadence::Weekly => &schedules.weekly,
        Cadence::Monthly => &schedules.monthly,
    }
}

/// Parse a 5-field cron expression (the `cron` crate wants 6 fields, seconds
/// first).
pub fn parse_cron(expr: &str) -> Result<Schedule, PipelineError> {
    format!("0 {}", expr).parse::<Schedule>().map_err(|e| {
        PipelineError::Configuration(format!("invalid cron expression '{}': {}", expr, e))
    })
}

/// The schedule tick matching `now`, if any. A tick counts as "now" inside a
/// two-minute window so a poll landing at :00:59 still fires, and a tick that
/// already ran (per `last_run`) never fires twice.
pub fn due_now(
    entry: &ScheduleEntry,
    tz: Tz,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, PipelineError> {
    let schedule = parse_cron(&entry.cron)?;
    let now_local = now.with_timezone(&tz);

    let mut upcoming = schedule.after(&(now_local - chrono::Duration::minutes(2)));
    if let Some(next) = upcoming.next() {
        let next_utc = next.with_timezone(&Utc);
        if (now - next_utc).num_seconds().abs() < 120 {
            if let Some(last) = last_run {
                if (last - next_utc).num_seconds().abs() < 60 {
                    return Ok(None);
                }
            }
            return Ok(Some(next_utc));
        }
    }
    Ok(None)
}

/// The oldest tick missed inside the cadence's grace window, skipping any the
/// last run already covered.
pub fn find_missed_job(
    entry: &ScheduleEntry,
    cadence: Cadence,
    tz: Tz,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, PipelineError> {
    let schedule = parse_cron(&entry.cron)?;
    let grace_secs = match cadence {
        Cadence::Daily => MISSED_JOB_GRACE_PERIOD_SECS,
        Cadence::Weekly | Cadence::Monthly => MISSED_LONG_CADENCE_GRACE_SECS,
    };
    let grace_start = now.with_timezone(&tz) - chrono::Duration::seconds(grace_secs);

    for scheduled in schedule.after(&grace_start) {
        let scheduled_utc = scheduled.with_timezone(&Utc);
        if scheduled_utc > now {
            break;
        }
        if let Some(last) = last_run {
            if last >= scheduled_utc {
                continue;
            }
        }
        return Ok(Some(scheduled_utc));
    }
    Ok(None)
}

/// The next upcoming tick, for startup logging.
pub fn next_run_time(entry: &ScheduleEntry, tz: Tz) -> Result<DateTime<Utc>, PipelineError> {
    let schedule = parse_cron(&entry.cron)?;
    schedule
        .upcoming(tz)
        .next()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| PipelineError::Configuration("no upcoming scheduled time".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    const TASHKENT: Tz = chrono_tz::Asia::Tashkent;

    fn entry(cron: &str) -> ScheduleEntry {
        ScheduleEntry {
            enabled: true,
            cron: cron.to_string(),
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        TASHKENT
            .with_ymd_and_hms(y, m, d, h, min, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parse_cron_accepts_five_fields() {
        assert!(parse_cron("0 20 * * *").is_ok());
        assert!(parse_cron("0 9 * * 1").is_ok());
        assert!(parse_cron("0 9 1 * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn due_at_the_scheduled_minute() {
        let daily = entry("0 20 * * *");
        let now = at(2025, 3, 14, 20, 0, 30);
        let due = due_now(&daily, TASHKENT, None, now).unwrap();
        assert_eq!(due, Some(at(2025, 3, 14, 20, 0, 0)));
    }

    #[test]
    fn not_due_between_ticks() {
        let daily = entry("0 20 * * *");
        let now = at(2025, 3, 14, 20, 10, 0);
        assert_eq!(due_now(&daily, TASHKENT, None, now).unwrap(), None);
    }

    #[test]
    fn a_tick_never_fires_twice() {
        let daily = entry("0 20 * * *");
        let tick = at(2025, 3, 14, 20, 0, 0);
        let now = at(2025, 3, 14, 20, 1, 0);
        assert_eq!(due_now(&daily, TASHKENT, Some(tick), now).unwrap(), None);
    }

    #[test]
    fn missed_daily_job_found_inside_grace() {
        let daily = entry("0 20 * * *");
        let now = at(2025, 3, 14, 21, 30, 0);
        let missed = find_missed_job(&daily, Cadence::Daily, TASHKENT, None, now).unwrap();
        assert_eq!(missed, Some(at(2025, 3, 14, 20, 0, 0)));
    }

    #[test]
    fn missed_daily_job_expires_after_grace() {
        let daily = entry("0 20 * * *");
        let now = at(2025, 3, 14, 23, 30, 0);
        let missed = find_missed_job(&daily, Cadence::Daily, TASHKENT, None, now).unwrap();
        assert_eq!(missed, None);
    }

    #[test]
    fn already_run_tick_is_not_missed() {
        let daily = entry("0 20 * * *");
        let tick = at(2025, 3, 14, 20, 0, 0);
        let now = at(2025, 3, 14, 21, 0, 0);
        let missed = find_missed_job(&daily, Cadence::Daily, TASHKENT, Some(tick), now).unwrap();
        assert_eq!(missed, None);
    }

    #[test]
    fn weekly_grace_covers_a_full_day() {
        // 2025-03-10 is a Monday; 09:00 slot missed, discovered at 20:00.
        let weekly = entry("0 9 * * 1");
        let now = at(2025, 3, 10, 20, 0, 0);
        let missed = find_missed_job(&weekly, Cadence::Weekly, TASHKENT, None, now).unwrap();
        assert_eq!(missed, Some(at(2025, 3, 10, 9, 0, 0)));
    }

    #[test]
    fn cadences_map_to_their_report_windows() {
        assert_eq!(period_key(Cadence::Daily), PeriodKey::Today);
        assert_eq!(period_key(Cadence::Weekly), PeriodKey::LastWeek);
        assert_eq!(period_key(Cadence::Monthly), PeriodKey::LastMonth);
    }

    #[test]
    fn next_run_time_is_in_the_future() {
        let daily = entry("0 20 * * *");
        let next = next_run_time(&daily, TASHKENT).unwrap();
        assert!(next > Utc::now());
    }
}
