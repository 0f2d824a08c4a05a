//! Lock scheduler.
//!
//! Decides whether lines for a week may be bet on or republished. Betting
//! closes for the weekend: from Thursday 20:20 until Sunday 13:00 league
//! local time. With a season anchor, each week is also closed outside its
//! own window (before the preceding Sunday 13:00 and after its Thursday
//! 20:20 lock).

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use tracing::debug;

use crate::config::ScheduleConfig;
use crate::types::BookError;

const LOCK_HOUR: u32 = 20;
const LOCK_MINUTE: u32 = 20;
const UNLOCK_HOUR: u32 = 13;
/// Sunday opening to Thursday lock.
const DAYS_OPEN_BEFORE_LOCK: u64 = 4;

#[derive(Debug, Clone)]
pub struct LockScheduler {
    offset: FixedOffset,
    season_start: Option<NaiveDate>,
}

impl LockScheduler {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset, season_start: None }
    }

    /// Anchor week numbering at `season_start`, the Thursday of week 1.
    pub fn with_season_start(mut self, season_start: NaiveDate) -> Self {
        self.season_start = Some(season_start);
        self
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, BookError> {
        let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600).ok_or_else(|| {
            BookError::Config(format!("utc_offset_hours out of range: {}", config.utc_offset_hours))
        })?;

        let scheduler = Self::new(offset);
        match config.season_start {
            Some(start) if start.weekday() != Weekday::Thu => Err(BookError::Config(format!(
                "season_start must be a Thursday, got {start} ({})",
                start.weekday()
            ))),
            Some(start) => Ok(scheduler.with_season_start(start)),
            None => Ok(scheduler),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Whether wagers on (and publication of) `week`'s lines are refused at `now`.
    pub fn is_locked(&self, now: DateTime<Utc>, week: u32) -> bool {
        if self.in_weekly_window(now) {
            debug!(week, %now, "Locked: weekend window");
            return true;
        }

        if let (Some(lock_at), Some(opens_at)) = (self.week_lock_at(week), self.week_opens_at(week)) {
            if now >= lock_at || now < opens_at {
                debug!(week, %now, %opens_at, %lock_at, "Locked: outside week window");
                return true;
            }
        }
        false
    }

    /// Thursday >= 20:20, all of Friday and Saturday, Sunday < 13:00.
    pub fn in_weekly_window(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        let time = (local.hour(), local.minute());
        match local.weekday() {
            Weekday::Thu => time >= (LOCK_HOUR, LOCK_MINUTE),
            Weekday::Fri | Weekday::Sat => true,
            Weekday::Sun => local.hour() < UNLOCK_HOUR,
            _ => false,
        }
    }

    /// Thursday 20:20 of `week`. `None` without a season anchor.
    pub fn week_lock_at(&self, week: u32) -> Option<DateTime<Utc>> {
        let date = self.lock_date(week)?;
        self.local_instant(date, LOCK_HOUR, LOCK_MINUTE)
    }

    /// Sunday 13:00 before `week`'s lock. `None` without a season anchor.
    pub fn week_opens_at(&self, week: u32) -> Option<DateTime<Utc>> {
        let date = self.lock_date(week)?.checked_sub_days(Days::new(DAYS_OPEN_BEFORE_LOCK))?;
        self.local_instant(date, UNLOCK_HOUR, 0)
    }

    fn lock_date(&self, week: u32) -> Option<NaiveDate> {
        let weeks_in = u64::from(week.checked_sub(1)?);
        self.season_start?.checked_add_days(Days::new(weeks_in * 7))
    }

    fn local_instant(&self, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(hour, minute, 0)?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
