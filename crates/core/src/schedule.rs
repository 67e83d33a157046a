//! Timezone-aware recurrence math for subscriptions.
//!
//! Everything here is pure: callers pass the current instant and get back either a due verdict
//! (plus the delivery-log range that decides idempotence) or the window of messages to collect.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::domain::subscription::{Frequency, Subscription};

/// Maximum distance between "now" and today's scheduled local time for a subscription to fire.
pub const FIRE_WINDOW_SECS: i64 = 60;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unknown timezone `{0}`")]
    UnknownTimezone(String),
    #[error("local time `{0}` has no matching instant")]
    NonexistentLocalTime(NaiveDateTime),
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.trim().parse::<Tz>().map_err(|_| ScheduleError::UnknownTimezone(name.to_owned()))
}

/// Picks the user's zone when it is a known IANA name, otherwise the fallback.
pub fn resolve_timezone(candidate: Option<&str>, fallback: Tz) -> Tz {
    candidate
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .and_then(|name| parse_timezone(name).ok())
        .unwrap_or(fallback)
}

/// Delivery-log range in which a `success` row means "already fired this period".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryPeriod {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl DeliveryPeriod {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && self.end.map_or(true, |end| instant <= end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DueCheck {
    OutsideWindow,
    WrongWeekday,
    /// Inside the fire window; due unless a success was logged within the period.
    Eligible(DeliveryPeriod),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CollectionWindow {
    pub fn last_day(now: DateTime<Utc>) -> Self {
        Self { start: now - Duration::hours(24), end: now }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

pub fn due_check(subscription: &Subscription, now: DateTime<Utc>) -> Result<DueCheck, ScheduleError> {
    let tz = parse_timezone(&subscription.timezone)?;
    let now_local = now.with_timezone(&tz);
    let today = now_local.date_naive();
    let scheduled = local_to_utc(tz, today.and_time(subscription.schedule_time.as_naive_time()))?;

    let distance = (now - scheduled).num_milliseconds().abs();
    if distance > FIRE_WINDOW_SECS * 1_000 {
        return Ok(DueCheck::OutsideWindow);
    }

    let period = match subscription.frequency {
        Frequency::Daily => {
            let start = local_to_utc(tz, day_start(today))?;
            let end = today
                .and_hms_micro_opt(23, 59, 59, 999_999)
                .ok_or(ScheduleError::NonexistentLocalTime(day_start(today)))?;
            DeliveryPeriod { start, end: Some(local_to_utc(tz, end)?) }
        }
        Frequency::Weekly => {
            if let Some(weekday) = subscription.weekday {
                if today.weekday() != weekday {
                    return Ok(DueCheck::WrongWeekday);
                }
            }
            DeliveryPeriod { start: local_to_utc(tz, week_start(today))?, end: None }
        }
    };

    Ok(DueCheck::Eligible(period))
}

pub fn collection_window(
    subscription: &Subscription,
    now: DateTime<Utc>,
) -> Result<CollectionWindow, ScheduleError> {
    let tz = parse_timezone(&subscription.timezone)?;
    let today = now.with_timezone(&tz).date_naive();
    let at_schedule = |date: NaiveDate| date.and_time(subscription.schedule_time.as_naive_time());

    let start = match (subscription.frequency, subscription.weekday) {
        (Frequency::Daily, _) => local_to_utc(tz, at_schedule(today - Duration::days(1)))?,
        (Frequency::Weekly, Some(weekday)) => {
            let today_index = i64::from(today.weekday().num_days_from_monday());
            let target_index = i64::from(weekday.num_days_from_monday());
            let mut days_back = (today_index - target_index).rem_euclid(7);
            if days_back == 0 {
                days_back = 7;
            }
            local_to_utc(tz, at_schedule(today - Duration::days(days_back)))?
        }
        (Frequency::Weekly, None) => now - Duration::days(7),
    };

    Ok(CollectionWindow { start, end: now })
}

fn day_start(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

fn week_start(date: NaiveDate) -> NaiveDateTime {
    day_start(date - Duration::days(i64::from(date.weekday().num_days_from_monday())))
}

// Local times skipped by a DST jump resolve to the first representable instant after the gap.
fn local_to_utc(tz: Tz, local: NaiveDateTime) -> Result<DateTime<Utc>, ScheduleError> {
    (0..=12)
        .map(|step| local + Duration::minutes(step * 15))
        .find_map(|candidate| tz.from_local_datetime(&candidate).earliest())
        .map(|resolved| resolved.with_timezone(&Utc))
        .ok_or(ScheduleError::NonexistentLocalTime(local))
}
