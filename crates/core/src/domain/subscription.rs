use std::fmt;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub i64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

/// Lifecycle of a subscription row. Deletion moves a row to `Inactive`; rows are never removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    Inactive,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn from_flag(is_active: bool) -> Self {
        if is_active {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Error,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Local time of day at which a subscription fires, always rendered as `HH:MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleTime {
    hour: u32,
    minute: u32,
}

impl ScheduleTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour <= 23 && minute <= 59).then_some(Self { hour, minute })
    }

    /// Accepts `H:MM` and `HH:MM`.
    pub fn parse(value: &str) -> Option<Self> {
        let (hour, minute) = value.trim().split_once(':')?;
        let digits = |part: &str, max_len: usize| {
            !part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(hour, 2) || minute.len() != 2 || !digits(minute, 2) {
            return None;
        }
        Self::new(hour.parse().ok()?, minute.parse().ok()?)
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for ScheduleTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScheduleTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid schedule time `{raw}`")))
    }
}

/// Monday = 0 .. Sunday = 6.
pub fn weekday_index(weekday: Weekday) -> i64 {
    i64::from(weekday.num_days_from_monday())
}

pub fn weekday_from_index(index: i64) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: String,
    pub username: String,
    pub channels: Vec<String>,
    pub schedule_time: ScheduleTime,
    pub frequency: Frequency,
    pub weekday: Option<Weekday>,
    pub timezone: String,
    pub state: SubscriptionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to create (or overwrite) the active subscription of one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSubscription {
    pub user_id: String,
    pub username: String,
    pub channels: Vec<String>,
    pub schedule_time: ScheduleTime,
    pub frequency: Frequency,
    pub weekday: Option<Weekday>,
    pub timezone: String,
}

impl NewSubscription {
    /// Weekday only carries meaning for weekly cadence.
    pub fn normalized(mut self) -> Self {
        if self.frequency == Frequency::Daily {
            self.weekday = None;
        }
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.user_id.trim().is_empty() {
            return Err(DomainError::InvariantViolation("subscription owner is required".to_owned()));
        }
        if self.channels.iter().all(|channel| channel.trim().is_empty()) {
            return Err(DomainError::InvariantViolation(
                "subscription needs at least one channel".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: i64,
    pub subscription_id: SubscriptionId,
    pub delivered_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub message_count: u32,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::{weekday_from_index, weekday_index, Frequency, NewSubscription, ScheduleTime};
    use crate::errors::DomainError;

    #[test]
    fn schedule_time_pads_single_digit_hours() {
        let time = ScheduleTime::parse("9:05").expect("valid time");
        assert_eq!(time.to_string(), "09:05");
    }

    #[test]
    fn schedule_time_rejects_out_of_range_and_malformed_values() {
        for raw in ["24:00", "12:60", "123:00", "9:5", "nine", "9-00", ""] {
            assert_eq!(ScheduleTime::parse(raw), None, "`{raw}` should be rejected");
        }
    }

    #[test]
    fn weekday_indices_start_on_monday() {
        assert_eq!(weekday_index(Weekday::Mon), 0);
        assert_eq!(weekday_index(Weekday::Sun), 6);
        assert_eq!(weekday_from_index(1), Some(Weekday::Tue));
        assert_eq!(weekday_from_index(7), None);
    }

    #[test]
    fn daily_requests_drop_weekday() {
        let request = NewSubscription {
            user_id: "u1".to_owned(),
            username: "alice".to_owned(),
            channels: vec!["general".to_owned()],
            schedule_time: ScheduleTime::new(9, 0).expect("valid"),
            frequency: Frequency::Daily,
            weekday: Some(Weekday::Fri),
            timezone: "UTC".to_owned(),
        }
        .normalized();

        assert_eq!(request.weekday, None);
    }

    #[test]
    fn requests_without_channels_are_rejected() {
        let request = NewSubscription {
            user_id: "u1".to_owned(),
            username: "alice".to_owned(),
            channels: vec![" ".to_owned()],
            schedule_time: ScheduleTime::new(9, 0).expect("valid"),
            frequency: Frequency::Daily,
            weekday: None,
            timezone: "UTC".to_owned(),
        };

        assert!(matches!(request.validate(), Err(DomainError::InvariantViolation(_))));
    }
}
