use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use summarybot_core::domain::subscription::{
    DeliveryLogEntry, DeliveryStatus, NewSubscription, Subscription, SubscriptionId,
};

pub mod memory;
pub mod subscription;

pub use memory::InMemorySubscriptionRepository;
pub use subscription::SqlSubscriptionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// One delivery attempt outcome, before it is stamped and given an id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub subscription_id: SubscriptionId,
    pub status: DeliveryStatus,
    pub message_count: u32,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_active_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Subscription>, RepositoryError>;

    async fn list_active(&self) -> Result<Vec<Subscription>, RepositoryError>;

    async fn insert(
        &self,
        subscription: &NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionId, RepositoryError>;

    /// Overwrites every active row of the owner; returns the number of rows touched.
    async fn update_active_for_user(
        &self,
        subscription: &NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Deactivates one active row of the owner, or all of them when `id` is `None`.
    async fn deactivate(
        &self,
        user_id: &str,
        id: Option<SubscriptionId>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait DeliveryLogRepository: Send + Sync {
    async fn append(
        &self,
        record: DeliveryRecord,
        delivered_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn has_success_between(
        &self,
        subscription_id: SubscriptionId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError>;

    async fn list_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<DeliveryLogEntry>, RepositoryError>;
}

/// Combined storage seam used by the store facade.
pub trait SubscriptionBackend: SubscriptionRepository + DeliveryLogRepository {}

impl<T> SubscriptionBackend for T where T: SubscriptionRepository + DeliveryLogRepository {}

/// Fixed-width UTC rendering; lexical order of stored values equals chronological order.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{format_timestamp, parse_timestamp};

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = Utc.with_ymd_and_hms(2026, 10, 20, 9, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 10, 20, 10, 0, 0).unwrap();

        let earlier_text = format_timestamp(earlier);
        assert_eq!(earlier_text, "2026-10-20T09:00:00.000000Z");
        assert!(earlier_text < format_timestamp(later));
        assert_eq!(parse_timestamp(&earlier_text).expect("parse"), earlier);
    }

    #[test]
    fn malformed_timestamps_are_decode_errors() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
