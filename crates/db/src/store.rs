//! Facade over subscription storage.
//!
//! Storage failures never escape this layer: reads degrade to empty results, writes report
//! `false`, and delivery logging is fire-and-forget. Every failure is logged with an
//! `event_name` so it can be found later.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, warn};

use summarybot_core::domain::subscription::{
    DeliveryLogEntry, DeliveryStatus, NewSubscription, Subscription, SubscriptionId,
};
use summarybot_core::errors::ApplicationError;
use summarybot_core::schedule::{collection_window, due_check, CollectionWindow, DueCheck};

use crate::repositories::{DeliveryRecord, SubscriptionBackend};

#[derive(Clone)]
pub struct SubscriptionStore {
    backend: Arc<dyn SubscriptionBackend>,
    fallback_timezone: Tz,
}

impl SubscriptionStore {
    pub fn new(backend: Arc<dyn SubscriptionBackend>, fallback_timezone: Tz) -> Self {
        Self { backend, fallback_timezone }
    }

    pub fn fallback_timezone(&self) -> Tz {
        self.fallback_timezone
    }

    /// Keeps at most one active subscription per user: existing active rows are overwritten,
    /// otherwise a fresh row is inserted.
    pub async fn create_or_update(&self, request: NewSubscription) -> bool {
        let request = request.normalized();
        if let Err(error) = request.validate() {
            warn!(
                event_name = "store.subscription.rejected",
                user_id = %request.user_id,
                error_class = ApplicationError::from(error.clone()).class(),
                error = %error,
                "subscription request violates domain invariants"
            );
            return false;
        }
        let now = Utc::now();

        let existing = match self.backend.find_active_for_user(&request.user_id).await {
            Ok(rows) => rows,
            Err(error) => {
                error!(
                    event_name = "store.subscription.upsert_failed",
                    user_id = %request.user_id,
                    error = %error,
                    "failed to read active subscriptions"
                );
                return false;
            }
        };

        let result = if existing.is_empty() {
            self.backend.insert(&request, now).await.map(|id| {
                debug!(
                    event_name = "store.subscription.created",
                    user_id = %request.user_id,
                    subscription_id = %id,
                    "subscription created"
                );
            })
        } else {
            self.backend.update_active_for_user(&request, now).await.map(|updated| {
                debug!(
                    event_name = "store.subscription.updated",
                    user_id = %request.user_id,
                    rows = updated,
                    "subscription updated in place"
                );
            })
        };

        match result {
            Ok(()) => true,
            Err(error) => {
                error!(
                    event_name = "store.subscription.upsert_failed",
                    user_id = %request.user_id,
                    error = %error,
                    "failed to write subscription"
                );
                false
            }
        }
    }

    pub async fn get_user_subscriptions(&self, user_id: &str) -> Vec<Subscription> {
        self.backend.find_active_for_user(user_id).await.unwrap_or_else(|error| {
            error!(
                event_name = "store.subscription.read_failed",
                user_id = %user_id,
                error = %error,
                "failed to list user subscriptions"
            );
            Vec::new()
        })
    }

    pub async fn get_all_subscriptions(&self) -> Vec<Subscription> {
        self.backend.list_active().await.unwrap_or_else(|error| {
            error!(
                event_name = "store.subscription.read_failed",
                error = %error,
                "failed to list active subscriptions"
            );
            Vec::new()
        })
    }

    /// Soft-deletes one subscription of the user, or all of them when `id` is `None`.
    pub async fn delete(&self, user_id: &str, id: Option<SubscriptionId>) -> bool {
        match self.backend.deactivate(user_id, id, Utc::now()).await {
            Ok(_) => true,
            Err(error) => {
                error!(
                    event_name = "store.subscription.delete_failed",
                    user_id = %user_id,
                    subscription_id = ?id.map(|id| id.0),
                    error = %error,
                    "failed to deactivate subscription"
                );
                false
            }
        }
    }

    pub async fn get_due(&self, now: DateTime<Utc>) -> Vec<Subscription> {
        let mut due = Vec::new();

        for subscription in self.get_all_subscriptions().await {
            let period = match due_check(&subscription, now) {
                Ok(DueCheck::Eligible(period)) => period,
                Ok(DueCheck::OutsideWindow | DueCheck::WrongWeekday) => continue,
                Err(error) => {
                    warn!(
                        event_name = "store.due_check.failed",
                        subscription_id = %subscription.id,
                        timezone = %subscription.timezone,
                        error = %error,
                        "skipping subscription with unusable schedule"
                    );
                    continue;
                }
            };

            match self.backend.has_success_between(subscription.id, period.start, period.end).await
            {
                Ok(false) => due.push(subscription),
                Ok(true) => {}
                Err(error) => {
                    warn!(
                        event_name = "store.due_check.failed",
                        subscription_id = %subscription.id,
                        error = %error,
                        "delivery log lookup failed; skipping subscription"
                    );
                }
            }
        }

        due
    }

    pub async fn log_delivery(
        &self,
        subscription_id: SubscriptionId,
        status: DeliveryStatus,
        message_count: u32,
        error_message: Option<String>,
    ) {
        self.log_delivery_at(subscription_id, status, message_count, error_message, Utc::now())
            .await;
    }

    pub async fn log_delivery_at(
        &self,
        subscription_id: SubscriptionId,
        status: DeliveryStatus,
        message_count: u32,
        error_message: Option<String>,
        delivered_at: DateTime<Utc>,
    ) {
        let record = DeliveryRecord { subscription_id, status, message_count, error_message };
        if let Err(error) = self.backend.append(record, delivered_at).await {
            error!(
                event_name = "store.delivery_log.append_failed",
                subscription_id = %subscription_id,
                status = status.as_str(),
                error = %error,
                "failed to record delivery outcome"
            );
        }
    }

    pub async fn delivery_history(&self, subscription_id: SubscriptionId) -> Vec<DeliveryLogEntry> {
        self.backend.list_for_subscription(subscription_id).await.unwrap_or_else(|error| {
            error!(
                event_name = "store.delivery_log.read_failed",
                subscription_id = %subscription_id,
                error = %error,
                "failed to read delivery history"
            );
            Vec::new()
        })
    }

    pub fn get_message_collection_period(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> CollectionWindow {
        collection_window(subscription, now).unwrap_or_else(|error| {
            warn!(
                event_name = "store.collection_window.fallback",
                subscription_id = %subscription.id,
                error = %error,
                "falling back to the last 24 hours"
            );
            CollectionWindow::last_day(now)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};

    use summarybot_core::domain::subscription::{
        DeliveryLogEntry, DeliveryStatus, Frequency, NewSubscription, ScheduleTime, Subscription,
        SubscriptionId,
    };

    use super::SubscriptionStore;
    use crate::repositories::{
        DeliveryLogRepository, DeliveryRecord, InMemorySubscriptionRepository, RepositoryError,
        SqlSubscriptionRepository, SubscriptionRepository,
    };
    use crate::{connect_with_settings, migrations};

    fn utc(d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, h, min, s).unwrap()
    }

    fn daily(user_id: &str, time: &str) -> NewSubscription {
        NewSubscription {
            user_id: user_id.to_string(),
            username: format!("{user_id}-name"),
            channels: vec!["general".to_string(), "random".to_string()],
            schedule_time: ScheduleTime::parse(time).expect("valid time"),
            frequency: Frequency::Daily,
            weekday: None,
            timezone: "UTC".to_string(),
        }
    }

    fn memory_store() -> SubscriptionStore {
        SubscriptionStore::new(
            Arc::new(InMemorySubscriptionRepository::default()),
            chrono_tz::Europe::Moscow,
        )
    }

    async fn sqlite_store() -> SubscriptionStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SubscriptionStore::new(Arc::new(SqlSubscriptionRepository::new(pool)), chrono_tz::UTC)
    }

    #[tokio::test]
    async fn upsert_round_trip_keeps_one_active_row() {
        let store = sqlite_store().await;

        assert!(store.create_or_update(daily("u1", "09:00")).await);
        let mut weekly = daily("u1", "18:30");
        weekly.frequency = Frequency::Weekly;
        weekly.weekday = Some(Weekday::Tue);
        weekly.channels = vec!["support".to_string()];
        assert!(store.create_or_update(weekly).await);

        let rows = store.get_user_subscriptions("u1").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].schedule_time.to_string(), "18:30");
        assert_eq!(rows[0].frequency, Frequency::Weekly);
        assert_eq!(rows[0].weekday, Some(Weekday::Tue));
        assert_eq!(rows[0].channels, vec!["support"]);
    }

    #[tokio::test]
    async fn requests_without_channels_are_not_stored() {
        let store = memory_store();
        let mut request = daily("u1", "09:00");
        request.channels.clear();

        assert!(!store.create_or_update(request).await);
        assert!(store.get_user_subscriptions("u1").await.is_empty());
    }

    #[tokio::test]
    async fn daily_weekday_is_dropped_on_save() {
        let store = memory_store();
        let mut request = daily("u1", "09:00");
        request.weekday = Some(Weekday::Mon);

        assert!(store.create_or_update(request).await);
        assert_eq!(store.get_user_subscriptions("u1").await[0].weekday, None);
    }

    #[tokio::test]
    async fn delete_one_and_delete_all() {
        let store = memory_store();
        store.create_or_update(daily("u1", "09:00")).await;
        store.create_or_update(daily("u2", "10:00")).await;
        let u1 = store.get_user_subscriptions("u1").await[0].id;

        assert!(store.delete("u1", Some(u1)).await);
        assert!(store.get_user_subscriptions("u1").await.is_empty());
        assert_eq!(store.get_all_subscriptions().await.len(), 1);

        assert!(store.delete("u2", None).await);
        assert!(store.get_all_subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn daily_subscription_fires_once_per_day() {
        let store = sqlite_store().await;
        store.create_or_update(daily("u1", "09:00")).await;
        let now = utc(20, 9, 0, 30);

        let due = store.get_due(now).await;
        assert_eq!(due.len(), 1);

        store.log_delivery_at(due[0].id, DeliveryStatus::Success, 4, None, now).await;
        assert!(store.get_due(now + Duration::seconds(20)).await.is_empty());

        // The next day is a fresh period.
        assert_eq!(store.get_due(now + Duration::days(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn error_deliveries_do_not_block_a_retry_in_the_window() {
        let store = memory_store();
        store.create_or_update(daily("u1", "09:00")).await;
        let now = utc(20, 9, 0, 0);
        let id = store.get_due(now).await[0].id;

        store
            .log_delivery_at(id, DeliveryStatus::Error, 0, Some("boom".to_string()), now)
            .await;

        assert_eq!(store.get_due(now + Duration::seconds(30)).await.len(), 1);
        assert_eq!(store.delivery_history(id).await.len(), 1);
    }

    #[tokio::test]
    async fn weekday_mismatch_is_never_due() {
        let store = memory_store();
        let mut request = daily("u1", "18:00");
        request.frequency = Frequency::Weekly;
        request.weekday = Some(Weekday::Wed);
        store.create_or_update(request).await;

        // Monday 2026-10-19 through Sunday 2026-10-25, Wednesday excluded.
        for day in [19, 20, 22, 23, 24, 25] {
            assert!(store.get_due(utc(day, 18, 0, 0)).await.is_empty(), "day {day}");
        }
        assert_eq!(store.get_due(utc(21, 18, 0, 0)).await.len(), 1);
    }

    #[tokio::test]
    async fn weekly_success_blocks_until_next_monday() {
        let store = memory_store();
        let mut request = daily("u1", "12:00");
        request.frequency = Frequency::Weekly;
        store.create_or_update(request).await;

        let tuesday = utc(20, 12, 0, 0);
        let id = store.get_due(tuesday).await[0].id;
        store.log_delivery_at(id, DeliveryStatus::Success, 1, None, tuesday).await;

        assert!(store.get_due(utc(23, 12, 0, 0)).await.is_empty());
        assert_eq!(store.get_due(utc(26, 12, 0, 0)).await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_timezone_excludes_only_that_subscription() {
        let store = memory_store();
        let mut broken = daily("u1", "09:00");
        broken.timezone = "Nowhere/Special".to_string();
        store.create_or_update(broken).await;
        store.create_or_update(daily("u2", "09:00")).await;

        let due = store.get_due(utc(20, 9, 0, 0)).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, "u2");
    }

    #[tokio::test]
    async fn collection_period_falls_back_to_last_day() {
        let store = memory_store();
        let mut broken = daily("u1", "09:00");
        broken.timezone = "Nowhere/Special".to_string();
        store.create_or_update(broken).await;
        let subscription = store.get_user_subscriptions("u1").await.remove(0);
        let now = utc(20, 9, 0, 30);

        let window = store.get_message_collection_period(&subscription, now);

        assert_eq!(window.start, now - Duration::hours(24));
        assert_eq!(window.end, now);
    }

    struct FailingRepository;

    fn unavailable() -> RepositoryError {
        RepositoryError::Database(sqlx::Error::PoolTimedOut)
    }

    #[async_trait]
    impl SubscriptionRepository for FailingRepository {
        async fn find_active_for_user(&self, _: &str) -> Result<Vec<Subscription>, RepositoryError> {
            Err(unavailable())
        }

        async fn list_active(&self) -> Result<Vec<Subscription>, RepositoryError> {
            Err(unavailable())
        }

        async fn insert(
            &self,
            _: &NewSubscription,
            _: DateTime<Utc>,
        ) -> Result<SubscriptionId, RepositoryError> {
            Err(unavailable())
        }

        async fn update_active_for_user(
            &self,
            _: &NewSubscription,
            _: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            Err(unavailable())
        }

        async fn deactivate(
            &self,
            _: &str,
            _: Option<SubscriptionId>,
            _: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            Err(unavailable())
        }
    }

    #[async_trait]
    impl DeliveryLogRepository for FailingRepository {
        async fn append(&self, _: DeliveryRecord, _: DateTime<Utc>) -> Result<(), RepositoryError> {
            Err(unavailable())
        }

        async fn has_success_between(
            &self,
            _: SubscriptionId,
            _: DateTime<Utc>,
            _: Option<DateTime<Utc>>,
        ) -> Result<bool, RepositoryError> {
            Err(unavailable())
        }

        async fn list_for_subscription(
            &self,
            _: SubscriptionId,
        ) -> Result<Vec<DeliveryLogEntry>, RepositoryError> {
            Err(unavailable())
        }
    }

    #[tokio::test]
    async fn storage_failures_degrade_to_false_and_empty() {
        let store = SubscriptionStore::new(Arc::new(FailingRepository), chrono_tz::UTC);

        assert!(!store.create_or_update(daily("u1", "09:00")).await);
        assert!(!store.delete("u1", None).await);
        assert!(store.get_user_subscriptions("u1").await.is_empty());
        assert!(store.get_due(utc(20, 9, 0, 0)).await.is_empty());
        assert!(store.delivery_history(SubscriptionId(1)).await.is_empty());
        store.log_delivery(SubscriptionId(1), DeliveryStatus::Success, 0, None).await;
    }
}
