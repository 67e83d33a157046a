use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use summarybot_core::domain::subscription::{
    DeliveryLogEntry, DeliveryStatus, NewSubscription, Subscription, SubscriptionId,
    SubscriptionState,
};

use super::{DeliveryLogRepository, DeliveryRecord, RepositoryError, SubscriptionRepository};

#[derive(Default)]
struct MemoryState {
    next_subscription_id: i64,
    subscriptions: BTreeMap<i64, Subscription>,
    deliveries: Vec<DeliveryLogEntry>,
}

/// Process-local backend with the same semantics as the SQLite one.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    state: RwLock<MemoryState>,
}

#[async_trait::async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn find_active_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|row| row.user_id == user_id && row.state.is_active())
            .cloned()
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<Subscription>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.subscriptions.values().filter(|row| row.state.is_active()).cloned().collect())
    }

    async fn insert(
        &self,
        subscription: &NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionId, RepositoryError> {
        let mut state = self.state.write().await;
        state.next_subscription_id += 1;
        let id = SubscriptionId(state.next_subscription_id);
        state.subscriptions.insert(
            id.0,
            Subscription {
                id,
                user_id: subscription.user_id.clone(),
                username: subscription.username.clone(),
                channels: subscription.channels.clone(),
                schedule_time: subscription.schedule_time,
                frequency: subscription.frequency,
                weekday: subscription.weekday,
                timezone: subscription.timezone.clone(),
                state: SubscriptionState::Active,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn update_active_for_user(
        &self,
        subscription: &NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for row in state.subscriptions.values_mut() {
            if row.user_id == subscription.user_id && row.state.is_active() {
                row.username = subscription.username.clone();
                row.channels = subscription.channels.clone();
                row.schedule_time = subscription.schedule_time;
                row.frequency = subscription.frequency;
                row.weekday = subscription.weekday;
                row.timezone = subscription.timezone.clone();
                row.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn deactivate(
        &self,
        user_id: &str,
        id: Option<SubscriptionId>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for row in state.subscriptions.values_mut() {
            let selected = id.map_or(true, |id| row.id == id);
            if selected && row.user_id == user_id && row.state.is_active() {
                row.state = SubscriptionState::Inactive;
                row.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait::async_trait]
impl DeliveryLogRepository for InMemorySubscriptionRepository {
    async fn append(
        &self,
        record: DeliveryRecord,
        delivered_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let id = i64::try_from(state.deliveries.len()).unwrap_or(i64::MAX).saturating_add(1);
        state.deliveries.push(DeliveryLogEntry {
            id,
            subscription_id: record.subscription_id,
            delivered_at,
            status: record.status,
            message_count: record.message_count,
            error_message: record.error_message,
        });
        Ok(())
    }

    async fn has_success_between(
        &self,
        subscription_id: SubscriptionId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.deliveries.iter().any(|entry| {
            entry.subscription_id == subscription_id
                && entry.status == DeliveryStatus::Success
                && entry.delivered_at >= start
                && end.map_or(true, |end| entry.delivered_at <= end)
        }))
    }

    async fn list_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<DeliveryLogEntry>, RepositoryError> {
        let state = self.state.read().await;
        let mut entries: Vec<DeliveryLogEntry> = state
            .deliveries
            .iter()
            .filter(|entry| entry.subscription_id == subscription_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.delivered_at, entry.id));
        Ok(entries)
    }
}
