use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use summarybot_core::domain::subscription::{
    weekday_from_index, weekday_index, DeliveryLogEntry, DeliveryStatus, Frequency,
    NewSubscription, ScheduleTime, Subscription, SubscriptionId, SubscriptionState,
};

use super::{
    format_timestamp, parse_timestamp, DeliveryLogRepository, DeliveryRecord, RepositoryError,
    SubscriptionRepository,
};
use crate::DbPool;

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, username, channels, schedule_time, frequency,
    weekday, timezone, is_active, created_at, updated_at";

/// SQLite-backed storage for both the subscription table and the delivery log.
pub struct SqlSubscriptionRepository {
    pool: DbPool,
}

impl SqlSubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn encode_channels(channels: &[String]) -> Result<String, RepositoryError> {
    serde_json::to_string(channels).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_subscription(row: &SqliteRow) -> Result<Subscription, RepositoryError> {
    let channels_json: String = decode(row, "channels")?;
    let channels: Vec<String> = serde_json::from_str(&channels_json)
        .map_err(|e| RepositoryError::Decode(format!("channels column: {e}")))?;

    let schedule_raw: String = decode(row, "schedule_time")?;
    let schedule_time = ScheduleTime::parse(&schedule_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid schedule time `{schedule_raw}`")))?;

    let frequency_raw: String = decode(row, "frequency")?;
    let frequency = Frequency::parse(&frequency_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid frequency `{frequency_raw}`")))?;

    let weekday = match decode::<Option<i64>>(row, "weekday")? {
        Some(index) => Some(
            weekday_from_index(index)
                .ok_or_else(|| RepositoryError::Decode(format!("invalid weekday `{index}`")))?,
        ),
        None => None,
    };

    let is_active: bool = decode(row, "is_active")?;
    let created_at: String = decode(row, "created_at")?;
    let updated_at: String = decode(row, "updated_at")?;

    Ok(Subscription {
        id: SubscriptionId(decode(row, "id")?),
        user_id: decode(row, "user_id")?,
        username: decode(row, "username")?,
        channels,
        schedule_time,
        frequency,
        weekday,
        timezone: decode(row, "timezone")?,
        state: SubscriptionState::from_flag(is_active),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_delivery(row: &SqliteRow) -> Result<DeliveryLogEntry, RepositoryError> {
    let status_raw: String = decode(row, "status")?;
    let status = DeliveryStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid delivery status `{status_raw}`")))?;
    let message_count: i64 = decode(row, "message_count")?;
    let delivered_at: String = decode(row, "delivered_at")?;

    Ok(DeliveryLogEntry {
        id: decode(row, "id")?,
        subscription_id: SubscriptionId(decode(row, "subscription_id")?),
        delivered_at: parse_timestamp(&delivered_at)?,
        status,
        message_count: u32::try_from(message_count)
            .map_err(|_| RepositoryError::Decode(format!("invalid message count `{message_count}`")))?,
        error_message: decode(row, "error_message")?,
    })
}

#[async_trait::async_trait]
impl SubscriptionRepository for SqlSubscriptionRepository {
    async fn find_active_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE user_id = ? AND is_active = 1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_subscription).collect()
    }

    async fn list_active(&self) -> Result<Vec<Subscription>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE is_active = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_subscription).collect()
    }

    async fn insert(
        &self,
        subscription: &NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionId, RepositoryError> {
        let stamp = format_timestamp(now);
        let result = sqlx::query(
            "INSERT INTO subscriptions (user_id, username, channels, schedule_time, frequency,
                                        weekday, timezone, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&subscription.user_id)
        .bind(&subscription.username)
        .bind(encode_channels(&subscription.channels)?)
        .bind(subscription.schedule_time.to_string())
        .bind(subscription.frequency.as_str())
        .bind(subscription.weekday.map(weekday_index))
        .bind(&subscription.timezone)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        Ok(SubscriptionId(result.last_insert_rowid()))
    }

    async fn update_active_for_user(
        &self,
        subscription: &NewSubscription,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE subscriptions
             SET username = ?, channels = ?, schedule_time = ?, frequency = ?, weekday = ?,
                 timezone = ?, updated_at = ?
             WHERE user_id = ? AND is_active = 1",
        )
        .bind(&subscription.username)
        .bind(encode_channels(&subscription.channels)?)
        .bind(subscription.schedule_time.to_string())
        .bind(subscription.frequency.as_str())
        .bind(subscription.weekday.map(weekday_index))
        .bind(&subscription.timezone)
        .bind(format_timestamp(now))
        .bind(&subscription.user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn deactivate(
        &self,
        user_id: &str,
        id: Option<SubscriptionId>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = if let Some(id) = id {
            sqlx::query(
                "UPDATE subscriptions SET is_active = 0, updated_at = ?
                 WHERE id = ? AND user_id = ? AND is_active = 1",
            )
            .bind(format_timestamp(now))
            .bind(id.0)
            .bind(user_id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE subscriptions SET is_active = 0, updated_at = ?
                 WHERE user_id = ? AND is_active = 1",
            )
            .bind(format_timestamp(now))
            .bind(user_id)
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl DeliveryLogRepository for SqlSubscriptionRepository {
    async fn append(
        &self,
        record: DeliveryRecord,
        delivered_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO delivery_log (subscription_id, delivered_at, status, message_count,
                                       error_message)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.subscription_id.0)
        .bind(format_timestamp(delivered_at))
        .bind(record.status.as_str())
        .bind(i64::from(record.message_count))
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn has_success_between(
        &self,
        subscription_id: SubscriptionId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let row = if let Some(end) = end {
            sqlx::query(
                "SELECT COUNT(*) AS count FROM delivery_log
                 WHERE subscription_id = ? AND status = 'success'
                   AND delivered_at >= ? AND delivered_at <= ?",
            )
            .bind(subscription_id.0)
            .bind(format_timestamp(start))
            .bind(format_timestamp(end))
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT COUNT(*) AS count FROM delivery_log
                 WHERE subscription_id = ? AND status = 'success' AND delivered_at >= ?",
            )
            .bind(subscription_id.0)
            .bind(format_timestamp(start))
            .fetch_one(&self.pool)
            .await?
        };

        let count: i64 = decode(&row, "count")?;
        Ok(count > 0)
    }

    async fn list_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<DeliveryLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, subscription_id, delivered_at, status, message_count, error_message
             FROM delivery_log WHERE subscription_id = ? ORDER BY delivered_at, id",
        )
        .bind(subscription_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_delivery).collect()
    }
}
