use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use summarybot_db::SubscriptionStore;

use crate::delivery::{DeliveryOutcome, DeliveryPipeline};

/// Counters for one polling pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub correlation_id: String,
    pub ticked_at: DateTime<Utc>,
    pub due: usize,
    pub delivered: usize,
    pub empty: usize,
    pub failed: usize,
}

impl TickReport {
    fn new(correlation_id: String, ticked_at: DateTime<Utc>) -> Self {
        Self { correlation_id, ticked_at, due: 0, delivered: 0, empty: 0, failed: 0 }
    }

    fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered { .. } => self.delivered += 1,
            DeliveryOutcome::NothingNew => self.empty += 1,
            DeliveryOutcome::ErrorNotified { .. } => self.failed += 1,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SchedulerStatus {
    pub ticks: u64,
    pub last_tick: Option<TickReport>,
}

pub type SharedSchedulerStatus = Arc<RwLock<SchedulerStatus>>;

pub struct SchedulerLoop {
    store: SubscriptionStore,
    pipeline: DeliveryPipeline,
    poll_interval: Duration,
    status: SharedSchedulerStatus,
}

impl SchedulerLoop {
    pub fn new(store: SubscriptionStore, pipeline: DeliveryPipeline, poll_interval: Duration) -> Self {
        Self { store, pipeline, poll_interval, status: SharedSchedulerStatus::default() }
    }

    pub fn status(&self) -> SharedSchedulerStatus {
        Arc::clone(&self.status)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// One polling pass. Due subscriptions are delivered one after another; each failure is
    /// confined to its own subscription.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let correlation_id = Uuid::new_v4().to_string();
        let mut report = TickReport::new(correlation_id.clone(), now);

        let due = self.store.get_due(now).await;
        report.due = due.len();

        for subscription in &due {
            debug!(
                event_name = "scheduler.subscription.due",
                correlation_id = %correlation_id,
                subscription_id = %subscription.id,
                user_id = %subscription.user_id,
                "delivering due subscription"
            );
            let outcome = self.pipeline.deliver(subscription, now, &correlation_id).await;
            report.record(&outcome);
        }

        if report.due > 0 {
            info!(
                event_name = "scheduler.tick.completed",
                correlation_id = %correlation_id,
                due = report.due,
                delivered = report.delivered,
                empty = report.empty,
                failed = report.failed,
                "scheduler tick completed"
            );
        } else {
            debug!(
                event_name = "scheduler.tick.completed",
                correlation_id = %correlation_id,
                "no subscriptions due"
            );
        }

        let mut status = self.status.write().await;
        status.ticks += 1;
        status.last_tick = Some(report.clone());
        report
    }

    /// Polls until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            event_name = "scheduler.start",
            correlation_id = "scheduler",
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(event_name = "scheduler.stop", correlation_id = "scheduler", "scheduler loop stopped");
    }
}
