use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use summarybot_agent::{LlmError, Summarizer, SummarizerError};
use summarybot_core::domain::message::{ChannelDigest, ChannelInfo, ChannelMessage};
use summarybot_core::domain::subscription::{DeliveryStatus, Subscription};
use summarybot_db::SubscriptionStore;
use summarybot_mattermost::client::{ChatApiError, ChatTransport};
use summarybot_mattermost::messages;

/// Terminal state of one delivery run. Each variant maps to one delivery-log row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { message_count: u32 },
    NothingNew,
    ErrorNotified { message_count: u32, reason: String },
}

impl DeliveryOutcome {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            Self::Delivered { .. } | Self::NothingNew => DeliveryStatus::Success,
            Self::ErrorNotified { .. } => DeliveryStatus::Error,
        }
    }

    pub fn message_count(&self) -> u32 {
        match self {
            Self::Delivered { message_count } | Self::ErrorNotified { message_count, .. } => {
                *message_count
            }
            Self::NothingNew => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "success_delivered",
            Self::NothingNew => "success_empty",
            Self::ErrorNotified { .. } => "error_notified",
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Нет доступа к каналам: {}", .channels.join(", "))]
    UnreachableChannels { channels: Vec<String> },
    #[error("failed to collect messages from `{channel}`: {source}")]
    Collect { channel: String, source: ChatApiError },
    #[error("summary generation failed: {source}")]
    Summarize { message_count: u32, source: SummarizerError },
    #[error("failed to send summary: {source}")]
    Send { message_count: u32, source: ChatApiError },
}

impl DeliveryError {
    pub fn message_count(&self) -> u32 {
        match self {
            Self::UnreachableChannels { .. } | Self::Collect { .. } => 0,
            Self::Summarize { message_count, .. } | Self::Send { message_count, .. } => {
                *message_count
            }
        }
    }
}

/// Runs one due subscription from channel resolution to the user's DM.
#[derive(Clone)]
pub struct DeliveryPipeline {
    store: SubscriptionStore,
    transport: Arc<dyn ChatTransport>,
    summarizer: Arc<dyn Summarizer>,
    bot_username: String,
}

impl DeliveryPipeline {
    pub fn new(
        store: SubscriptionStore,
        transport: Arc<dyn ChatTransport>,
        summarizer: Arc<dyn Summarizer>,
        bot_username: impl Into<String>,
    ) -> Self {
        Self { store, transport, summarizer, bot_username: bot_username.into() }
    }

    /// Delivers `subscription` for the tick at `now` and records the outcome in the delivery log.
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> DeliveryOutcome {
        let outcome = match self.run(subscription, now, correlation_id).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "delivery.failed",
                    correlation_id = %correlation_id,
                    subscription_id = %subscription.id,
                    user_id = %subscription.user_id,
                    error = %error,
                    "subscription delivery ended with an error"
                );
                DeliveryOutcome::ErrorNotified {
                    message_count: error.message_count(),
                    reason: error.to_string(),
                }
            }
        };

        let error_message = match &outcome {
            DeliveryOutcome::ErrorNotified { reason, .. } => Some(reason.clone()),
            _ => None,
        };
        self.store
            .log_delivery_at(
                subscription.id,
                outcome.status(),
                outcome.message_count(),
                error_message,
                now,
            )
            .await;

        info!(
            event_name = "delivery.outcome",
            correlation_id = %correlation_id,
            subscription_id = %subscription.id,
            outcome = outcome.as_str(),
            message_count = outcome.message_count(),
            "delivery finished"
        );
        outcome
    }

    async fn run(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let (channels, unreachable) = self.resolve_channels(&subscription.channels).await;
        if !unreachable.is_empty() {
            let text = messages::channel_access_error(&unreachable, &self.bot_username);
            self.notify(subscription, &text, correlation_id).await;
            return Err(DeliveryError::UnreachableChannels { channels: unreachable });
        }

        let window = self.store.get_message_collection_period(subscription, now);
        let mut collected: Vec<ChannelMessage> = Vec::new();
        let mut digests = Vec::with_capacity(channels.len());

        for channel in &channels {
            let fetched = self
                .transport
                .get_messages_since(channel, window.start)
                .await
                .map_err(|source| DeliveryError::Collect { channel: channel.name.clone(), source })?;

            let in_window: Vec<ChannelMessage> = fetched
                .into_iter()
                .filter(|message| window.contains(message.timestamp))
                .map(|message| ChannelMessage { channel_name: channel.name.clone(), ..message })
                .collect();

            digests.push(ChannelDigest {
                channel_name: channel.name.clone(),
                display_name: channel.label().to_string(),
                message_count: in_window.len(),
            });
            collected.extend(in_window);
        }

        if collected.is_empty() {
            let text = messages::no_new_messages(subscription.frequency, &digests);
            self.notify(subscription, &text, correlation_id).await;
            return Ok(DeliveryOutcome::NothingNew);
        }

        let message_count = u32::try_from(collected.len()).unwrap_or(u32::MAX);
        let summary = self
            .summarizer
            .summarize_channels(&collected, &digests, subscription.frequency)
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(SummarizerError::Llm(LlmError::EmptyResponse))
                } else {
                    Ok(text)
                }
            });

        let summary = match summary {
            Ok(summary) => summary,
            Err(source) => {
                self.notify(subscription, &messages::generation_error(), correlation_id).await;
                return Err(DeliveryError::Summarize { message_count, source });
            }
        };

        let text = messages::channel_digest(subscription.frequency, &digests, &summary);
        self.transport
            .send_direct_message(&subscription.user_id, &text)
            .await
            .map_err(|source| DeliveryError::Send { message_count, source })?;

        Ok(DeliveryOutcome::Delivered { message_count })
    }

    /// Splits configured names into resolved channels and the ones the bot cannot read.
    async fn resolve_channels(&self, names: &[String]) -> (Vec<ChannelInfo>, Vec<String>) {
        let mut reachable = Vec::with_capacity(names.len());
        let mut unreachable = Vec::new();

        for name in names {
            let channel = match self.transport.get_channel_by_name(name).await {
                Ok(Some(channel)) => channel,
                Ok(None) => {
                    unreachable.push(name.clone());
                    continue;
                }
                Err(error) => {
                    warn!(
                        event_name = "delivery.channel.lookup_failed",
                        channel = %name,
                        error = %error,
                        "channel lookup failed"
                    );
                    unreachable.push(name.clone());
                    continue;
                }
            };

            match self.transport.check_channel_permission(&channel.id).await {
                Ok(true) => reachable.push(channel),
                Ok(false) => unreachable.push(name.clone()),
                Err(error) => {
                    warn!(
                        event_name = "delivery.channel.permission_failed",
                        channel = %name,
                        error = %error,
                        "channel permission check failed"
                    );
                    unreachable.push(name.clone());
                }
            }
        }

        (reachable, unreachable)
    }

    async fn notify(&self, subscription: &Subscription, text: &str, correlation_id: &str) {
        if let Err(error) = self.transport.send_direct_message(&subscription.user_id, text).await {
            warn!(
                event_name = "delivery.notice.send_failed",
                correlation_id = %correlation_id,
                subscription_id = %subscription.id,
                user_id = %subscription.user_id,
                error = %error,
                "failed to send delivery notice"
            );
        }
    }
}
