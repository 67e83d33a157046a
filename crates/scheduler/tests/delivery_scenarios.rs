use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;

use summarybot_agent::{LlmError, Summarizer, SummarizerError};
use summarybot_core::domain::message::{ChannelDigest, ChannelInfo, ChannelMessage};
use summarybot_core::domain::subscription::{
    DeliveryStatus, Frequency, NewSubscription, ScheduleTime,
};
use summarybot_db::{InMemorySubscriptionRepository, SubscriptionStore};
use summarybot_mattermost::client::{ChatApiError, ChatTransport};
use summarybot_scheduler::{DeliveryOutcome, DeliveryPipeline, SchedulerLoop};

fn utc(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, hour, minute, second).unwrap()
}

fn channel(name: &str) -> ChannelInfo {
    ChannelInfo {
        id: format!("{name}-id"),
        name: name.to_string(),
        display_name: name.to_uppercase(),
    }
}

fn message(channel_name: &str, text: &str, at: DateTime<Utc>) -> ChannelMessage {
    ChannelMessage {
        channel_name: channel_name.to_string(),
        username: "alice".to_string(),
        text: text.to_string(),
        timestamp: at,
    }
}

#[derive(Default)]
struct FakeChat {
    channels: HashMap<String, ChannelInfo>,
    readable: HashSet<String>,
    posts: HashMap<String, Vec<ChannelMessage>>,
    direct_messages: Mutex<Vec<(String, String)>>,
}

impl FakeChat {
    fn with_channel(mut self, name: &str, readable: bool, posts: Vec<ChannelMessage>) -> Self {
        let info = channel(name);
        if readable {
            self.readable.insert(info.id.clone());
        }
        self.posts.insert(info.id.clone(), posts);
        self.channels.insert(name.to_string(), info);
        self
    }

    async fn sent_to(&self, user_id: &str) -> Vec<String> {
        self.direct_messages
            .lock()
            .await
            .iter()
            .filter(|(recipient, _)| recipient == user_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn bot_user_id(&self) -> Result<String, ChatApiError> {
        Ok("bot".to_string())
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelInfo>, ChatApiError> {
        Ok(self.channels.get(name).cloned())
    }

    async fn check_channel_permission(&self, channel_id: &str) -> Result<bool, ChatApiError> {
        Ok(self.readable.contains(channel_id))
    }

    async fn get_messages_since(
        &self,
        channel: &ChannelInfo,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChannelMessage>, ChatApiError> {
        Ok(self
            .posts
            .get(&channel.id)
            .map(|posts| posts.iter().filter(|post| post.timestamp >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_thread_messages(&self, _post_id: &str) -> Result<Vec<ChannelMessage>, ChatApiError> {
        Ok(Vec::new())
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<(), ChatApiError> {
        self.direct_messages.lock().await.push((user_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn post_message(
        &self,
        _channel_id: &str,
        _text: &str,
        _root_id: Option<&str>,
    ) -> Result<(), ChatApiError> {
        Ok(())
    }

    async fn get_username(&self, _user_id: &str) -> Result<Option<String>, ChatApiError> {
        Ok(None)
    }

    async fn get_user_timezone(&self, _user_id: &str) -> Result<Option<String>, ChatApiError> {
        Ok(None)
    }
}

#[derive(Default)]
struct RecordingSummarizer {
    fail: bool,
    calls: Mutex<Vec<(usize, Vec<ChannelDigest>)>>,
}

#[async_trait]
impl Summarizer for RecordingSummarizer {
    async fn summarize_thread(&self, _messages: &[ChannelMessage]) -> Result<String, SummarizerError> {
        Ok("thread".to_string())
    }

    async fn summarize_channels(
        &self,
        messages: &[ChannelMessage],
        digests: &[ChannelDigest],
        _frequency: Frequency,
    ) -> Result<String, SummarizerError> {
        self.calls.lock().await.push((messages.len(), digests.to_vec()));
        if self.fail {
            Err(SummarizerError::Llm(LlmError::Status { status: 502, body: "bad gateway".to_string() }))
        } else {
            Ok("### GENERAL\n- обсудили релиз".to_string())
        }
    }
}

struct Harness {
    store: SubscriptionStore,
    chat: Arc<FakeChat>,
    summarizer: Arc<RecordingSummarizer>,
    scheduler: SchedulerLoop,
}

impl Harness {
    fn new(chat: FakeChat, summarizer: RecordingSummarizer) -> Self {
        let store = SubscriptionStore::new(
            Arc::new(InMemorySubscriptionRepository::default()),
            chrono_tz::Europe::Moscow,
        );
        let chat = Arc::new(chat);
        let summarizer = Arc::new(summarizer);
        let pipeline = DeliveryPipeline::new(
            store.clone(),
            Arc::clone(&chat) as Arc<dyn ChatTransport>,
            Arc::clone(&summarizer) as Arc<dyn Summarizer>,
            "summarybot",
        );
        let scheduler = SchedulerLoop::new(store.clone(), pipeline, Duration::from_secs(60));
        Self { store, chat, summarizer, scheduler }
    }

    async fn subscribe(&self, user_id: &str, channels: &[&str]) {
        let created = self
            .store
            .create_or_update(NewSubscription {
                user_id: user_id.to_string(),
                username: user_id.to_string(),
                channels: channels.iter().map(|name| name.to_string()).collect(),
                schedule_time: ScheduleTime::parse("09:00").expect("valid time"),
                frequency: Frequency::Daily,
                weekday: None,
                timezone: "UTC".to_string(),
            })
            .await;
        assert!(created, "subscription should be stored");
    }

    async fn only_subscription_of(&self, user_id: &str) -> summarybot_core::Subscription {
        let mut rows = self.store.get_user_subscriptions(user_id).await;
        assert_eq!(rows.len(), 1);
        rows.remove(0)
    }
}

#[tokio::test]
async fn inaccessible_channel_notifies_user_and_logs_error() {
    let chat = FakeChat::default()
        .with_channel("general", true, vec![message("general", "hi", utc(18, 8, 0, 0))])
        .with_channel("secret", false, Vec::new());
    let harness = Harness::new(chat, RecordingSummarizer::default());
    harness.subscribe("u1", &["general", "secret", "missing"]).await;

    let report = harness.scheduler.tick(utc(18, 9, 0, 30)).await;
    assert_eq!(report.due, 1);
    assert_eq!(report.failed, 1);

    let sent = harness.chat.sent_to("u1").await;
    assert_eq!(sent.len(), 1, "exactly one diagnostic DM");
    assert!(sent[0].contains("Ошибка доставки сводки"));
    assert!(sent[0].contains("• secret"));
    assert!(sent[0].contains("• missing"));
    assert!(!sent[0].contains("• general"));
    assert!(sent[0].contains("/invite @summarybot"));

    assert!(harness.summarizer.calls.lock().await.is_empty(), "no partial delivery");

    let subscription = harness.only_subscription_of("u1").await;
    let history = harness.store.delivery_history(subscription.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Error);
    assert_eq!(history[0].message_count, 0);
    assert_eq!(history[0].error_message.as_deref(), Some("Нет доступа к каналам: secret, missing"));
    assert_eq!(history[0].delivered_at, utc(18, 9, 0, 30));
}

#[tokio::test]
async fn zero_messages_sends_notice_and_is_not_repeated_the_same_day() {
    let chat = FakeChat::default()
        .with_channel("general", true, vec![message("general", "stale", utc(16, 12, 0, 0))])
        .with_channel("random", true, Vec::new());
    let harness = Harness::new(chat, RecordingSummarizer::default());
    harness.subscribe("u1", &["general", "random"]).await;

    let first = harness.scheduler.tick(utc(18, 9, 0, 30)).await;
    assert_eq!(first.due, 1);
    assert_eq!(first.empty, 1);

    let sent = harness.chat.sent_to("u1").await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("нет новых сообщений за последние 24 часа"));
    assert!(sent[0].contains("**GENERAL**"));
    assert!(sent[0].contains("**RANDOM**"));
    assert!(harness.summarizer.calls.lock().await.is_empty());

    let subscription = harness.only_subscription_of("u1").await;
    let history = harness.store.delivery_history(subscription.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Success);
    assert_eq!(history[0].message_count, 0);
    assert_eq!(history[0].error_message, None);

    let second = harness.scheduler.tick(utc(18, 9, 0, 50)).await;
    assert_eq!(second.due, 0, "a success today suppresses another delivery");
    assert_eq!(harness.chat.sent_to("u1").await.len(), 1);
}

#[tokio::test]
async fn messages_inside_the_window_are_summarized_and_delivered() {
    let chat = FakeChat::default()
        .with_channel(
            "general",
            true,
            vec![
                message("general", "too old", utc(17, 8, 59, 0)),
                message("general", "release plan", utc(17, 15, 0, 0)),
                message("general", "shipped", utc(18, 8, 30, 0)),
            ],
        )
        .with_channel("random", true, vec![message("random", "lunch?", utc(18, 7, 0, 0))]);
    let harness = Harness::new(chat, RecordingSummarizer::default());
    harness.subscribe("u1", &["general", "random"]).await;

    let report = harness.scheduler.tick(utc(18, 9, 0, 30)).await;
    assert_eq!(report.delivered, 1);

    let calls = harness.summarizer.calls.lock().await.clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 3);
    assert_eq!(calls[0].1[0].message_count, 2);
    assert_eq!(calls[0].1[1].message_count, 1);

    let sent = harness.chat.sent_to("u1").await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("📊 **Ежедневная сводка каналов**"));
    assert!(sent[0].contains("**GENERAL** (2 сообщений)"));
    assert!(sent[0].contains("**Всего сообщений:** 3"));
    assert!(sent[0].contains("обсудили релиз"));

    let subscription = harness.only_subscription_of("u1").await;
    let history = harness.store.delivery_history(subscription.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Success);
    assert_eq!(history[0].message_count, 3);
}

#[tokio::test]
async fn summarizer_failure_sends_generation_error_and_logs_count() {
    let chat = FakeChat::default().with_channel(
        "general",
        true,
        vec![message("general", "a", utc(18, 8, 0, 0)), message("general", "b", utc(18, 8, 1, 0))],
    );
    let harness = Harness::new(chat, RecordingSummarizer { fail: true, ..Default::default() });
    harness.subscribe("u1", &["general"]).await;

    let report = harness.scheduler.tick(utc(18, 9, 0, 0)).await;
    assert_eq!(report.failed, 1);

    let sent = harness.chat.sent_to("u1").await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Ошибка генерации сводки"));

    let subscription = harness.only_subscription_of("u1").await;
    let history = harness.store.delivery_history(subscription.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Error);
    assert_eq!(history[0].message_count, 2);
}

#[tokio::test]
async fn one_failing_subscription_does_not_block_the_others() {
    let chat = FakeChat::default()
        .with_channel("general", true, vec![message("general", "hello", utc(18, 8, 0, 0))])
        .with_channel("secret", false, Vec::new());
    let harness = Harness::new(chat, RecordingSummarizer::default());
    harness.subscribe("blocked", &["secret"]).await;
    harness.subscribe("reader", &["general"]).await;

    let report = harness.scheduler.tick(utc(18, 9, 0, 10)).await;
    assert_eq!(report.due, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);

    assert_eq!(harness.chat.sent_to("blocked").await.len(), 1);
    assert_eq!(harness.chat.sent_to("reader").await.len(), 1);

    let status = harness.scheduler.status();
    let status = status.read().await;
    assert_eq!(status.ticks, 1);
    assert_eq!(status.last_tick.as_ref().map(|tick| tick.delivered), Some(1));
}

#[tokio::test]
async fn pipeline_reports_outcome_for_direct_runs() {
    let chat = FakeChat::default().with_channel("general", true, Vec::new());
    let harness = Harness::new(chat, RecordingSummarizer::default());
    harness.subscribe("u1", &["general"]).await;
    let subscription = harness.only_subscription_of("u1").await;

    let pipeline = DeliveryPipeline::new(
        harness.store.clone(),
        Arc::clone(&harness.chat) as Arc<dyn ChatTransport>,
        Arc::clone(&harness.summarizer) as Arc<dyn Summarizer>,
        "summarybot",
    );
    let outcome = pipeline.deliver(&subscription, utc(18, 12, 0, 0), "test").await;

    assert_eq!(outcome, DeliveryOutcome::NothingNew);
    assert_eq!(harness.store.delivery_history(subscription.id).await.len(), 1);
}

#[tokio::test]
async fn run_stops_when_shutdown_flips() {
    let harness = Harness::new(FakeChat::default(), RecordingSummarizer::default());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler = Arc::new(harness.scheduler);
    let task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    shutdown_tx.send(true).expect("receiver alive");
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop should stop promptly")
        .expect("loop task should not panic");
}
