use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use summarybot_agent::Summarizer;
use summarybot_core::domain::subscription::{NewSubscription, Subscription};
use summarybot_core::schedule::resolve_timezone;
use summarybot_db::SubscriptionStore;

use crate::client::{ApiPost, ChatApiError, ChatTransport};
use crate::commands::{
    classify_direct_message, is_summary_command, parse_dialog_reply, DialogReply,
    DirectMessageIntent, ManagementCommand, SubscriptionRequest,
};
use crate::dialog::DialogStates;
use crate::messages;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub seq: Option<i64>,
    pub event: ChatEvent,
}

impl ChatEnvelope {
    /// Post id when there is one, otherwise the websocket sequence number.
    pub fn correlation_id(&self) -> String {
        match &self.event {
            ChatEvent::DirectMessage(post) | ChatEvent::ChannelMessage(post) => post.post_id.clone(),
            _ => self.seq.map_or_else(|| "unknown-correlation-id".to_owned(), |seq| format!("seq-{seq}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    DirectMessage(PostedEvent),
    ChannelMessage(PostedEvent),
    Hello,
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::DirectMessage(_) => ChatEventType::DirectMessage,
            Self::ChannelMessage(_) => ChatEventType::ChannelMessage,
            Self::Hello => ChatEventType::Hello,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    DirectMessage,
    ChannelMessage,
    Hello,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedEvent {
    pub post_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub root_id: Option<String>,
    pub text: String,
    pub sender_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    seq: Option<i64>,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

/// Decodes one websocket frame. Replies to our own requests (`seq_reply`) carry no event and
/// yield `None`, as does anything that is not JSON.
pub fn parse_envelope(raw: &str) -> Option<ChatEnvelope> {
    let frame: RawFrame = serde_json::from_str(raw).ok()?;
    let event_type = frame.event?;

    let event = match event_type.as_str() {
        "hello" => ChatEvent::Hello,
        "posted" => parse_posted(&frame.data)
            .unwrap_or_else(|| ChatEvent::Unsupported { event_type: event_type.clone() }),
        _ => ChatEvent::Unsupported { event_type: event_type.clone() },
    };

    Some(ChatEnvelope { seq: frame.seq, event })
}

fn parse_posted(data: &serde_json::Map<String, serde_json::Value>) -> Option<ChatEvent> {
    let post: ApiPost = serde_json::from_str(data.get("post")?.as_str()?).ok()?;
    if !post.post_type.is_empty() {
        return None;
    }

    let sender_name = data
        .get("sender_name")
        .and_then(serde_json::Value::as_str)
        .map(|name| name.trim_start_matches('@').trim().to_string())
        .filter(|name| !name.is_empty());
    let is_direct = data.get("channel_type").and_then(serde_json::Value::as_str) == Some("D");

    let posted = PostedEvent {
        post_id: post.id,
        channel_id: post.channel_id,
        user_id: post.user_id,
        root_id: Some(post.root_id).filter(|id| !id.is_empty()),
        text: post.message,
        sender_name,
    };

    Some(if is_direct { ChatEvent::DirectMessage(posted) } else { ChatEvent::ChannelMessage(posted) })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(String),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Transport(#[from] ChatApiError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Subscription management over direct messages.
pub struct DirectMessageHandler {
    transport: Arc<dyn ChatTransport>,
    store: SubscriptionStore,
    dialogs: Arc<DialogStates>,
    bot_username: String,
}

impl DirectMessageHandler {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: SubscriptionStore,
        dialogs: Arc<DialogStates>,
        bot_username: impl Into<String>,
    ) -> Self {
        Self { transport, store, dialogs, bot_username: bot_username.into() }
    }

    async fn reply_for(&self, post: &PostedEvent, username: &str, ctx: &EventContext) -> String {
        let user_id = post.user_id.as_str();
        if let Some(snapshot) = self.dialogs.take(user_id).await {
            return self.apply_dialog_reply(user_id, snapshot, &post.text).await;
        }

        match classify_direct_message(&post.text) {
            DirectMessageIntent::Management(command) => self.manage(user_id, command).await,
            DirectMessageIntent::CreateSubscription(Ok(request)) => {
                self.create(user_id, username, request, ctx).await
            }
            DirectMessageIntent::CreateSubscription(Err(error)) => {
                info!(
                    event_name = "ingress.mattermost.subscription_rejected",
                    correlation_id = %ctx.correlation_id,
                    user_id,
                    error = %error,
                    "subscription request did not parse"
                );
                error.user_message()
            }
            DirectMessageIntent::Unrecognized => messages::help(&self.bot_username),
        }
    }

    async fn manage(&self, user_id: &str, command: ManagementCommand) -> String {
        match command {
            ManagementCommand::List => {
                messages::subscription_list(&self.store.get_user_subscriptions(user_id).await)
            }
            ManagementCommand::DeleteInteractive => {
                let subscriptions = self.store.get_user_subscriptions(user_id).await;
                if subscriptions.is_empty() {
                    return messages::nothing_to_delete();
                }
                let prompt = messages::delete_prompt(&subscriptions);
                self.dialogs.begin(user_id, subscriptions).await;
                prompt
            }
            ManagementCommand::DeleteAll => self.delete_all(user_id).await,
            ManagementCommand::CreateHelp => messages::create_help(&self.bot_username),
        }
    }

    async fn delete_all(&self, user_id: &str) -> String {
        if self.store.delete(user_id, None).await {
            messages::all_deleted()
        } else {
            messages::all_deletion_failed()
        }
    }

    async fn apply_dialog_reply(
        &self,
        user_id: &str,
        snapshot: Vec<Subscription>,
        text: &str,
    ) -> String {
        match parse_dialog_reply(text) {
            DialogReply::Cancel => messages::deletion_cancelled(),
            DialogReply::All => self.delete_all(user_id).await,
            DialogReply::Choice(position) if (1..=snapshot.len()).contains(&position) => {
                let subscription = &snapshot[position - 1];
                if self.store.delete(user_id, Some(subscription.id)).await {
                    messages::subscription_deleted(subscription)
                } else {
                    messages::deletion_failed()
                }
            }
            DialogReply::Choice(_) => messages::invalid_choice(snapshot.len()),
            DialogReply::Invalid => messages::invalid_dialog_reply(),
        }
    }

    async fn create(
        &self,
        user_id: &str,
        username: &str,
        request: SubscriptionRequest,
        ctx: &EventContext,
    ) -> String {
        let mut not_found = Vec::new();
        let mut no_access = Vec::new();
        for name in &request.channels {
            match self.transport.get_channel_by_name(name).await {
                Ok(Some(channel)) => {
                    let permitted = self
                        .transport
                        .check_channel_permission(&channel.id)
                        .await
                        .unwrap_or(false);
                    if !permitted {
                        no_access.push(name.clone());
                    }
                }
                Ok(None) => not_found.push(name.clone()),
                Err(error) => {
                    warn!(
                        event_name = "ingress.mattermost.channel_lookup_failed",
                        correlation_id = %ctx.correlation_id,
                        channel = %name,
                        error = %error,
                        "channel lookup failed"
                    );
                    not_found.push(name.clone());
                }
            }
        }

        if !not_found.is_empty() || !no_access.is_empty() {
            return messages::channel_problems(&not_found, &no_access, &self.bot_username);
        }

        let user_timezone = self.transport.get_user_timezone(user_id).await.ok().flatten();
        let timezone = resolve_timezone(user_timezone.as_deref(), self.store.fallback_timezone());

        let created = self
            .store
            .create_or_update(NewSubscription {
                user_id: user_id.to_string(),
                username: username.to_string(),
                channels: request.channels.clone(),
                schedule_time: request.schedule_time,
                frequency: request.frequency,
                weekday: request.weekday,
                timezone: timezone.name().to_string(),
            })
            .await;

        if !created {
            return messages::creation_failed();
        }

        info!(
            event_name = "ingress.mattermost.subscription_saved",
            correlation_id = %ctx.correlation_id,
            user_id,
            channels = request.channels.len(),
            frequency = request.frequency.as_str(),
            timezone = timezone.name(),
            "subscription saved"
        );
        messages::subscription_created(
            &request.channels,
            request.schedule_time,
            request.frequency,
            request.weekday,
        )
    }
}

#[async_trait]
impl EventHandler for DirectMessageHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::DirectMessage
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::DirectMessage(post) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if post.text.trim().is_empty() || post.user_id == self.transport.bot_user_id().await? {
            return Ok(HandlerResult::Ignored);
        }

        let username = match &post.sender_name {
            Some(name) => name.clone(),
            None => self
                .transport
                .get_username(&post.user_id)
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| post.user_id.clone()),
        };

        let reply = self.reply_for(post, &username, ctx).await;
        self.transport.post_message(&post.channel_id, &reply, None).await?;
        Ok(HandlerResult::Responded(reply))
    }
}

/// Thread summaries on demand in regular channels.
pub struct ChannelMessageHandler {
    transport: Arc<dyn ChatTransport>,
    summarizer: Arc<dyn Summarizer>,
}

impl ChannelMessageHandler {
    pub fn new(transport: Arc<dyn ChatTransport>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self { transport, summarizer }
    }

    async fn summarize(&self, root_id: &str, ctx: &EventContext) -> String {
        let thread = match self.transport.get_thread_messages(root_id).await {
            Ok(thread) => thread,
            Err(error) => {
                warn!(
                    event_name = "ingress.mattermost.thread_fetch_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "failed to fetch thread"
                );
                Vec::new()
            }
        };
        let thread: Vec<_> =
            thread.into_iter().filter(|message| !is_summary_command(&message.text)).collect();

        if thread.is_empty() {
            return messages::thread_fetch_failed();
        }
        if thread.len() < 2 {
            return messages::thread_too_short();
        }

        match self.summarizer.summarize_thread(&thread).await {
            Ok(summary) => summary,
            Err(error) => {
                warn!(
                    event_name = "ingress.mattermost.thread_summary_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "thread summary failed"
                );
                messages::thread_summary_failed()
            }
        }
    }
}

#[async_trait]
impl EventHandler for ChannelMessageHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::ChannelMessage
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::ChannelMessage(post) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if !is_summary_command(&post.text) || post.user_id == self.transport.bot_user_id().await? {
            return Ok(HandlerResult::Ignored);
        }

        if !self.transport.check_channel_permission(&post.channel_id).await? {
            warn!(
                event_name = "ingress.mattermost.summary_without_permission",
                correlation_id = %ctx.correlation_id,
                channel_id = %post.channel_id,
                "summary requested in a channel the bot cannot read"
            );
            return Ok(HandlerResult::Processed);
        }

        let root_id = post.root_id.clone().unwrap_or_else(|| post.post_id.clone());
        self.transport
            .post_message(&post.channel_id, &messages::thread_summary_started(), Some(&root_id))
            .await?;

        let reply = self.summarize(&root_id, ctx).await;
        self.transport.post_message(&post.channel_id, &reply, Some(&root_id)).await?;
        Ok(HandlerResult::Responded(reply))
    }
}
