use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use summarybot_core::config::MattermostConfig;
use summarybot_core::domain::message::{ChannelInfo, ChannelMessage};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatApiError {
    #[error("chat request failed: {0}")]
    Request(String),
    #[error("chat endpoint `{endpoint}` returned status {status}")]
    Status { endpoint: String, status: u16 },
    #[error("chat response could not be decoded: {0}")]
    Decode(String),
}

/// Everything the bot needs from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn bot_user_id(&self) -> Result<String, ChatApiError>;

    /// Resolves a channel by id, internal name or display name. `None` means not found.
    async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelInfo>, ChatApiError>;

    async fn check_channel_permission(&self, channel_id: &str) -> Result<bool, ChatApiError>;

    /// Posts created at or after `since`, oldest first, without the bot's own or system posts.
    async fn get_messages_since(
        &self,
        channel: &ChannelInfo,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChannelMessage>, ChatApiError>;

    async fn get_thread_messages(&self, post_id: &str) -> Result<Vec<ChannelMessage>, ChatApiError>;

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<(), ChatApiError>;

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        root_id: Option<&str>,
    ) -> Result<(), ChatApiError>;

    async fn get_username(&self, user_id: &str) -> Result<Option<String>, ChatApiError>;

    async fn get_user_timezone(&self, user_id: &str) -> Result<Option<String>, ChatApiError>;
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
    #[serde(default)]
    timezone: Option<ApiUserTimezone>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUserTimezone {
    #[serde(default)]
    use_automatic_timezone: String,
    #[serde(default)]
    automatic_timezone: String,
    #[serde(default)]
    manual_timezone: String,
}

#[derive(Debug, Deserialize)]
struct ApiTeam {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    id: String,
    name: String,
    #[serde(default)]
    display_name: String,
}

impl From<ApiChannel> for ChannelInfo {
    fn from(channel: ApiChannel) -> Self {
        Self { id: channel.id, name: channel.name, display_name: channel.display_name }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiPost {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) user_id: String,
    #[serde(default)]
    pub(crate) channel_id: String,
    #[serde(default)]
    pub(crate) root_id: String,
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) create_at: i64,
    #[serde(default, rename = "type")]
    pub(crate) post_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiPostList {
    #[serde(default)]
    order: Vec<String>,
    #[serde(default)]
    posts: HashMap<String, ApiPost>,
}

/// REST client for the Mattermost v4 API.
pub struct MattermostClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    bot_user_id: OnceCell<String>,
    usernames: Mutex<HashMap<String, String>>,
}

impl MattermostClient {
    pub fn from_config(config: &MattermostConfig) -> Result<Self, ChatApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ChatApiError::Request(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            token: config.token.clone(),
            bot_user_id: OnceCell::new(),
            usernames: Mutex::new(HashMap::new()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChatApiError> {
        self.get_optional(path).await?.ok_or_else(|| ChatApiError::Status {
            endpoint: path.to_string(),
            status: StatusCode::NOT_FOUND.as_u16(),
        })
    }

    /// 403 and 404 become `None`; other non-success statuses are errors.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ChatApiError> {
        let response = self
            .http
            .get(self.endpoint(path))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|error| ChatApiError::Request(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ChatApiError::Status { endpoint: path.to_string(), status: status.as_u16() });
        }

        response.json::<T>().await.map(Some).map_err(|error| ChatApiError::Decode(error.to_string()))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChatApiError> {
        let response = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| ChatApiError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatApiError::Status { endpoint: path.to_string(), status: status.as_u16() });
        }
        response.json::<T>().await.map_err(|error| ChatApiError::Decode(error.to_string()))
    }

    async fn bot_teams(&self) -> Result<Vec<ApiTeam>, ChatApiError> {
        self.get_json("/users/me/teams").await
    }

    async fn cached_username(&self, user_id: &str) -> String {
        match self.get_username(user_id).await {
            Ok(Some(username)) => username,
            Ok(None) => String::new(),
            Err(error) => {
                debug!(
                    event_name = "mattermost.user.lookup_failed",
                    user_id,
                    error = %error,
                    "could not resolve post author"
                );
                String::new()
            }
        }
    }

    async fn collect_messages(
        &self,
        list: ApiPostList,
        channel_name: Option<&str>,
    ) -> Result<Vec<ChannelMessage>, ChatApiError> {
        let bot_user_id = self.bot_user_id().await?;
        let mut messages = Vec::new();
        for post in ordered_user_posts(list, &bot_user_id) {
            let username = self.cached_username(&post.user_id).await;
            messages.push(ChannelMessage {
                channel_name: channel_name.map_or_else(|| post.channel_id.clone(), str::to_string),
                username,
                text: post.message,
                timestamp: timestamp_from_millis(post.create_at),
            });
        }
        Ok(messages)
    }
}

#[async_trait]
impl ChatTransport for MattermostClient {
    async fn bot_user_id(&self) -> Result<String, ChatApiError> {
        self.bot_user_id
            .get_or_try_init(|| async {
                let me: ApiUser = self.get_json("/users/me").await?;
                debug!(
                    event_name = "mattermost.auth.identified",
                    bot_user_id = %me.id,
                    bot_username = %me.username,
                    "resolved bot identity"
                );
                Ok::<_, ChatApiError>(me.id)
            })
            .await
            .cloned()
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelInfo>, ChatApiError> {
        let clean = name.trim().trim_start_matches('~').trim();
        if clean.is_empty() {
            return Ok(None);
        }

        if looks_like_channel_id(clean) {
            if let Some(channel) = self.get_optional::<ApiChannel>(&format!("/channels/{clean}")).await? {
                return Ok(Some(channel.into()));
            }
        }

        let internal = internal_channel_name(clean);
        let teams = self.bot_teams().await?;
        for team in &teams {
            let path = format!("/teams/{}/channels/name/{internal}", team.id);
            if let Some(channel) = self.get_optional::<ApiChannel>(&path).await? {
                return Ok(Some(channel.into()));
            }
        }

        let wanted = clean.to_lowercase();
        for team in &teams {
            let path = format!("/users/me/teams/{}/channels", team.id);
            let channels: Vec<ApiChannel> = self.get_optional(&path).await?.unwrap_or_default();
            if let Some(channel) = channels
                .into_iter()
                .find(|channel| channel.display_name.to_lowercase() == wanted || channel.name == internal)
            {
                return Ok(Some(channel.into()));
            }
        }

        warn!(
            event_name = "mattermost.channel.not_found",
            channel = clean,
            "channel not found by id, internal name or display name"
        );
        Ok(None)
    }

    async fn check_channel_permission(&self, channel_id: &str) -> Result<bool, ChatApiError> {
        let membership: Option<serde_json::Value> =
            self.get_optional(&format!("/channels/{channel_id}/members/me")).await?;
        Ok(membership.is_some())
    }

    async fn get_messages_since(
        &self,
        channel: &ChannelInfo,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChannelMessage>, ChatApiError> {
        let path = format!("/channels/{}/posts?since={}", channel.id, since.timestamp_millis());
        let list: ApiPostList = self.get_json(&path).await?;
        self.collect_messages(list, Some(&channel.name)).await
    }

    async fn get_thread_messages(&self, post_id: &str) -> Result<Vec<ChannelMessage>, ChatApiError> {
        let list: ApiPostList =
            self.get_optional(&format!("/posts/{post_id}/thread")).await?.unwrap_or_default();
        self.collect_messages(list, None).await
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<(), ChatApiError> {
        let bot_user_id = self.bot_user_id().await?;
        let channel: ApiChannel =
            self.post_json("/channels/direct", &json!([bot_user_id, user_id])).await?;
        self.post_message(&channel.id, text, None).await
    }

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        root_id: Option<&str>,
    ) -> Result<(), ChatApiError> {
        let body = json!({
            "channel_id": channel_id,
            "message": text,
            "root_id": root_id.unwrap_or_default(),
        });
        let _: serde_json::Value = self.post_json("/posts", &body).await?;
        Ok(())
    }

    async fn get_username(&self, user_id: &str) -> Result<Option<String>, ChatApiError> {
        if let Some(username) = self.usernames.lock().await.get(user_id) {
            return Ok(Some(username.clone()));
        }

        let user: Option<ApiUser> = self.get_optional(&format!("/users/{user_id}")).await?;
        let username = user.map(|user| user.username);
        if let Some(username) = &username {
            self.usernames.lock().await.insert(user_id.to_string(), username.clone());
        }
        Ok(username)
    }

    async fn get_user_timezone(&self, user_id: &str) -> Result<Option<String>, ChatApiError> {
        let user: Option<ApiUser> = self.get_optional(&format!("/users/{user_id}")).await?;
        Ok(user.and_then(|user| user.timezone).and_then(|timezone| preferred_timezone(&timezone)))
    }
}

/// Mattermost ids are 26 lowercase alphanumerics; anything this shape is tried as an id first.
fn looks_like_channel_id(candidate: &str) -> bool {
    candidate.len() >= 20 && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}

fn internal_channel_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '_'], "-")
}

fn preferred_timezone(timezone: &ApiUserTimezone) -> Option<String> {
    let chosen = if timezone.use_automatic_timezone == "true" {
        &timezone.automatic_timezone
    } else {
        &timezone.manual_timezone
    };
    let chosen = chosen.trim();
    (!chosen.is_empty()).then(|| chosen.to_string())
}

fn ordered_user_posts(mut list: ApiPostList, bot_user_id: &str) -> Vec<ApiPost> {
    let mut posts: Vec<ApiPost> = list
        .order
        .iter()
        .filter_map(|id| list.posts.remove(id))
        .filter(|post| post.user_id != bot_user_id && post.post_type.is_empty())
        .collect();
    posts.sort_by_key(|post| post.create_at);
    posts
}

fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
