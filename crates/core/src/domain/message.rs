use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A channel as resolved on the chat platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

impl ChannelInfo {
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// One chat post, tagged with the channel it was collected from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel_name: String,
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDigest {
    pub channel_name: String,
    pub display_name: String,
    pub message_count: usize,
}
