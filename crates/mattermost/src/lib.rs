//! Mattermost integration - websocket event stream and REST client
//!
//! This crate provides the chat-facing side of the summary bot:
//! - **Event stream** (`socket`) - authenticated websocket with reconnection
//! - **Events** (`events`) - frame decoding, dispatcher, DM and channel handlers
//! - **Commands** (`commands`) - the subscription grammar for direct messages
//! - **Client** (`client`) - REST calls behind the `ChatTransport` trait
//! - **Messages** (`messages`) - every markdown reply the bot sends
//!
//! # Architecture
//!
//! ```text
//! websocket → EventStreamRunner → EventDispatcher → DirectMessageHandler → SubscriptionStore
//!                                                 → ChannelMessageHandler → Summarizer
//! ```

pub mod client;
pub mod commands;
pub mod dialog;
pub mod events;
pub mod messages;
pub mod socket;

pub use client::{ChatApiError, ChatTransport, MattermostClient};
pub use dialog::DialogStates;
pub use events::{ChannelMessageHandler, DirectMessageHandler, EventDispatcher};
pub use socket::{
    EventStreamRunner, MattermostSocketTransport, ReconnectPolicy, SharedStreamStatus, StreamStatus,
};
