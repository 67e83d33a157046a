use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use summarybot_core::config::MattermostConfig;

use crate::events::{parse_envelope, ChatEnvelope, EventContext, EventDispatcher};

const AUTH_SEQ: i64 = 1;
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const STABLE_SESSION: Duration = Duration::from_secs(60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `0` means unlimited.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 0, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &MattermostConfig) -> Self {
        Self { max_retries: config.reconnect_max_retries, ..Self::default() }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries > 0 && attempt >= self.max_retries
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the server closed the stream.
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Mattermost websocket (`/api/v4/websocket`) authenticated with the bot token.
pub struct MattermostSocketTransport {
    url: String,
    token: SecretString,
    stream: Mutex<Option<WsStream>>,
}

impl MattermostSocketTransport {
    pub fn from_config(config: &MattermostConfig) -> Self {
        Self { url: websocket_url(&config.url), token: config.token.clone(), stream: Mutex::new(None) }
    }

    async fn authenticate(&self, stream: &mut WsStream) -> Result<(), TransportError> {
        let challenge = json!({
            "seq": AUTH_SEQ,
            "action": "authentication_challenge",
            "data": { "token": self.token.expose_secret() },
        });
        stream
            .send(Message::Text(challenge.to_string()))
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        tokio::time::timeout(AUTH_TIMEOUT, async {
            while let Some(frame) = stream.next().await {
                let frame = frame.map_err(|error| TransportError::Connect(error.to_string()))?;
                let Message::Text(text) = frame else { continue };
                match authentication_reply(&text) {
                    Some(true) => return Ok(()),
                    Some(false) => {
                        return Err(TransportError::Connect("authentication rejected".to_owned()))
                    }
                    None => continue,
                }
            }
            Err(TransportError::Connect("stream closed during authentication".to_owned()))
        })
        .await
        .map_err(|_| TransportError::Connect("authentication timed out".to_owned()))?
    }
}

#[async_trait]
impl EventTransport for MattermostSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let (mut stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        self.authenticate(&mut stream).await?;
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::Receive("not connected".to_owned()));
        };

        while let Some(frame) = stream.next().await {
            match frame.map_err(|error| TransportError::Receive(error.to_string()))? {
                Message::Text(text) => {
                    if let Some(envelope) = parse_envelope(&text) {
                        return Ok(Some(envelope));
                    }
                }
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(());
        };
        stream.close(None).await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

/// `Some(true)` for `hello` or an OK reply to the challenge, `Some(false)` for a failed reply.
fn authentication_reply(text: &str) -> Option<bool> {
    let frame: serde_json::Value = serde_json::from_str(text).ok()?;
    if frame.get("event").and_then(serde_json::Value::as_str) == Some("hello") {
        return Some(true);
    }
    if frame.get("seq_reply").and_then(serde_json::Value::as_i64) != Some(AUTH_SEQ) {
        return None;
    }
    Some(frame.get("status").and_then(serde_json::Value::as_str) == Some("OK"))
}

pub fn websocket_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    format!("{base}/api/v4/websocket")
}

/// Liveness of the websocket session, read by the health endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub connected: bool,
    pub consecutive_failures: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set once the runner gave up reconnecting.
    pub stopped: bool,
}

pub type SharedStreamStatus = Arc<RwLock<StreamStatus>>;

pub struct EventStreamRunner {
    transport: Arc<dyn EventTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
    status: SharedStreamStatus,
}

impl EventStreamRunner {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy, status: SharedStreamStatus::default() }
    }

    pub fn status(&self) -> SharedStreamStatus {
        Arc::clone(&self.status)
    }

    /// Pumps events, reconnecting with capped backoff. With a non-zero `max_retries` it returns
    /// after that many consecutive failed sessions. A session that delivered an event or stayed
    /// up for a minute resets the retry budget; any other close counts as a failed attempt.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            let opened_at = Instant::now();
            let outcome = self.connect_and_pump(attempt).await;
            {
                let mut status = self.status.write().await;
                status.connected = false;
                status.last_error = outcome.as_ref().err().map(ToString::to_string);
            }
            match outcome {
                Ok(received) if received > 0 || opened_at.elapsed() >= STABLE_SESSION => {
                    info!(
                        event_name = "ingress.mattermost.reconnecting",
                        received,
                        "event stream closed; reconnecting"
                    );
                    attempt = 0;
                    self.status.write().await.consecutive_failures = 0;
                    continue;
                }
                Ok(_) => {
                    warn!(
                        event_name = "ingress.mattermost.stream_closed_early",
                        attempt,
                        "event stream closed before delivering any event"
                    );
                }
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.mattermost.transport_failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "event stream transport failed"
                    );
                }
            }

            self.status.write().await.consecutive_failures = attempt.saturating_add(1);
            if self.reconnect_policy.exhausted(attempt) {
                warn!(
                    event_name = "ingress.mattermost.retries_exhausted",
                    max_retries = self.reconnect_policy.max_retries,
                    "event stream retries exhausted; continuing process without crash"
                );
                self.status.write().await.stopped = true;
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt = attempt.saturating_add(1);
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<usize, TransportError> {
        info!(attempt, "opening event stream connection");
        self.transport.connect().await?;
        info!(attempt, "event stream connected");
        {
            let mut status = self.status.write().await;
            status.connected = true;
            status.last_connected_at = Some(Utc::now());
            status.last_error = None;
        }

        let mut received = 0;
        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, received, "event stream closed");
                self.transport.disconnect().await?;
                return Ok(received);
            };
            received += 1;

            let context = EventContext { correlation_id: envelope.correlation_id() };
            info!(
                event_name = "ingress.mattermost.envelope_received",
                seq = envelope.seq.unwrap_or(-1),
                event_type = ?envelope.event.event_type(),
                correlation_id = %context.correlation_id,
                "received mattermost event"
            );

            match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(result) => debug!(
                    event_name = "ingress.mattermost.dispatched",
                    correlation_id = %context.correlation_id,
                    result = ?result,
                    "event handled"
                ),
                Err(error) => warn!(
                    event_name = "ingress.mattermost.dispatch_failed",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "event dispatch failed; continuing event loop"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{
        authentication_reply, websocket_url, EventStreamRunner, EventTransport, ReconnectPolicy,
        TransportError,
    };
    use crate::events::{
        ChatEnvelope, ChatEvent, ChatEventType, EventContext, EventDispatcher, EventHandler,
        EventHandlerError, HandlerResult,
    };

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<ChatEnvelope>, TransportError>>,
        connect_attempts: usize,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<ChatEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }
    }

    #[async_trait]
    impl EventTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.lock().await.disconnect_calls += 1;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CountingHello {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for CountingHello {
        fn event_type(&self) -> ChatEventType {
            ChatEventType::Hello
        }

        async fn handle(
            &self,
            _envelope: &ChatEnvelope,
            ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            self.seen.lock().await.push(ctx.correlation_id.clone());
            Ok(HandlerResult::Processed)
        }
    }

    fn hello(seq: i64) -> ChatEnvelope {
        ChatEnvelope { seq: Some(seq), event: ChatEvent::Hello }
    }

    fn no_delay(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure_and_dispatches() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(hello(4))), Ok(None)],
        ));
        let handler = CountingHello::default();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(handler.clone());

        let runner = EventStreamRunner::new(transport.clone(), dispatcher, no_delay(2));
        runner.start().await.expect("runner should not fail");

        // failed connect, one productive session, then three empty sessions (attempts 0..=2)
        assert_eq!(transport.connect_attempts().await, 5);
        assert_eq!(*handler.seen.lock().await, vec!["seq-4"]);
        assert_eq!(transport.state.lock().await.disconnect_calls, 4);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = EventStreamRunner::new(transport.clone(), EventDispatcher::default(), no_delay(2));

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn receive_errors_count_as_failed_attempts() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![Err(TransportError::Receive("reset by peer".to_owned()))],
        ));

        let runner = EventStreamRunner::new(transport.clone(), EventDispatcher::default(), no_delay(1));

        runner.start().await.expect("runner should degrade gracefully");
        // receive error, then an empty session exhausts the single retry
        assert_eq!(transport.connect_attempts().await, 2);
    }

    #[tokio::test]
    async fn unlimited_policy_keeps_reconnecting_past_any_failure_burst() {
        let failures = (0..25)
            .map(|index| Err(TransportError::Connect(format!("refused-{index}"))))
            .collect::<Vec<_>>();
        let transport = Arc::new(ScriptedTransport::with_script(failures, vec![]));
        let policy = ReconnectPolicy { max_retries: 0, base_delay_ms: 1, max_delay_ms: 2 };
        let runner = Arc::new(EventStreamRunner::new(transport.clone(), EventDispatcher::default(), policy));
        let status = runner.status();

        let task = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.start().await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!task.is_finished(), "runner must not give up");
        assert!(transport.connect_attempts().await > 25);
        assert!(!status.read().await.stopped);
        task.abort();
    }

    #[tokio::test]
    async fn status_tracks_failures_and_exhaustion() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
            ],
            vec![],
        ));
        let runner = EventStreamRunner::new(transport, EventDispatcher::default(), no_delay(1));

        runner.start().await.expect("runner should degrade gracefully");

        let status = runner.status().read().await.clone();
        assert!(!status.connected);
        assert!(status.stopped);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_error.as_deref(), Some("transport failed to connect: fail-2"));
        assert_eq!(status.last_connected_at, None);
    }

    #[tokio::test]
    async fn productive_session_records_last_connection() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Err(TransportError::Connect("gone".to_owned()))],
            vec![Ok(Some(hello(1))), Ok(None)],
        ));
        let runner = EventStreamRunner::new(transport, EventDispatcher::default(), no_delay(1));

        runner.start().await.expect("runner should degrade gracefully");

        let status = runner.status().read().await.clone();
        assert!(status.last_connected_at.is_some());
        assert!(status.stopped);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_retries, 0);
        assert!(!policy.exhausted(1_000));
        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(2).as_millis(), 1_000);
        assert_eq!(policy.backoff(10).as_millis(), 5_000);
    }

    #[test]
    fn websocket_url_swaps_scheme() {
        assert_eq!(websocket_url("https://chat.example.com/"), "wss://chat.example.com/api/v4/websocket");
        assert_eq!(websocket_url("http://localhost:8065"), "ws://localhost:8065/api/v4/websocket");
    }

    #[test]
    fn authentication_reply_detection() {
        assert_eq!(authentication_reply(r#"{"event":"hello","seq":0,"data":{}}"#), Some(true));
        assert_eq!(authentication_reply(r#"{"status":"OK","seq_reply":1}"#), Some(true));
        assert_eq!(authentication_reply(r#"{"status":"FAIL","seq_reply":1}"#), Some(false));
        assert_eq!(authentication_reply(r#"{"event":"typing","seq":2}"#), None);
    }
}
