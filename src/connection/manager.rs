//! Outbound Connection Manager
//!
//! Owns the single WebSocket link from the feeder to the broadcast server.
//!
//! Delivery is at-most-once: when a write fails the record is dropped, the
//! link is torn down and a reconnect runs in a background task. Until that
//! task finishes, sends fail fast so the producer keeps its pace. There is
//! no replay buffer.
//!
//! A reconnect cycle that runs out of attempts leaves the link
//! `Disconnected`; the next send at least one retry delay later starts a
//! fresh cycle, so the feeder recovers once the server is reachable again.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::retry::RetryPolicy;
use super::state::ConnectionState;
use super::ConnectionError;
use crate::producer::RecordSink;
use crate::record::Record;
use crate::wire::{Envelope, DEFAULT_DATA_EVENT, STATUS_EVENT};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the outbound link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Downstream server URL (e.g., "ws://collector:15064/ws")
    pub url: String,
    /// Event name records are sent under
    pub data_event: String,
    /// Connect/reconnect policy
    pub retry: RetryPolicy,
}

impl LinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            data_event: DEFAULT_DATA_EVENT.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Link counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    /// Envelopes written to the link
    pub sent: u64,
    /// Writes that failed and triggered a reconnect
    pub send_failures: u64,
    /// Records dropped because the link was down
    pub dropped: u64,
    /// Successful reconnects after a failure
    pub reconnects: u64,
    /// Connect attempts made, including retries
    pub attempts: u64,
}

/// An established link: write half plus the task draining the read half
struct Link {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    attempts: u32,
}

impl Link {
    fn new(stream: WsStream, attempts: u32) -> Self {
        let (sink, stream) = stream.split();
        let reader = tokio::spawn(drain_inbound(stream));
        Self {
            sink,
            reader,
            attempts,
        }
    }

    /// The server closed or reset the connection
    fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }
}

/// Manages the persistent connection to the downstream server
pub struct ConnectionManager {
    config: LinkConfig,
    state: ConnectionState,
    link: Option<Link>,
    reconnect: Option<JoinHandle<Result<Link, ConnectionError>>>,
    /// When the last reconnect cycle ran out of attempts
    gave_up_at: Option<Instant>,
    stats: ConnectionStats,
}

impl ConnectionManager {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            link: None,
            reconnect: None,
            gave_up_at: None,
            stats: ConnectionStats::default(),
        }
    }

    /// Current link state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Link counters
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Connect, retrying per the policy
    ///
    /// Waits until the link is up or the attempts are exhausted.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
        if self.state != ConnectionState::Connecting {
            self.transition(ConnectionState::Connecting);
        }

        tracing::info!(url = %self.config.url, "Connecting to downstream server");
        match establish(self.config.url.clone(), self.config.retry.clone()).await {
            Ok(link) => {
                self.adopt(link).await;
                Ok(())
            }
            Err(e) => {
                if let ConnectionError::RetriesExhausted { attempts } = &e {
                    self.stats.attempts += u64::from(*attempts);
                }
                tracing::error!(url = %self.config.url, error = %e, "Could not connect to downstream server");
                self.give_up();
                Err(e)
            }
        }
    }

    /// Write one record to the link
    ///
    /// On a write failure the record is dropped and a background reconnect
    /// starts. While it runs, this returns [`ConnectionError::NotConnected`]
    /// immediately.
    pub async fn send(&mut self, record: &Record) -> Result<(), ConnectionError> {
        let envelope = Envelope::record(&self.config.data_event, record)?;
        self.send_envelope(&envelope).await
    }

    /// Adopt a finished background reconnect, if any, and report the state
    pub async fn poll(&mut self) -> ConnectionState {
        let finished = self
            .reconnect
            .as_ref()
            .map_or(false, |task| task.is_finished());
        if !finished {
            return self.state;
        }
        let Some(task) = self.reconnect.take() else {
            return self.state;
        };

        match task.await {
            Ok(Ok(link)) => {
                self.stats.reconnects += 1;
                self.adopt(link).await;
            }
            Ok(Err(e)) => {
                if let ConnectionError::RetriesExhausted { attempts } = &e {
                    self.stats.attempts += u64::from(*attempts);
                }
                tracing::error!(error = %e, "Reconnect gave up");
                self.give_up();
            }
            Err(e) => {
                tracing::error!(error = %e, "Reconnect task failed");
                self.give_up();
            }
        }
        self.state
    }

    /// Close the link from whatever state it is in
    ///
    /// Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.gave_up_at = None;
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }

        if let Some(mut link) = self.link.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, link.sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Close handshake failed"),
                Err(_) => tracing::debug!("Close handshake timed out"),
            }
            link.reader.abort();
            tracing::info!(url = %self.config.url, "Disconnected from downstream server");
        }

        if self.state != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected);
        }
    }

    async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), ConnectionError> {
        self.poll().await;
        self.retry_after_giving_up();

        if self.state != ConnectionState::Connected {
            self.stats.dropped += 1;
            return Err(ConnectionError::NotConnected(self.state));
        }
        self.write(envelope).await
    }

    /// Write to the current link without adopting pending reconnects
    async fn write(&mut self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let Some(link) = self.link.as_mut() else {
            self.stats.dropped += 1;
            return Err(ConnectionError::NotConnected(self.state));
        };

        if link.is_closed() {
            self.on_write_failure("server closed the connection");
            return Err(ConnectionError::Closed);
        }

        let text = envelope.encode()?;
        match link.sink.send(Message::Text(text)).await {
            Ok(()) => {
                self.stats.sent += 1;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.on_write_failure(&reason);
                Err(ConnectionError::Send(reason))
            }
        }
    }

    async fn adopt(&mut self, link: Link) {
        self.gave_up_at = None;
        self.stats.attempts += u64::from(link.attempts);
        self.link = Some(link);
        self.transition(ConnectionState::Connected);
        tracing::info!(url = %self.config.url, "Connected to downstream server");

        if let Err(e) = self
            .write(&Envelope::client_status("client connected"))
            .await
        {
            tracing::warn!(error = %e, "Failed to announce client status");
        }
    }

    /// Connected → Error → Connecting, with a background reconnect
    fn on_write_failure(&mut self, reason: &str) {
        self.stats.send_failures += 1;
        self.stats.dropped += 1;
        self.transition(ConnectionState::Error);
        tracing::warn!(url = %self.config.url, reason = %reason, "Link failed, reconnecting");

        if let Some(link) = self.link.take() {
            link.reader.abort();
        }

        // Let the failed link settle before the first new attempt
        self.spawn_reconnect(self.config.retry.delay_after(1));
    }

    /// Exhausted reconnect: settle in `Disconnected` until the next cycle
    fn give_up(&mut self) {
        self.gave_up_at = Some(Instant::now());
        self.transition(ConnectionState::Disconnected);
    }

    /// Start a new reconnect cycle once a retry delay has passed since the
    /// last one gave up
    fn retry_after_giving_up(&mut self) {
        if self.state != ConnectionState::Disconnected || self.reconnect.is_some() {
            return;
        }
        let Some(gave_up_at) = self.gave_up_at else {
            return;
        };
        if gave_up_at.elapsed() < self.config.retry.delay {
            return;
        }

        self.gave_up_at = None;
        tracing::info!(url = %self.config.url, "Retrying downstream server");
        self.spawn_reconnect(Duration::ZERO);
    }

    /// → Connecting, with `establish` running in the background
    fn spawn_reconnect(&mut self, settle: Duration) {
        self.transition(ConnectionState::Connecting);
        let url = self.config.url.clone();
        let retry = self.config.retry.clone();
        self.reconnect = Some(tokio::spawn(async move {
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            establish(url, retry).await
        }));
    }

    fn transition(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = %self.state, to = %next, "Illegal connection state transition");
        }
        tracing::debug!(from = %self.state, to = %next, "Connection state change");
        self.state = next;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            link.reader.abort();
        }
    }
}

#[async_trait]
impl RecordSink for ConnectionManager {
    type Error = ConnectionError;

    async fn send(&mut self, record: &Record) -> Result<(), ConnectionError> {
        ConnectionManager::send(self, record).await
    }
}

/// Connect with retries
async fn establish(url: String, retry: RetryPolicy) -> Result<Link, ConnectionError> {
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);

        match tokio::time::timeout(retry.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => return Ok(Link::new(stream, attempt)),
            Ok(Err(e)) => {
                tracing::warn!(url = %url, attempt, error = %e, "Connection attempt failed");
            }
            Err(_) => {
                tracing::warn!(url = %url, attempt, "Connection attempt timed out");
            }
        }

        if !retry.allows_retry_after(attempt) {
            return Err(ConnectionError::RetriesExhausted { attempts: attempt });
        }
        tokio::time::sleep(retry.delay_after(attempt)).await;
    }
}

/// Read the inbound half until the server goes away
async fn drain_inbound(mut stream: SplitStream<WsStream>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match Envelope::decode(&text) {
                Ok(envelope) if envelope.event == STATUS_EVENT => {
                    let message = envelope
                        .to_status()
                        .map(|s| s.message)
                        .unwrap_or_default();
                    tracing::info!(message = %message, "Server status");
                }
                Ok(envelope) => {
                    tracing::trace!(event = %envelope.event, "Ignoring inbound event");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Invalid inbound frame");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("Server closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Inbound read failed");
                break;
            }
        }
    }
}
