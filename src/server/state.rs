//! Application State
//!
//! Shared state for the HTTP and WebSocket handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::dispatch::DispatchTable;
use super::hub::{HubConfig, SubscriberHub};
use super::lifecycle::{EmbeddedFeed, StreamLifecycle};
use crate::wire::DEFAULT_DATA_EVENT;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Subscriber registry and fan-out
    pub hub: Arc<SubscriberHub>,
    /// Event routing for inbound frames
    pub dispatch: Arc<DispatchTable>,
    pub config: Arc<ServerConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,
    lifecycle: Arc<StreamLifecycle>,
    feed: Option<Arc<EmbeddedFeed>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(SubscriberHub::new(config.hub.clone()));
        let dispatch = Arc::new(DispatchTable::relay(&config.data_event));
        Self {
            hub,
            dispatch,
            config: Arc::new(config),
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
            lifecycle: Arc::new(StreamLifecycle::new()),
            feed: None,
        }
    }

    /// Attach an in-process producer publishing into this server's hub
    pub fn with_feed(mut self, feed: EmbeddedFeed) -> Self {
        self.feed = Some(Arc::new(feed));
        self
    }

    /// Start the embedded stream if there is one and it has not started yet
    pub fn ensure_stream_started(&self) -> bool {
        match &self.feed {
            Some(feed) => self.lifecycle.ensure_started(|| feed.spawn()),
            None => false,
        }
    }

    pub fn stream_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Broadcast server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Event name records are relayed under
    pub data_event: String,
    /// Limit for a single socket write before the subscriber is dropped
    pub write_timeout: Duration,
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 15064,
            data_event: DEFAULT_DATA_EVENT.to_string(),
            write_timeout: Duration::from_secs(5),
            hub: HubConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
