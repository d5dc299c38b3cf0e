//! # windrelay
//!
//! Wind turbine telemetry relay: takes raw buffers from a data-acquisition
//! device, normalizes them into fixed-shape records, forwards them over a
//! resilient WebSocket link and fans them out to dashboards.
//!
//! ## Pipeline
//!
//! ```text
//! SampleSource → normalize → Producer → ConnectionManager ──ws──▶ server → subscribers
//! ```
//!
//! ## Modules
//!
//! - [`record`]: Record shape and the normalizer
//! - [`source`]: Sample source contract, JSON-lines bridge, buffer selector
//! - [`producer`]: Paced producer loop
//! - [`connection`]: Outbound link with reconnect
//! - [`wire`]: JSON event envelope
//! - [`server`]: Broadcast server (subscriber hub, dispatch, HTTP router)
//! - [`config`]: TOML configuration with environment overrides
//! - [`logging`]: Tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use windrelay::connection::{ConnectionManager, LinkConfig};
//! use windrelay::producer::{Producer, ProducerConfig};
//! use windrelay::source::open_source;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = open_source("samples.jsonl")?;
//!     let mut link = ConnectionManager::new(LinkConfig::new("ws://localhost:15064/ws"));
//!     link.connect().await?;
//!
//!     let stats = Producer::new(ProducerConfig::default())
//!         .run(source, &mut link, CancellationToken::new())
//!         .await?;
//!     println!("{}", stats);
//!
//!     link.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod logging;
pub mod producer;
pub mod record;
pub mod server;
pub mod source;
pub mod wire;

// Re-export top-level types for convenience
pub use record::{normalize, RawSample, Record, MAX_CHANNELS, STALE_TIMESTAMP_THRESHOLD};

pub use source::{open_source, BufferSelector, IterSource, JsonLinesSource, SampleSource, SourceError};

pub use producer::{Pacing, Producer, ProducerConfig, ProducerError, ProducerStats, RecordSink};

pub use connection::{ConnectionError, ConnectionManager, ConnectionState, LinkConfig, RetryPolicy};

pub use wire::Envelope;

pub use server::{build_router, serve, AppState, HubSink, ServerConfig, ServerError, SubscriberHub};

pub use config::Config;
