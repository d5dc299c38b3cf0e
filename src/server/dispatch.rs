//! Event Dispatch
//!
//! Incoming envelopes are routed by event name to a handler. Each handler
//! receives the per-connection [`ConnectionContext`] and the raw payload.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

use super::hub::{SubscriberHub, SubscriberId};
use crate::record::Record;
use crate::wire::{Envelope, StatusMessage, CLIENT_STATUS_EVENT};

/// Channels included in the per-record debug log
const PREVIEW_CHANNELS: usize = 5;

/// Everything a handler knows about the connection an event arrived on
pub struct ConnectionContext {
    pub subscriber_id: SubscriberId,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    pub hub: Arc<SubscriberHub>,
    /// Event name records are relayed under
    pub data_event: String,
}

/// An event handler
pub type Handler =
    for<'a> fn(&'a ConnectionContext, Value) -> BoxFuture<'a, Result<(), DispatchError>>;

/// Maps event names to handlers
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Handler>,
}

impl DispatchTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The relay's handlers: `client_status` and the given data event
    pub fn relay(data_event: &str) -> Self {
        Self::new()
            .on(CLIENT_STATUS_EVENT, handle_client_status)
            .on(data_event, handle_data)
    }

    /// Register (or replace) the handler for an event
    pub fn on(mut self, event: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(event.into(), handler);
        self
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Route an envelope to its handler
    ///
    /// Returns `Ok(false)` when no handler is registered for the event.
    pub async fn dispatch(
        &self,
        ctx: &ConnectionContext,
        envelope: Envelope,
    ) -> Result<bool, DispatchError> {
        match self.handlers.get(&envelope.event) {
            Some(handler) => {
                handler(ctx, envelope.data).await?;
                Ok(true)
            }
            None => {
                tracing::debug!(
                    subscriber_id = %ctx.subscriber_id,
                    event = %envelope.event,
                    "No handler for event"
                );
                Ok(false)
            }
        }
    }
}

fn handle_client_status(
    ctx: &ConnectionContext,
    data: Value,
) -> BoxFuture<'_, Result<(), DispatchError>> {
    Box::pin(async move {
        let status: StatusMessage = serde_json::from_value(data)
            .map_err(|e| DispatchError::invalid(CLIENT_STATUS_EVENT, e))?;
        tracing::info!(
            subscriber_id = %ctx.subscriber_id,
            message = %status.message,
            "Client status"
        );
        Ok(())
    })
}

fn handle_data(ctx: &ConnectionContext, data: Value) -> BoxFuture<'_, Result<(), DispatchError>> {
    Box::pin(async move {
        let record: Record =
            serde_json::from_value(data).map_err(|e| DispatchError::invalid(&ctx.data_event, e))?;

        tracing::debug!(
            subscriber_id = %ctx.subscriber_id,
            timestamp = record.timestamp,
            channels = record.channels.len(),
            preview = ?record.preview(PREVIEW_CHANNELS),
            "Data received"
        );

        let delivered = ctx
            .hub
            .publish_record(&ctx.data_event, &record, Some(&ctx.subscriber_id))
            .await;
        tracing::trace!(subscribers = delivered, "Relayed record");
        Ok(())
    })
}

/// Errors raised while handling an event
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid {event} payload: {reason}")]
    InvalidPayload { event: String, reason: String },
}

impl DispatchError {
    fn invalid(event: &str, error: serde_json::Error) -> Self {
        DispatchError::InvalidPayload {
            event: event.to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::hub::{Frame, HubConfig};
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn context(hub: &Arc<SubscriberHub>) -> (ConnectionContext, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(16);
        let id = hub.register(None, tx).await.unwrap();
        let ctx = ConnectionContext {
            subscriber_id: id,
            peer: None,
            connected_at: Utc::now(),
            hub: Arc::clone(hub),
            data_event: "wind_turbine_buffer".to_string(),
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_data_relayed_to_others_only() {
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let (producer, mut producer_rx) = context(&hub).await;
        let (_dashboard, mut dashboard_rx) = context(&hub).await;
        let table = DispatchTable::relay("wind_turbine_buffer");

        let envelope = Envelope::new(
            "wind_turbine_buffer",
            json!({"timestamp": 3.5, "channels": [1.0, 2.0]}),
        );
        assert!(table.dispatch(&producer, envelope).await.unwrap());

        let frame = dashboard_rx.try_recv().unwrap();
        let relayed = Envelope::decode(&frame).unwrap();
        assert_eq!(relayed.event, "wind_turbine_buffer");
        assert_eq!(relayed.to_record().unwrap(), Record::new(3.5, vec![1.0, 2.0]));
        assert!(producer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relayed_record_is_truncated() {
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let (producer, _producer_rx) = context(&hub).await;
        let (_dashboard, mut dashboard_rx) = context(&hub).await;
        let table = DispatchTable::relay("wind_turbine_buffer");

        let channels: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let envelope = Envelope::new(
            "wind_turbine_buffer",
            json!({"timestamp": 1.0, "channels": channels}),
        );
        table.dispatch(&producer, envelope).await.unwrap();

        let record = Envelope::decode(&dashboard_rx.try_recv().unwrap())
            .unwrap()
            .to_record()
            .unwrap();
        assert_eq!(record.channels.len(), 43);
    }

    #[tokio::test]
    async fn test_timestamp_only_payload_relayed() {
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let (producer, _producer_rx) = context(&hub).await;
        let (_dashboard, mut dashboard_rx) = context(&hub).await;
        let table = DispatchTable::relay("data");

        let envelope = Envelope::new("data", json!({"timestamp": 4.0}));
        table.dispatch(&producer, envelope).await.unwrap();

        let record = Envelope::decode(&dashboard_rx.try_recv().unwrap())
            .unwrap()
            .to_record()
            .unwrap();
        assert_eq!(record, Record::new(4.0, vec![]));
    }

    #[tokio::test]
    async fn test_null_channel_relayed() {
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let (producer, _producer_rx) = context(&hub).await;
        let (_dashboard, mut dashboard_rx) = context(&hub).await;
        let table = DispatchTable::relay("data");

        let envelope = Envelope::new("data", json!({"timestamp": 2.0, "channels": [1.0, null]}));
        table.dispatch(&producer, envelope).await.unwrap();

        let frame = dashboard_rx.try_recv().unwrap();
        assert!(frame.contains("[1.0,null]"));
        assert_eq!(hub.records_relayed(), 1);
    }

    #[tokio::test]
    async fn test_client_status_not_forwarded() {
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let (producer, _producer_rx) = context(&hub).await;
        let (_dashboard, mut dashboard_rx) = context(&hub).await;
        let table = DispatchTable::relay("data");

        let handled = table
            .dispatch(&producer, Envelope::client_status("client connected"))
            .await
            .unwrap();
        assert!(handled);
        assert!(dashboard_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_event_ignored() {
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let (ctx, _rx) = context(&hub).await;
        let table = DispatchTable::relay("data");

        let handled = table
            .dispatch(&ctx, Envelope::new("telemetry", json!({})))
            .await
            .unwrap();
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_error() {
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let (ctx, _rx) = context(&hub).await;
        let table = DispatchTable::relay("data");

        let result = table
            .dispatch(&ctx, Envelope::new("data", json!({"channels": "nope"})))
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidPayload { .. })));
        assert_eq!(hub.records_relayed(), 0);
    }

    #[test]
    fn test_custom_handler_registration() {
        fn noop(_: &ConnectionContext, _: Value) -> BoxFuture<'_, Result<(), DispatchError>> {
            Box::pin(async { Ok(()) })
        }

        let table = DispatchTable::new().on("ping", noop);
        assert!(table.handles("ping"));
        assert!(!table.handles("data"));
    }
}
