//! Broadcast Server
//!
//! Accepts WebSocket connections from producers and dashboards and relays
//! every data event to all other connected clients.
//!
//! # Endpoints
//!
//! - `GET /ws` - WebSocket connection (producers and subscribers)
//! - `GET /health` - Relay status
//! - `GET /health/live` - Liveness check
//!
//! # Example
//!
//! ```rust,ignore
//! use windrelay::server::{serve, AppState, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     serve(AppState::new(config.clone()), &config).await?;
//!     Ok(())
//! }
//! ```

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod health;
pub mod hub;
pub mod lifecycle;
pub mod state;

pub use dispatch::{ConnectionContext, DispatchError, DispatchTable, Handler};
pub use error::ServerError;
pub use handler::{websocket_handler, CONNECTED_MESSAGE};
pub use hub::{HubConfig, HubError, HubSink, SubscriberHub, SubscriberId, SubscriberInfo};
pub use lifecycle::{EmbeddedFeed, StreamLifecycle};
pub use state::{AppState, ServerConfig};

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/live", get(health::liveness))
        .route("/", get(health::full_health));

    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Start the broadcast server and run until Ctrl-C or SIGTERM
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<(), ServerError> {
    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("windrelay server listening on {}", addr);

    serve_with_shutdown(listener, state, shutdown_signal()).await?;

    tracing::info!("windrelay server shut down gracefully");
    Ok(())
}

/// Serve on an already bound listener until `shutdown` resolves
///
/// Open WebSocket connections and the embedded stream are stopped when
/// `shutdown` fires.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if state.ensure_stream_started() {
        tracing::info!("Embedded stream started at boot");
    }

    let token = state.shutdown.clone();
    let signal = async move {
        shutdown.await;
        token.cancel();
    };

    let router = build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))
}

/// Wait for shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, LinkConfig, RetryPolicy};
    use crate::record::Record;
    use crate::wire::Envelope;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn create_test_app() -> Router {
        build_router(AppState::new(ServerConfig::default()))
    }

    async fn start_server(config: ServerConfig) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = CancellationToken::new();
        let token = stop.clone();
        let server = tokio::spawn(async move {
            serve_with_shutdown(listener, AppState::new(config), async move {
                token.cancelled().await
            })
            .await
            .unwrap();
        });
        (addr, stop, server)
    }

    async fn next_envelope(ws: &mut Client) -> Envelope {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = message {
                return Envelope::decode(&text).unwrap();
            }
        }
    }

    async fn subscribe(addr: SocketAddr) -> Client {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        let ack = next_envelope(&mut ws).await;
        assert_eq!(ack.event, "status");
        assert_eq!(ack.to_status().unwrap().message, CONNECTED_MESSAGE);
        ws
    }

    fn feeder(addr: SocketAddr, data_event: &str) -> ConnectionManager {
        ConnectionManager::new(LinkConfig {
            url: format!("ws://{}/ws", addr),
            data_event: data_event.to_string(),
            retry: RetryPolicy::bounded(3, Duration::from_millis(20)),
        })
    }

    #[tokio::test]
    async fn test_health_live() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let app = create_test_app();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: health::HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.subscribers, 0);
        assert_eq!(health.records_relayed, 0);
        assert!(!health.stream_running);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let app = create_test_app();

        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_producer_to_dashboard_relay() {
        let config = ServerConfig {
            data_event: "wind_turbine_buffer".to_string(),
            ..ServerConfig::new("127.0.0.1", 0)
        };
        let (addr, stop, server) = start_server(config).await;

        let mut dashboard = subscribe(addr).await;
        let mut producer = feeder(addr, "wind_turbine_buffer");
        producer.connect().await.unwrap();

        let record = Record::new(12.5, vec![1.0, 2.0, 3.0]);
        producer.send(&record).await.unwrap();

        let relayed = next_envelope(&mut dashboard).await;
        assert_eq!(relayed.event, "wind_turbine_buffer");
        assert_eq!(relayed.to_record().unwrap(), record);

        producer.disconnect().await;
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_fan_out_survives_subscriber_disconnect() {
        let (addr, stop, server) = start_server(ServerConfig::new("127.0.0.1", 0)).await;

        let dashboard_a = subscribe(addr).await;
        let mut dashboard_b = subscribe(addr).await;
        let mut producer = feeder(addr, "data");
        producer.connect().await.unwrap();

        drop(dashboard_a);

        for i in 0..3 {
            producer
                .send(&Record::new(i as f64, vec![i as f64]))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let record = next_envelope(&mut dashboard_b).await.to_record().unwrap();
            assert_eq!(record.timestamp, i as f64);
        }

        producer.disconnect().await;
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_new_records() {
        let (addr, stop, server) = start_server(ServerConfig::new("127.0.0.1", 0)).await;

        let mut early = subscribe(addr).await;
        let mut producer = feeder(addr, "data");
        producer.connect().await.unwrap();

        for i in 0..3 {
            producer.send(&Record::new(i as f64, vec![])).await.unwrap();
        }
        for _ in 0..3 {
            next_envelope(&mut early).await;
        }

        let mut late = subscribe(addr).await;
        producer.send(&Record::new(99.0, vec![])).await.unwrap();

        let first = next_envelope(&mut late).await.to_record().unwrap();
        assert_eq!(first.timestamp, 99.0);

        producer.disconnect().await;
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }
}
