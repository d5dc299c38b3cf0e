//! Embedded Stream Lifecycle
//!
//! When the server is given its own sample source it runs the producer
//! in-process, publishing straight into the hub. The stream is started at
//! boot and re-checked on every subscriber connect; it is started at most
//! once per process.

use std::sync::{Arc, Mutex, OnceLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::hub::{HubSink, SubscriberHub};
use crate::producer::{Producer, ProducerConfig};
use crate::source::SampleSource;

/// Start-once guard for a background stream task
#[derive(Default)]
pub struct StreamLifecycle {
    handle: OnceLock<JoinHandle<()>>,
}

impl StreamLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start` unless a stream has already been started
    ///
    /// Returns true if this call started it. Concurrent callers race on a
    /// single slot, so `start` runs at most once.
    pub fn ensure_started<F>(&self, start: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut started = false;
        self.handle.get_or_init(|| {
            started = true;
            start()
        });
        started
    }

    pub fn is_started(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Started and not yet finished
    pub fn is_running(&self) -> bool {
        self.handle.get().map_or(false, |handle| !handle.is_finished())
    }
}

/// A producer that runs inside the server process
pub struct EmbeddedFeed {
    source: Mutex<Option<Box<dyn SampleSource>>>,
    config: ProducerConfig,
    hub: Arc<SubscriberHub>,
    data_event: String,
    cancel: CancellationToken,
}

impl EmbeddedFeed {
    pub fn new(
        source: Box<dyn SampleSource>,
        config: ProducerConfig,
        hub: Arc<SubscriberHub>,
        data_event: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source: Mutex::new(Some(source)),
            config,
            hub,
            data_event: data_event.into(),
            cancel,
        }
    }

    /// Spawn the producer task; the source can only be consumed once
    pub fn spawn(&self) -> JoinHandle<()> {
        let source = self
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(source) = source else {
            tracing::warn!("Embedded stream source already consumed");
            return tokio::spawn(async {});
        };

        let producer = Producer::new(self.config.clone());
        let mut sink = HubSink::new(Arc::clone(&self.hub), self.data_event.clone());
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tracing::info!("Embedded stream started");
            match producer.run(source, &mut sink, cancel).await {
                Ok(stats) => tracing::info!(%stats, "Embedded stream finished"),
                Err(e) => tracing::error!(error = %e, "Embedded stream failed"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::Pacing;
    use crate::record::RawSample;
    use crate::server::hub::HubConfig;
    use crate::source::IterSource;
    use crate::wire::Envelope;
    use ndarray::ArrayD;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_ensure_started_runs_once() {
        let lifecycle = StreamLifecycle::new();
        let starts = AtomicUsize::new(0);
        let start = || {
            starts.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(std::future::pending::<()>())
        };

        assert!(!lifecycle.is_started());
        assert!(lifecycle.ensure_started(start));
        assert!(!lifecycle.ensure_started(start));
        assert!(!lifecycle.ensure_started(start));

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_running());
    }

    #[tokio::test]
    async fn test_finished_stream_is_not_restarted() {
        let lifecycle = StreamLifecycle::new();
        lifecycle.ensure_started(|| tokio::spawn(async {}));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(lifecycle.is_started());
        assert!(!lifecycle.is_running());
        assert!(!lifecycle.ensure_started(|| tokio::spawn(async {})));
    }

    #[tokio::test]
    async fn test_embedded_feed_publishes_to_hub() {
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let (tx, mut rx) = mpsc::channel(16);
        hub.register(None, tx).await.unwrap();

        let samples = vec![
            RawSample::wrapped(ArrayD::from_shape_vec(vec![3], vec![10.0, 1.0, 2.0]).unwrap()),
            RawSample::Absent,
            RawSample::wrapped(ArrayD::from_shape_vec(vec![2], vec![50_000.0, 1.0]).unwrap()),
        ];
        let feed = EmbeddedFeed::new(
            Box::new(IterSource::new(samples)),
            ProducerConfig {
                pacing: Pacing::Unpaced,
                ..Default::default()
            },
            Arc::clone(&hub),
            "data",
            CancellationToken::new(),
        );

        feed.spawn().await.unwrap();

        let record = Envelope::decode(&rx.recv().await.unwrap())
            .unwrap()
            .to_record()
            .unwrap();
        assert_eq!(record.timestamp, 10.0);
        assert_eq!(record.channels, vec![1.0, 2.0]);
        assert!(rx.try_recv().is_err());

        // Second spawn finds the source gone
        feed.spawn().await.unwrap();
        assert_eq!(hub.records_relayed(), 1);
    }
}
