//! Rate-Limited Producer Loop
//!
//! Pulls raw samples from a [`SampleSource`], normalizes them, drops stale
//! readings and pushes the rest to a [`RecordSink`].
//!
//! The sample source is blocking, so it is driven from a dedicated pump
//! thread that hands samples over through a single-slot channel. The async
//! loop therefore only suspends while waiting for the next sample and during
//! the pacing delay.
//!
//! Failure policy:
//! - a sample that does not normalize is skipped
//! - a record the sink rejects is logged and dropped
//! - a source error ends the loop with [`ProducerError::Source`]

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::record::{normalize, RawSample, Record};
use crate::source::{SampleSource, SourceError};

/// Destination for normalized records
#[async_trait]
pub trait RecordSink: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Deliver one record (at most once)
    async fn send(&mut self, record: &Record) -> Result<(), Self::Error>;
}

/// Delay applied after every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Emit as fast as the source produces
    Unpaced,
    /// Wait a fixed interval between samples
    Fixed(Duration),
}

impl Pacing {
    /// `0` means unpaced
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Pacing::Unpaced
        } else {
            Pacing::Fixed(Duration::from_millis(ms))
        }
    }
}

/// Producer configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Delay between samples
    pub pacing: Pacing,
    /// Log a progress line every this many samples (0 disables)
    pub log_every: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            pacing: Pacing::Fixed(Duration::from_secs(1)),
            log_every: 500,
        }
    }
}

/// Counters for one producer run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProducerStats {
    /// Samples pulled from the source
    pub samples: u64,
    /// Samples that produced a record
    pub normalized: u64,
    /// Records dropped as stale
    pub stale: u64,
    /// Records accepted by the sink
    pub sent: u64,
    /// Records the sink rejected
    pub send_failures: u64,
    /// Progress lines logged
    pub progress_reports: u64,
}

impl fmt::Display for ProducerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples, {} records, {} stale, {} sent, {} send failures",
            self.samples, self.normalized, self.stale, self.sent, self.send_failures
        )
    }
}

/// Drives samples from a source into a sink
pub struct Producer {
    config: ProducerConfig,
}

impl Producer {
    pub fn new(config: ProducerConfig) -> Self {
        Self { config }
    }

    /// Run until the source ends, `cancel` fires, or the source fails
    pub async fn run<S, K>(
        &self,
        source: S,
        sink: &mut K,
        cancel: CancellationToken,
    ) -> Result<ProducerStats, ProducerError>
    where
        S: SampleSource,
        K: RecordSink + ?Sized,
    {
        let mut samples = spawn_pump(source)?;
        let mut stats = ProducerStats::default();
        let mut failure_streak = 0u64;
        let mut last_record: Option<Record> = None;

        tracing::info!(pacing = ?self.config.pacing, "Producer loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Producer loop cancelled");
                    break;
                }
                next = samples.recv() => next,
            };

            let sample = match next {
                Some(Ok(sample)) => sample,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Sample source failed");
                    return Err(ProducerError::Source(e));
                }
                None => {
                    tracing::info!("Sample source exhausted");
                    break;
                }
            };

            stats.samples += 1;
            if let Some(record) = self
                .handle_sample(&sample, sink, &mut stats, &mut failure_streak)
                .await
            {
                last_record = Some(record);
            }

            if self.config.log_every > 0 && stats.samples % self.config.log_every == 0 {
                log_progress(&mut stats, last_record.as_ref());
            }

            if let Pacing::Fixed(delay) = self.config.pacing {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!("Producer loop cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        tracing::info!(%stats, "Producer loop finished");
        Ok(stats)
    }

    /// Normalize one sample and hand it to the sink
    ///
    /// Returns the record offered to the sink, if any.
    async fn handle_sample<K>(
        &self,
        sample: &RawSample,
        sink: &mut K,
        stats: &mut ProducerStats,
        failure_streak: &mut u64,
    ) -> Option<Record>
    where
        K: RecordSink + ?Sized,
    {
        let Some(record) = normalize(sample) else {
            tracing::debug!(sample = stats.samples, "Sample produced no record");
            return None;
        };
        stats.normalized += 1;

        if record.is_stale() {
            stats.stale += 1;
            tracing::debug!(timestamp = record.timestamp, "Dropping stale record");
            return None;
        }

        match sink.send(&record).await {
            Ok(()) => {
                stats.sent += 1;
                if *failure_streak > 0 {
                    tracing::info!(dropped = *failure_streak, "Record delivery resumed");
                    *failure_streak = 0;
                }
            }
            Err(e) => {
                stats.send_failures += 1;
                *failure_streak += 1;
                if *failure_streak == 1 {
                    tracing::warn!(error = %e, "Failed to send record, dropping");
                } else {
                    tracing::debug!(error = %e, "Failed to send record, dropping");
                }
            }
        }

        Some(record)
    }
}

fn log_progress(stats: &mut ProducerStats, last_record: Option<&Record>) {
    stats.progress_reports += 1;
    match last_record {
        Some(record) => tracing::info!(
            samples = stats.samples,
            sent = stats.sent,
            timestamp = record.timestamp,
            channels = ?record.preview(5),
            "Producer progress"
        ),
        None => tracing::info!(
            samples = stats.samples,
            sent = stats.sent,
            "Producer progress, no records yet"
        ),
    }
}

type PumpItem = Result<RawSample, SourceError>;

/// Start the blocking pump thread feeding samples into the async loop
///
/// The thread exits when the source ends, fails, or the loop drops the
/// receiver. It is detached so a source blocked on I/O never holds up
/// shutdown.
fn spawn_pump<S: SampleSource>(mut source: S) -> Result<mpsc::Receiver<PumpItem>, ProducerError> {
    let (tx, rx) = mpsc::channel::<PumpItem>(1);

    std::thread::Builder::new()
        .name("sample-pump".to_string())
        .spawn(move || loop {
            match source.next_sample() {
                Ok(Some(sample)) => {
                    if tx.blocking_send(Ok(sample)).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            }
        })?;

    Ok(rx)
}

/// Errors that end the producer loop
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The acquisition session broke
    #[error("Sample source error: {0}")]
    Source(#[from] SourceError),

    /// The pump thread could not be started
    #[error("Failed to start sample pump: {0}")]
    Io(#[from] std::io::Error),
}
