//! Sample Sources
//!
//! The acquisition device is an external collaborator. The producer only
//! depends on the [`SampleSource`] pull contract defined here; the vendor
//! SDK (or a bridge process wrapping it) sits behind it.
//!
//! Bundled implementations:
//! - [`IterSource`]: adapts any in-memory iterator (tests, replays)
//! - [`JsonLinesSource`]: one raw sample per JSON line, from a file or stdin

mod json_lines;
mod selector;

pub use json_lines::JsonLinesSource;
pub use selector::{BufferSelector, SelectorError};

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use thiserror::Error;

use crate::record::RawSample;

/// Blocking, pull-based source of raw samples
///
/// `Ok(None)` marks the end of the stream. An `Err` means the acquisition
/// session itself is broken and no further samples can be produced.
pub trait SampleSource: Send + 'static {
    /// Pull the next raw sample, blocking until one is available
    fn next_sample(&mut self) -> Result<Option<RawSample>, SourceError>;
}

/// Adapts an iterator of raw samples into a [`SampleSource`]
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = RawSample> + Send + 'static,
{
    pub fn new(inner: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            inner: inner.into_iter(),
        }
    }
}

impl<I> SampleSource for IterSource<I>
where
    I: Iterator<Item = RawSample> + Send + 'static,
{
    fn next_sample(&mut self) -> Result<Option<RawSample>, SourceError> {
        Ok(self.inner.next())
    }
}

impl SampleSource for Box<dyn SampleSource> {
    fn next_sample(&mut self) -> Result<Option<RawSample>, SourceError> {
        (**self).next_sample()
    }
}

/// Open a JSON-lines sample source
///
/// `-` reads from stdin, anything else is treated as a file path.
pub fn open_source(input: &str) -> Result<Box<dyn SampleSource>, SourceError> {
    if input == "-" {
        tracing::info!("Reading raw samples from stdin");
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(io::stdin()));
        return Ok(Box::new(JsonLinesSource::new(reader)));
    }

    let file = File::open(input).map_err(|e| SourceError::Open {
        path: PathBuf::from(input),
        error: e.to_string(),
    })?;
    tracing::info!(path = %input, "Reading raw samples from file");
    let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(file));
    Ok(Box::new(JsonLinesSource::new(reader)))
}

/// Errors raised by sample sources
///
/// All of these are fatal for the acquisition session.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened
    #[error("Failed to open sample source {path:?}: {error}")]
    Open { path: PathBuf, error: String },

    /// Reading from an open source failed
    #[error("Sample source read error: {0}")]
    Io(#[from] io::Error),

    /// The acquisition device reported a session failure
    #[error("Acquisition session error: {0}")]
    Session(String),
}
