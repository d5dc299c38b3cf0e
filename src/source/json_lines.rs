//! JSON-lines sample bridge
//!
//! Reads one raw sample per line. This is how an external device reader
//! (the vendor SDK wrapper) hands buffers to the relay:
//!
//! ```text
//! [[12.5, 1.0, 2.0, 3.0]]
//! {"buffers": [[[13.0, 1.1, 2.1, 3.1]]]}
//! null
//! []
//! ```
//!
//! See [`RawSample::from_json`] for the value mapping.

use std::io::BufRead;

use super::{SampleSource, SourceError};
use crate::record::RawSample;

/// Raw samples decoded from newline-delimited JSON
pub struct JsonLinesSource<R> {
    reader: R,
    line: String,
    line_number: u64,
}

impl<R: BufRead + Send + 'static> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_number: 0,
        }
    }
}

impl<R: BufRead + Send + 'static> SampleSource for JsonLinesSource<R> {
    fn next_sample(&mut self) -> Result<Option<RawSample>, SourceError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }

            // A bad line is one bad sample, not a broken session
            let sample = match serde_json::from_str::<serde_json::Value>(text) {
                Ok(value) => RawSample::from_json(&value).unwrap_or_else(|| {
                    tracing::warn!(line = self.line_number, "Unsupported sample value");
                    RawSample::Absent
                }),
                Err(e) => {
                    tracing::warn!(line = self.line_number, error = %e, "Invalid sample JSON");
                    RawSample::Absent
                }
            };
            return Ok(Some(sample));
        }
    }
}
