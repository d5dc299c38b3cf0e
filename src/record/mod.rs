//! Telemetry Records
//!
//! Canonical record shape and the normalizer that produces it from raw
//! acquisition buffers.
//!
//! ## Architecture
//!
//! - **RawSample**: One buffer read from the acquisition device (absent,
//!   container, numeric block, or scalar)
//! - **normalize**: RawSample → Record, or nothing
//! - **Record**: `{timestamp, channels[..=43]}`, the unit sent over the wire
//!
//! ## Example
//!
//! ```rust
//! use ndarray::{arr2, ArrayD};
//! use windrelay::record::{normalize, RawSample};
//!
//! let block: ArrayD<f64> = arr2(&[[12.5, 1.0, 2.0, 3.0]]).into_dyn();
//! let record = normalize(&RawSample::wrapped(block)).unwrap();
//!
//! assert_eq!(record.timestamp, 12.5);
//! assert_eq!(record.channels, vec![1.0, 2.0, 3.0]);
//! ```

mod normalize;
mod raw;
mod types;

pub use normalize::normalize;
pub use raw::RawSample;
pub use types::{Record, MAX_CHANNELS, STALE_TIMESTAMP_THRESHOLD};
