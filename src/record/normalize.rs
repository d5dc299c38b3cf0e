//! Record normalizer
//!
//! Converts one raw acquisition buffer into a [`Record`], or nothing.
//!
//! Rules:
//! - absent samples, empty containers and empty blocks produce nothing
//! - a container holding exactly one block is unwrapped; a bare block is
//!   used directly; every other shape is rejected
//! - a 2-D block with a single row is flattened to 1-D
//! - the first entry along the outer axis is the timestamp (a sub-block
//!   collapses to its only value, or to the mean of its values)
//! - everything after it is flattened row-major into the channels and
//!   truncated to [`MAX_CHANNELS`]

use ndarray::{ArrayViewD, Axis, Slice};

use super::raw::RawSample;
use super::types::{Record, MAX_CHANNELS};

/// Normalize one raw sample
///
/// Never panics; any shape that cannot be coerced yields `None`.
pub fn normalize(raw: &RawSample) -> Option<Record> {
    let block = extract_block(raw)?;
    if block.is_empty() {
        return None;
    }

    let block = if block.ndim() == 2 && block.shape()[0] == 1 {
        block.index_axis_move(Axis(0), 0)
    } else {
        block
    };

    // A 0-d block has no outer axis to index
    if block.ndim() == 0 {
        return None;
    }

    let head = block.index_axis(Axis(0), 0);
    let timestamp = match head.len() {
        0 => return None,
        1 => *head.iter().next()?,
        _ => head.mean()?,
    };

    let channels: Vec<f64> = block
        .slice_axis(Axis(0), Slice::from(1usize..))
        .iter()
        .take(MAX_CHANNELS)
        .copied()
        .collect();

    Some(Record::new(timestamp, channels))
}

fn extract_block(raw: &RawSample) -> Option<ArrayViewD<'_, f64>> {
    match raw {
        RawSample::Block(block) => Some(block.view()),
        RawSample::List(items) => match items.as_slice() {
            [RawSample::Block(block)] => Some(block.view()),
            _ => None,
        },
        RawSample::Absent | RawSample::Scalar(_) => None,
    }
}
