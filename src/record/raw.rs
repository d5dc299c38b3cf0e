//! Raw acquisition samples
//!
//! A `RawSample` is whatever the device collaborator yields for one
//! acquisition cycle. Only a handful of shapes are meaningful; everything
//! else is rejected by the normalizer.

use ndarray::{ArrayD, IxDyn};
use serde_json::Value;

/// One buffer read from the acquisition device
#[derive(Debug, Clone, PartialEq)]
pub enum RawSample {
    /// The device returned nothing for this cycle
    Absent,
    /// A container of values (usually a single wrapped block)
    List(Vec<RawSample>),
    /// An n-dimensional numeric block
    Block(ArrayD<f64>),
    /// A bare number
    Scalar(f64),
}

impl RawSample {
    /// A container holding exactly one block, the usual device shape
    pub fn wrapped(block: ArrayD<f64>) -> Self {
        RawSample::List(vec![RawSample::Block(block)])
    }

    /// Convert a decoded JSON value into a raw sample
    ///
    /// - `null` is an absent sample
    /// - a number is a scalar
    /// - a rectangular numeric array (at any depth) is a block
    /// - any other array is a container of converted elements
    /// - `{"buffers": [...]}` is a container of converted elements, which
    ///   lets a bridge express the device's "list wrapping a block" shape
    ///
    /// Returns `None` for strings, booleans and other objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(RawSample::Absent),
            Value::Number(n) => n.as_f64().map(RawSample::Scalar),
            Value::Array(items) if items.is_empty() => Some(RawSample::List(Vec::new())),
            Value::Array(items) => match block_from_json(value) {
                Some(block) => Some(RawSample::Block(block)),
                None => items
                    .iter()
                    .map(RawSample::from_json)
                    .collect::<Option<Vec<_>>>()
                    .map(RawSample::List),
            },
            Value::Object(map) => match map.get("buffers") {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(RawSample::from_json)
                    .collect::<Option<Vec<_>>>()
                    .map(RawSample::List),
                _ => None,
            },
            Value::String(_) | Value::Bool(_) => None,
        }
    }
}

impl From<ArrayD<f64>> for RawSample {
    fn from(block: ArrayD<f64>) -> Self {
        RawSample::Block(block)
    }
}

/// Build a block from a nested JSON array, if it is rectangular and numeric
fn block_from_json(value: &Value) -> Option<ArrayD<f64>> {
    let shape = json_shape(value)?;
    let mut data = Vec::with_capacity(shape.iter().product());
    flatten_into(value, &mut data)?;
    ArrayD::from_shape_vec(IxDyn(&shape), data).ok()
}

fn json_shape(value: &Value) -> Option<Vec<usize>> {
    match value {
        Value::Number(_) => Some(Vec::new()),
        Value::Array(items) => {
            let Some(first) = items.first() else {
                return Some(vec![0]);
            };
            let inner = json_shape(first)?;
            for item in &items[1..] {
                if json_shape(item)? != inner {
                    return None;
                }
            }
            let mut shape = Vec::with_capacity(inner.len() + 1);
            shape.push(items.len());
            shape.extend(inner);
            Some(shape)
        }
        _ => None,
    }
}

fn flatten_into(value: &Value, out: &mut Vec<f64>) -> Option<()> {
    match value {
        Value::Number(n) => {
            out.push(n.as_f64()?);
            Some(())
        }
        Value::Array(items) => items.iter().try_for_each(|item| flatten_into(item, out)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_is_absent() {
        assert_eq!(RawSample::from_json(&json!(null)), Some(RawSample::Absent));
    }

    #[test]
    fn test_empty_array_is_empty_list() {
        assert_eq!(
            RawSample::from_json(&json!([])),
            Some(RawSample::List(vec![]))
        );
    }

    #[test]
    fn test_rectangular_array_is_block() {
        let sample = RawSample::from_json(&json!([[12.5, 1.0, 2.0, 3.0]])).unwrap();
        match sample {
            RawSample::Block(block) => {
                assert_eq!(block.shape(), &[1, 4]);
                assert_eq!(block[[0, 0]], 12.5);
            }
            other => panic!("Expected Block, got {:?}", other),
        }
    }

    #[test]
    fn test_ragged_array_is_list() {
        let sample = RawSample::from_json(&json!([[1.0, 2.0], [3.0]])).unwrap();
        match sample {
            RawSample::List(items) => assert_eq!(items.len(), 2),
            other => panic!("Expected List, got {:?}", other),
        }
    }

    #[test]
    fn test_buffers_object_wraps_blocks() {
        let sample = RawSample::from_json(&json!({"buffers": [[[1.0, 2.0]]]})).unwrap();
        match sample {
            RawSample::List(items) => {
                assert_eq!(items.len(), 1);
                assert!(matches!(items[0], RawSample::Block(_)));
            }
            other => panic!("Expected List, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_values() {
        assert!(RawSample::from_json(&json!("text")).is_none());
        assert!(RawSample::from_json(&json!(true)).is_none());
        assert!(RawSample::from_json(&json!({"other": 1})).is_none());
        assert!(RawSample::from_json(&json!([1.0, "x"])).is_none());
    }
}
