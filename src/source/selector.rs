//! Acquisition buffer selection
//!
//! A buffer is addressed either by its UUID (workstation deployments) or by
//! its position on the controller.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Which acquisition buffer to stream from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSelector {
    /// Buffer identified by UUID
    Uuid(Uuid),
    /// Buffer identified by controller index
    Index(u32),
}

impl Default for BufferSelector {
    fn default() -> Self {
        BufferSelector::Index(0)
    }
}

impl FromStr for BufferSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = Uuid::parse_str(s) {
            return Ok(BufferSelector::Uuid(id));
        }
        s.parse::<u32>()
            .map(BufferSelector::Index)
            .map_err(|_| SelectorError(s.to_string()))
    }
}

impl fmt::Display for BufferSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferSelector::Uuid(id) => write!(f, "{}", id),
            BufferSelector::Index(i) => write!(f, "#{}", i),
        }
    }
}

/// The selector was neither a UUID nor a buffer index
#[derive(Debug, Error)]
#[error("Invalid buffer selector {0:?}: expected a UUID or a buffer index")]
pub struct SelectorError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index() {
        assert_eq!("0".parse::<BufferSelector>().unwrap(), BufferSelector::Index(0));
        assert_eq!(" 3 ".parse::<BufferSelector>().unwrap(), BufferSelector::Index(3));
    }

    #[test]
    fn test_parse_uuid() {
        let text = "6f1c2a8e-3b4d-4e5f-9a0b-1c2d3e4f5a6b";
        match text.parse::<BufferSelector>().unwrap() {
            BufferSelector::Uuid(id) => assert_eq!(id.to_string(), text),
            other => panic!("Expected Uuid, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_invalid() {
        assert!("buffer-a".parse::<BufferSelector>().is_err());
        assert!("-1".parse::<BufferSelector>().is_err());
    }

    #[test]
    fn test_default_is_first_buffer() {
        assert_eq!(BufferSelector::default(), BufferSelector::Index(0));
        assert_eq!(BufferSelector::default().to_string(), "#0");
    }
}
