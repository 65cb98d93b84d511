//! Error taxonomy for a provisioning run.
//!
//! Most functions return `anyhow::Result` and attach context as they go. The
//! variants below are raised inside those results whenever a caller needs to
//! tell failure kinds apart, and can be recovered with
//! `err.downcast_ref::<ProvisionError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required configuration key is absent from the store.
    #[error("missing required configuration key `{0}`")]
    MissingKey(String),

    #[error("configuration key `{key}` has invalid value `{value}`: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unrecognised configuration key `{0}`")]
    UnknownKey(String),

    #[error("serial file {path:?} does not hold a hexadecimal serial: {content:?}")]
    MalformedSerial { path: PathBuf, content: String },

    #[error("serial numbers exhausted after {last:#x}")]
    SerialExhausted { last: u64 },

    #[error("invalid xpath `{xpath}`: {reason}")]
    InvalidXPath { xpath: String, reason: String },

    #[error("xpath `{xpath}` matched no element in {path:?}")]
    XPathNoMatch { path: PathBuf, xpath: String },

    #[error("xpath `{xpath}` matched {count} nodes in {path:?}, exactly one element is required")]
    XPathAmbiguous {
        path: PathBuf,
        xpath: String,
        count: usize,
    },

    #[error("xpath `{xpath}` in {path:?} selects a node that is not an element")]
    XPathTargetNotElement { path: PathBuf, xpath: String },

    /// The run failed and persisting the serial counter afterwards failed too.
    #[error("{primary:#}; additionally failed to persist the serial counter: {flush:#}")]
    FinalizeFailed {
        primary: anyhow::Error,
        flush: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_failed_reports_both_errors() {
        let err = ProvisionError::FinalizeFailed {
            primary: anyhow::anyhow!("signing exploded"),
            flush: anyhow::anyhow!("disk full"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("signing exploded"));
        assert!(rendered.contains("disk full"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = ProvisionError::MissingKey("GCID".to_string()).into();
        let err = err.context("Failed to build manifest");
        match err.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::MissingKey(key)) => assert_eq!(key, "GCID"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
