//! Error taxonomy of the hardware layer.
//!
//! Hardware failures carry the SDK code and a context string. Table-full
//! codes are lifted into [`HalError::ResourceExhausted`] so the state-update
//! layer can reject a config change instead of crashing. Refcount misuse and
//! duplicate counters are programming errors upstream and fail the whole
//! state-delta batch.
//!
//! Warm-boot verification mismatches and teardown failures are not errors:
//! they go through [`fatal`], which logs, audits and panics.

use std::fmt;

use bcm_hal_common::RefCountError;
use bcm_sdk::BcmError;
use thiserror::Error;

use crate::audit::{AuditCategory, AuditRecord};
use crate::{audit_log, error_log};

pub type HalResult<T> = std::result::Result<T, HalError>;

#[derive(Debug, Error)]
pub enum HalError {
    #[error("hardware call failed: {0}")]
    Hardware(BcmError),

    #[error("{resource} exhausted: {source}")]
    ResourceExhausted {
        resource: &'static str,
        #[source]
        source: BcmError,
    },

    #[error("{resource} refcount misuse for {key}: {source}")]
    RefCount {
        resource: &'static str,
        key: String,
        #[source]
        source: RefCountError,
    },

    #[error("stat not found: {0}")]
    StatNotFound(String),

    #[error("counter already registered for stat handle {0}")]
    DuplicateStat(String),

    #[error("no counter registered for stat handle {0}")]
    MissingStat(String),

    #[error("{kind} not found: {id}")]
    ObjectNotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    ObjectExists { kind: &'static str, id: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("warm boot state: {0}")]
    WarmBootState(String),
}

impl HalError {
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        HalError::ObjectNotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn exists(kind: &'static str, id: impl fmt::Display) -> Self {
        HalError::ObjectExists {
            kind,
            id: id.to_string(),
        }
    }

    pub fn refcount(resource: &'static str, key: impl fmt::Display, source: RefCountError) -> Self {
        HalError::RefCount {
            resource,
            key: key.to_string(),
            source,
        }
    }

    /// Classifies a hardware error raised while allocating `resource`.
    pub fn from_bcm(resource: &'static str, err: BcmError) -> Self {
        if err.is_resource_exhausted() {
            HalError::ResourceExhausted {
                resource,
                source: err,
            }
        } else {
            HalError::Hardware(err)
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, HalError::ResourceExhausted { .. })
    }
}

impl From<BcmError> for HalError {
    fn from(err: BcmError) -> Self {
        HalError::from_bcm("hardware table", err)
    }
}

impl From<std::io::Error> for HalError {
    fn from(err: std::io::Error) -> Self {
        HalError::WarmBootState(err.to_string())
    }
}

impl From<serde_json::Error> for HalError {
    fn from(err: serde_json::Error) -> Self {
        HalError::WarmBootState(err.to_string())
    }
}

/// Logs and audits an unrecoverable condition, then panics.
pub fn fatal(source: &'static str, message: impl fmt::Display) -> ! {
    let message = message.to_string();
    error_log!(source, "FATAL: {}", message);
    audit_log!(
        AuditRecord::new(AuditCategory::ErrorCondition, source, "fatal").with_error(&message)
    );
    panic!("{}: {}", source, message);
}

/// Teardown paths cannot unwind a half-released resource, so any hardware
/// failure there is fatal.
pub fn check_fatal<T>(source: &'static str, result: Result<T, BcmError>, what: impl fmt::Display) -> T {
    match result {
        Ok(value) => value,
        Err(err) => fatal(source, format!("{}: {}", what, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcm_sdk::BcmStatus;

    #[test]
    fn test_full_table_is_resource_exhausted() {
        let err = HalError::from(BcmError::new(BcmStatus::Full, "create stat"));
        assert!(err.is_resource_exhausted());

        let err = HalError::from(BcmError::new(BcmStatus::Param, "create stat"));
        assert!(!err.is_resource_exhausted());
        assert!(matches!(err, HalError::Hardware(_)));
    }

    #[test]
    fn test_refcount_error_display() {
        let err = HalError::refcount("acl stat", "stat0", RefCountError::KeyNotFound);
        assert_eq!(
            err.to_string(),
            "acl stat refcount misuse for stat0: key not found"
        );
    }

    #[test]
    #[should_panic(expected = "AclEntry: warm boot mismatch")]
    fn test_fatal_panics() {
        fatal("AclEntry", "warm boot mismatch");
    }
}
