//! SDK error types and status handling.
//!
//! Every SDK call returns a raw `int` status. This module turns those codes
//! into [`BcmStatus`] values and wraps failures in [`BcmError`], which
//! carries the code together with the context of the failing call.

use std::fmt;
use thiserror::Error;

/// SDK return codes matching the `BCM_E_*` values of the vendor headers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BcmStatus {
    None = 0,
    Internal = -1,
    Memory = -2,
    Unit = -3,
    Param = -4,
    Empty = -5,
    Full = -6,
    NotFound = -7,
    Exists = -8,
    Timeout = -9,
    Busy = -10,
    Fail = -11,
    Disabled = -12,
    BadId = -13,
    Resource = -14,
    Config = -15,
    Unavail = -16,
    Init = -17,
    Port = -18,
}

impl BcmStatus {
    /// Creates a BcmStatus from a raw return code.
    ///
    /// Unknown negative codes collapse to [`BcmStatus::Internal`].
    pub fn from_raw(rv: i32) -> Self {
        match rv {
            0 => BcmStatus::None,
            -1 => BcmStatus::Internal,
            -2 => BcmStatus::Memory,
            -3 => BcmStatus::Unit,
            -4 => BcmStatus::Param,
            -5 => BcmStatus::Empty,
            -6 => BcmStatus::Full,
            -7 => BcmStatus::NotFound,
            -8 => BcmStatus::Exists,
            -9 => BcmStatus::Timeout,
            -10 => BcmStatus::Busy,
            -11 => BcmStatus::Fail,
            -12 => BcmStatus::Disabled,
            -13 => BcmStatus::BadId,
            -14 => BcmStatus::Resource,
            -15 => BcmStatus::Config,
            -16 => BcmStatus::Unavail,
            -17 => BcmStatus::Init,
            -18 => BcmStatus::Port,
            // positive values are treated as success by the SDK
            rv if rv > 0 => BcmStatus::None,
            _ => BcmStatus::Internal,
        }
    }

    /// Returns the raw return code.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == BcmStatus::None
    }

    /// Returns true if the status indicates a hardware table or memory
    /// exhaustion.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            BcmStatus::Full | BcmStatus::Resource | BcmStatus::Memory
        )
    }

    /// Converts to a Result, attaching `context` on failure.
    pub fn into_result(self, context: impl Into<String>) -> BcmResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(BcmError::new(self, context))
        }
    }
}

impl fmt::Display for BcmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BcmStatus::None => "BCM_E_NONE",
            BcmStatus::Internal => "BCM_E_INTERNAL",
            BcmStatus::Memory => "BCM_E_MEMORY",
            BcmStatus::Unit => "BCM_E_UNIT",
            BcmStatus::Param => "BCM_E_PARAM",
            BcmStatus::Empty => "BCM_E_EMPTY",
            BcmStatus::Full => "BCM_E_FULL",
            BcmStatus::NotFound => "BCM_E_NOT_FOUND",
            BcmStatus::Exists => "BCM_E_EXISTS",
            BcmStatus::Timeout => "BCM_E_TIMEOUT",
            BcmStatus::Busy => "BCM_E_BUSY",
            BcmStatus::Fail => "BCM_E_FAIL",
            BcmStatus::Disabled => "BCM_E_DISABLED",
            BcmStatus::BadId => "BCM_E_BADID",
            BcmStatus::Resource => "BCM_E_RESOURCE",
            BcmStatus::Config => "BCM_E_CONFIG",
            BcmStatus::Unavail => "BCM_E_UNAVAIL",
            BcmStatus::Init => "BCM_E_INIT",
            BcmStatus::Port => "BCM_E_PORT",
        };
        write!(f, "{}", s)
    }
}

/// A failed SDK call: the return code plus what was being attempted.
#[derive(Debug, Clone, Error)]
#[error("{context}: {status} ({})", .status.as_raw())]
pub struct BcmError {
    status: BcmStatus,
    context: String,
}

impl BcmError {
    /// Creates an error from a status code and context string.
    pub fn new(status: BcmStatus, context: impl Into<String>) -> Self {
        Self {
            status,
            context: context.into(),
        }
    }

    /// Returns the SDK status of the failed call.
    pub fn status(&self) -> BcmStatus {
        self.status
    }

    /// Returns the raw SDK return code.
    pub fn code(&self) -> i32 {
        self.status.as_raw()
    }

    /// Returns the context of the failed call.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Returns true if the call failed because a hardware table was full.
    pub fn is_resource_exhausted(&self) -> bool {
        self.status.is_resource_exhausted()
    }

    /// Returns true if the object the call referred to does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status == BcmStatus::NotFound
    }

    /// Prepends additional context, keeping the status.
    pub fn with_context(self, context: impl fmt::Display) -> Self {
        Self {
            status: self.status,
            context: format!("{}: {}", context, self.context),
        }
    }
}

/// Result type for SDK operations.
pub type BcmResult<T> = Result<T, BcmError>;

/// Extension trait for checking raw SDK return codes.
pub trait BcmStatusExt {
    /// Converts a raw return code to a Result carrying `context` on failure.
    fn check(self, context: impl Into<String>) -> BcmResult<()>;
}

impl BcmStatusExt for i32 {
    fn check(self, context: impl Into<String>) -> BcmResult<()> {
        BcmStatus::from_raw(self).into_result(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(BcmStatus::from_raw(0), BcmStatus::None);
        assert_eq!(BcmStatus::from_raw(-6), BcmStatus::Full);
        assert_eq!(BcmStatus::from_raw(-7), BcmStatus::NotFound);
        assert_eq!(BcmStatus::from_raw(3), BcmStatus::None);
        assert_eq!(BcmStatus::from_raw(-999), BcmStatus::Internal);
    }

    #[test]
    fn test_raw_status_check() {
        assert!(0_i32.check("noop").is_ok());

        let err = (-8_i32).check("failed to create field entry").unwrap_err();
        assert_eq!(err.status(), BcmStatus::Exists);
        assert_eq!(err.code(), -8);
        assert_eq!(err.context(), "failed to create field entry");
    }

    #[test]
    fn test_error_display_carries_code_and_context() {
        let err = BcmError::new(BcmStatus::Full, "failed to create stat");
        assert_eq!(err.to_string(), "failed to create stat: BCM_E_FULL (-6)");

        let err = err.with_context("acl=acl0");
        assert_eq!(
            err.to_string(),
            "acl=acl0: failed to create stat: BCM_E_FULL (-6)"
        );
    }

    #[test]
    fn test_resource_exhaustion_classification() {
        assert!(BcmError::new(BcmStatus::Full, "x").is_resource_exhausted());
        assert!(BcmError::new(BcmStatus::Resource, "x").is_resource_exhausted());
        assert!(!BcmError::new(BcmStatus::Param, "x").is_resource_exhausted());
        assert!(BcmError::new(BcmStatus::NotFound, "x").is_not_found());
    }
}
