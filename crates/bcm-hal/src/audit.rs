//! Structured logging and audit records.
//!
//! Operational logs go through the component-tagged macros
//! ([`debug_log!`], [`info_log!`], [`warn_log!`], [`error_log!`]), which wrap
//! `tracing` and attach `source = <component>`.
//!
//! Every hardware object the agent creates, adopts, reclaims or destroys is
//! also emitted as an [`AuditRecord`] under the `audit` target via
//! [`audit_log!`]. Records carry a UTC timestamp and serialize to a single
//! JSON object, so the warm-boot history of a handle can be reconstructed
//! from the log alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Warm-boot cache population, claims and the final sweep
    WarmBoot,
    /// Hardware object created
    ResourceCreate,
    /// Hardware object updated in place
    ResourceModify,
    /// Hardware object destroyed
    ResourceDelete,
    /// SDK call outside the create/modify/delete lifecycle
    HardwareOperation,
    /// Error and failure events
    ErrorCondition,
    /// Agent startup, init completion and exit
    SystemLifecycle,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::WarmBoot => write!(f, "WARM_BOOT"),
            AuditCategory::ResourceCreate => write!(f, "RESOURCE_CREATE"),
            AuditCategory::ResourceModify => write!(f, "RESOURCE_MODIFY"),
            AuditCategory::ResourceDelete => write!(f, "RESOURCE_DELETE"),
            AuditCategory::HardwareOperation => write!(f, "HARDWARE_OPERATION"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
        }
    }
}

/// One audit event.
///
/// `object_type` names the hardware object kind (`acl_entry`, `acl_stat`,
/// `mirror_destination`, ...) and `object_id` its SDK handle or software
/// key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped with the current time. The outcome defaults
    /// to `InProgress` until set.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as `Failure`.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Debug-level log tagged with its component.
///
/// ```ignore
/// debug_log!("AclEntry", priority = 10, "adopted entry");
/// ```
#[macro_export]
macro_rules! debug_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::debug!(
            source = $source,
            $($arg)*
        )
    };
}

#[macro_export]
macro_rules! info_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::info!(
            source = $source,
            $($arg)*
        )
    };
}

#[macro_export]
macro_rules! warn_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::warn!(
            source = $source,
            $($arg)*
        )
    };
}

#[macro_export]
macro_rules! error_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::error!(
            source = $source,
            $($arg)*
        )
    };
}

/// Emits an [`AuditRecord`] under the `audit` target.
///
/// Successes log at info, in-progress records at debug and failures at warn.
///
/// ```ignore
/// audit_log!(
///     AuditRecord::new(AuditCategory::ResourceCreate, "AclStatTable", "create_stat")
///         .with_outcome(AuditOutcome::Success)
///         .with_object_type("acl_stat")
///         .with_object_id("stat0")
/// );
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

/// Installs the global JSON subscriber. `RUST_LOG` overrides `log_level`.
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .init();
}

/// Installs a human-readable subscriber for interactive runs.
pub fn init_logging_pretty(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_creation() {
        let record = AuditRecord::new(AuditCategory::ResourceCreate, "AclStatTable", "create_stat")
            .with_outcome(AuditOutcome::Success)
            .with_object_id("stat0")
            .with_object_type("acl_stat");

        assert_eq!(record.category, AuditCategory::ResourceCreate);
        assert_eq!(record.source, "AclStatTable");
        assert_eq!(record.action, "create_stat");
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.object_id, Some("stat0".to_string()));
        assert_eq!(record.object_type, Some("acl_stat".to_string()));
    }

    #[test]
    fn test_audit_record_with_error() {
        let record = AuditRecord::new(AuditCategory::ErrorCondition, "Mirror", "start_port")
            .with_error("port mirror add failed: BCM_E_FULL (-6)");

        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(
            record.error,
            Some("port mirror add failed: BCM_E_FULL (-6)".to_string())
        );
    }

    #[test]
    fn test_audit_record_json_serialization() {
        let record = AuditRecord::new(AuditCategory::WarmBoot, "WarmBootCache", "reclaim_stat")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "handle": 7,
                "name": "stat0"
            }));

        let json = record.to_json();
        assert!(json.contains("WARM_BOOT"));
        assert!(json.contains("WarmBootCache"));
        assert!(json.contains("reclaim_stat"));
        assert!(json.contains("\"name\":\"stat0\""));
        assert!(!json.contains("object_id"));
    }

    #[test]
    fn test_audit_category_display() {
        assert_eq!(AuditCategory::WarmBoot.to_string(), "WARM_BOOT");
        assert_eq!(AuditCategory::ResourceDelete.to_string(), "RESOURCE_DELETE");
        assert_eq!(
            AuditCategory::HardwareOperation.to_string(),
            "HARDWARE_OPERATION"
        );
    }

    #[test]
    fn test_audit_outcome_display() {
        assert_eq!(AuditOutcome::Success.to_string(), "success");
        assert_eq!(AuditOutcome::Failure.to_string(), "failure");
        assert_eq!(AuditOutcome::InProgress.to_string(), "in_progress");
    }
}
