//! Mutation outcome taxonomy and its wire payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use reportdesk_core::{DomainError, VersionConflict};
use reportdesk_reports::{AuthzError, TransitionError, MIN_HIGH_PRIORITY_FOR_ARCHIVE};

use crate::store::StoreError;
use crate::tasks::TaskStoreError;

/// Why a report operation was refused.
///
/// Everything except `Internal` is an expected outcome the caller maps to a
/// response; `Internal` means shared state could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("version conflict (expected: {expected}, actual: {actual})")]
    Conflict { expected: u64, actual: u64 },

    #[error(transparent)]
    BusinessRule(#[from] TransitionError),

    #[error(transparent)]
    Forbidden(#[from] AuthzError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type MutationResult<T> = Result<T, MutationError>;

impl MutationError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            MutationError::NotFound(_) => "not_found",
            MutationError::Validation(_) => "validation_error",
            MutationError::Conflict { .. } => "conflict",
            MutationError::BusinessRule(_) => "business_rule_violation",
            MutationError::Forbidden(_) => "forbidden",
            MutationError::Internal(_) => "internal_error",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let details = match self {
            MutationError::Conflict { expected, actual } => Some(json!({
                "current_version": actual,
                "supplied_version": expected,
            })),
            MutationError::BusinessRule(rule) => Some(match rule {
                TransitionError::InsufficientHighPriorityEntries { count } => json!({
                    "rule": rule.kind(),
                    "high_priority_count": count,
                    "required": MIN_HIGH_PRIORITY_FOR_ARCHIVE,
                }),
                TransitionError::NoEntries => json!({ "rule": rule.kind() }),
            }),
            MutationError::Forbidden(AuthzError::Forbidden { role, permission }) => Some(json!({
                "role": role,
                "permission": permission.as_str(),
            })),
            _ => None,
        };

        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<VersionConflict> for MutationError {
    fn from(value: VersionConflict) -> Self {
        MutationError::Conflict {
            expected: value.expected,
            actual: value.actual,
        }
    }
}

impl From<DomainError> for MutationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => MutationError::Validation(msg),
            DomainError::InvalidId(msg) => MutationError::Validation(msg),
            DomainError::NotFound(what) => MutationError::NotFound(what),
        }
    }
}

impl From<StoreError> for MutationError {
    fn from(value: StoreError) -> Self {
        MutationError::Internal(value.to_string())
    }
}

impl From<TaskStoreError> for MutationError {
    fn from(value: TaskStoreError) -> Self {
        MutationError::Internal(value.to_string())
    }
}

/// Error body handed to whatever transport sits in front of the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportdesk_reports::{Permission, Role};

    #[test]
    fn conflict_payload_carries_both_versions() {
        let err = MutationError::from(VersionConflict {
            expected: 3,
            actual: 5,
        });
        let payload = err.to_payload();
        assert_eq!(payload.code, "conflict");
        assert_eq!(
            payload.details,
            Some(json!({ "current_version": 5, "supplied_version": 3 }))
        );
    }

    #[test]
    fn business_rule_payload_names_the_rule() {
        let payload = MutationError::from(TransitionError::InsufficientHighPriorityEntries {
            count: 2,
        })
        .to_payload();
        assert_eq!(payload.code, "business_rule_violation");
        assert!(payload.message.contains("found 2"));
        assert_eq!(
            payload.details,
            Some(json!({
                "rule": "insufficient_high_priority_entries",
                "high_priority_count": 2,
                "required": 3,
            }))
        );

        let payload = MutationError::from(TransitionError::NoEntries).to_payload();
        assert_eq!(payload.details, Some(json!({ "rule": "no_entries" })));
    }

    #[test]
    fn domain_errors_map_onto_taxonomy() {
        assert_eq!(
            MutationError::from(DomainError::validation("title must not be empty")).code(),
            "validation_error"
        );
        assert_eq!(
            MutationError::from(DomainError::not_found("attachment x")).code(),
            "not_found"
        );
        assert_eq!(MutationError::from(StoreError::Poisoned).code(), "internal_error");
    }

    #[test]
    fn forbidden_payload_serializes_without_empty_details() {
        let err = MutationError::from(AuthzError::Forbidden {
            role: Role::Viewer,
            permission: Permission::CreateReport,
        });
        let value = serde_json::to_value(err.to_payload()).unwrap();
        assert_eq!(value["code"], "forbidden");
        assert_eq!(value["details"]["role"], "viewer");
        assert_eq!(value["details"]["permission"], "report.create");

        let value = serde_json::to_value(MutationError::validation("x").to_payload()).unwrap();
        assert!(value.get("details").is_none());
    }
}
