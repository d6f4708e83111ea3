//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business/domain failures. Infrastructure
/// concerns (IO, serialization) belong elsewhere; collaborator outages surface
/// through `DependencyUnavailable` so callers can retry with backoff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation not valid from the aggregate's current status.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A caller-supplied quantity violates the item invariants.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A caller-supplied return condition is not recognized.
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// Actor lacks the required global or category-scoped permission.
    #[error("authorization denied ({code}): {reason}")]
    AuthorizationDenied { code: String, reason: String },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A collaborator (catalog, claims, store) failed or timed out.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn invalid_condition(msg: impl Into<String>) -> Self {
        Self::InvalidCondition(msg.into())
    }

    pub fn denied(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DependencyUnavailable(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
