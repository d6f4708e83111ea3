use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use almox_core::UserId;

use crate::{Role, TemplateGrant};

/// Typed claims model (transport-agnostic).
///
/// This is the minimal set of claims the engine expects once a bearer token
/// has been decoded/verified by whatever transport/security layer is in use.
/// A fresh model is constructed per authenticated request; roles and grants
/// are immutable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsModel {
    /// Subject / user identifier.
    pub sub: UserId,

    /// RBAC roles granted to the user.
    pub roles: Vec<Role>,

    /// Capability template grants (global or category-scoped).
    pub grants: Vec<TemplateGrant>,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

impl ClaimsModel {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(Role::is_admin)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token was not recognized")]
    Unknown,

    #[error("claims provider unavailable: {0}")]
    Unavailable(String),
}

/// Deterministically validate claims.
///
/// Note: this validates the *claims* only. Signature verification / decoding
/// is intentionally outside this crate.
pub fn validate_claims(claims: &ClaimsModel, now: DateTime<Utc>) -> Result<(), ClaimsError> {
    if claims.expires_at <= claims.issued_at {
        return Err(ClaimsError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(ClaimsError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(ClaimsError::Expired);
    }
    Ok(())
}

/// Collaborator that turns an opaque bearer token into a validated
/// `ClaimsModel`.
///
/// Implementations decode the token once per request (an external identity
/// provider signs it); business logic never re-parses tokens inline.
pub trait ClaimsProvider: Send + Sync {
    fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<ClaimsModel, ClaimsError>;
}
