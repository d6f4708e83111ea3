//! Token-to-claims resolution for the API process.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use almox_auth::{ClaimsError, ClaimsModel, ClaimsProvider, Role, TemplateGrant};
use almox_core::UserId;

/// Static token table for dev and tests.
///
/// Production deployments replace this with a provider backed by the identity
/// service; handlers and the gate only ever see the resulting `ClaimsModel`.
#[derive(Debug, Default)]
pub struct StaticClaimsProvider {
    tokens: RwLock<HashMap<String, ClaimsModel>>,
}

impl StaticClaimsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider pre-seeded with one admin token (`dev-admin`).
    pub fn dev_defaults() -> Self {
        let provider = Self::new();
        let now = Utc::now();
        provider.insert(
            "dev-admin",
            ClaimsModel {
                sub: UserId::new(),
                roles: vec![Role::new("admin")],
                grants: vec![],
                issued_at: now,
                expires_at: now + Duration::days(365),
            },
        );
        provider
    }

    pub fn insert(&self, token: impl Into<String>, claims: ClaimsModel) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.into(), claims);
        }
    }

    /// Register a token for a plain user with the given grants.
    pub fn insert_user(
        &self,
        token: impl Into<String>,
        sub: UserId,
        roles: Vec<Role>,
        grants: Vec<TemplateGrant>,
    ) {
        let now = Utc::now();
        self.insert(
            token,
            ClaimsModel {
                sub,
                roles,
                grants,
                issued_at: now,
                expires_at: now + Duration::days(365),
            },
        );
    }
}

impl ClaimsProvider for StaticClaimsProvider {
    fn resolve(&self, token: &str, _now: DateTime<Utc>) -> Result<ClaimsModel, ClaimsError> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| ClaimsError::Unavailable("token table lock poisoned".to_string()))?;
        tokens.get(token).cloned().ok_or(ClaimsError::Unknown)
    }
}
