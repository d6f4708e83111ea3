use almox_auth::ClaimsModel;
use almox_core::UserId;

/// Authenticated actor context for a request.
///
/// Built once by the auth middleware and immutable afterwards; every handler
/// reads the same claims the gate will evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    claims: ClaimsModel,
}

impl ActorContext {
    pub fn new(claims: ClaimsModel) -> Self {
        Self { claims }
    }

    pub fn actor_id(&self) -> UserId {
        self.claims.sub
    }

    pub fn is_admin(&self) -> bool {
        self.claims.is_admin()
    }

    pub fn claims(&self) -> &ClaimsModel {
        &self.claims
    }
}
