use std::collections::HashSet;

use crate::{ClaimsModel, ResourceId, TemplateCode};

/// Outcome of resolving a capability code against a user's claims.
///
/// `ScopedTo` carries the set of resource ids (category ids) the user may act
/// on; callers decide whether a concrete operation's resources are covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionScope {
    /// Unrestricted authority for the code.
    Global,
    /// Authority limited to the listed resources.
    ScopedTo(HashSet<ResourceId>),
    /// No matching role or grant.
    Denied,
}

impl PermissionScope {
    pub fn is_denied(&self) -> bool {
        matches!(self, PermissionScope::Denied)
    }

    /// Whether every resource in `resources` is covered by this scope.
    ///
    /// `Global` covers everything; `Denied` covers nothing. An empty iterator
    /// is covered by both `Global` and `ScopedTo`; callers that must fail
    /// closed on "no resources" check that separately.
    pub fn covers<I>(&self, resources: I) -> bool
    where
        I: IntoIterator<Item = ResourceId>,
    {
        match self {
            PermissionScope::Global => true,
            PermissionScope::ScopedTo(set) => resources.into_iter().all(|r| set.contains(&r)),
            PermissionScope::Denied => false,
        }
    }
}

/// Resolve a user's authority for a capability code.
///
/// - No IO
/// - No panics
/// - Single implementation for every permission check in the system
///
/// Rules:
/// - the `"admin"` role grants `Global` for any code;
/// - a matching grant without a resource id grants `Global`;
/// - otherwise the matching scoped grants form `ScopedTo`;
/// - no matching grant means `Denied`.
pub fn resolve(claims: &ClaimsModel, required: &TemplateCode) -> PermissionScope {
    if claims.is_admin() {
        return PermissionScope::Global;
    }

    let matching: Vec<_> = claims
        .grants
        .iter()
        .filter(|g| g.code == *required)
        .collect();

    if matching.iter().any(|g| g.is_global()) {
        return PermissionScope::Global;
    }

    let scoped: HashSet<ResourceId> = matching.iter().filter_map(|g| g.resource_id).collect();

    if scoped.is_empty() {
        PermissionScope::Denied
    } else {
        PermissionScope::ScopedTo(scoped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, TemplateGrant};
    use almox_core::UserId;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn claims(roles: Vec<Role>, grants: Vec<TemplateGrant>) -> ClaimsModel {
        let now = Utc::now();
        ClaimsModel {
            sub: UserId::new(),
            roles,
            grants,
            issued_at: now,
            expires_at: now + Duration::hours(1),
        }
    }

    fn rid() -> ResourceId {
        ResourceId::from_uuid(Uuid::now_v7())
    }

    #[test]
    fn admin_role_resolves_global_without_grants() {
        let c = claims(vec![Role::new("admin")], vec![]);
        assert_eq!(
            resolve(&c, &TemplateCode::new("manage_category")),
            PermissionScope::Global
        );
    }

    #[test]
    fn unscoped_grant_resolves_global() {
        let c = claims(vec![], vec![TemplateGrant::global("manage_category")]);
        assert_eq!(
            resolve(&c, &TemplateCode::new("manage_category")),
            PermissionScope::Global
        );
    }

    #[test]
    fn scoped_grants_resolve_to_their_resource_set() {
        let a = rid();
        let b = rid();
        let c = claims(
            vec![],
            vec![
                TemplateGrant::scoped("manage_category", "category", a),
                TemplateGrant::scoped("manage_category", "category", b),
            ],
        );
        match resolve(&c, &TemplateCode::new("manage_category")) {
            PermissionScope::ScopedTo(set) => {
                assert_eq!(set.len(), 2);
                assert!(set.contains(&a) && set.contains(&b));
            }
            other => panic!("expected ScopedTo, got {other:?}"),
        }
    }

    #[test]
    fn global_grant_wins_over_scoped_grants_for_same_code() {
        let c = claims(
            vec![],
            vec![
                TemplateGrant::scoped("manage_category", "category", rid()),
                TemplateGrant::global("manage_category"),
            ],
        );
        assert_eq!(
            resolve(&c, &TemplateCode::new("manage_category")),
            PermissionScope::Global
        );
    }

    #[test]
    fn unmatched_code_is_denied() {
        let c = claims(
            vec![Role::new("warehouse")],
            vec![TemplateGrant::global("manage_users")],
        );
        assert_eq!(
            resolve(&c, &TemplateCode::new("manage_category")),
            PermissionScope::Denied
        );
    }

    #[test]
    fn covers_checks_subset_membership() {
        let a = rid();
        let b = rid();
        let scope = PermissionScope::ScopedTo([a].into_iter().collect());
        assert!(scope.covers([a]));
        assert!(!scope.covers([a, b]));
        assert!(PermissionScope::Global.covers([a, b]));
        assert!(!PermissionScope::Denied.covers([a]));
    }
}
