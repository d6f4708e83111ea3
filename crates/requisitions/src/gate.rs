//! Authorization gate for requisition operations.
//!
//! Combines the permission resolver with the requisition's current state so
//! every mutating operation is accepted or rejected **before** any command is
//! dispatched. Denials never leave partial side effects.

use std::collections::HashSet;

use almox_auth::{ClaimsModel, PermissionScope, ResourceId, TemplateCode, resolve};
use almox_catalog::CategoryLookup;
use almox_core::{DomainError, DomainResult};

use crate::requisition::{DecisionKind, Requisition};

/// Capability code gating attend/return/mark-in-use, scoped by material
/// category.
pub const MANAGE_CATEGORY: &str = "manage_category";

/// An operation an actor wants to perform on a requisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequisitionAction {
    Decide(DecisionKind),
    Attend,
    Return,
    MarkInUse,
    Delete,
}

/// Thin façade deciding, per requisition and per operation, whether the
/// acting user may proceed.
///
/// The catalog is the gate's only collaborator; everything else is a pure
/// function of the claims and the aggregate.
#[derive(Debug)]
pub struct AuthorizationGate<C> {
    catalog: C,
}

impl<C> AuthorizationGate<C>
where
    C: CategoryLookup,
{
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    pub fn authorize(
        &self,
        claims: &ClaimsModel,
        requisition: &Requisition,
        action: RequisitionAction,
    ) -> DomainResult<()> {
        match action {
            RequisitionAction::Decide(DecisionKind::Approve)
            | RequisitionAction::Decide(DecisionKind::Reject) => {
                if claims.is_admin() {
                    Ok(())
                } else {
                    Err(DomainError::denied(
                        "decide_forbidden",
                        "approving or rejecting requires the admin role",
                    ))
                }
            }
            RequisitionAction::Decide(DecisionKind::Cancel) => {
                if claims.is_admin() || self.is_requester(claims, requisition) {
                    Ok(())
                } else {
                    Err(DomainError::denied(
                        "cancel_forbidden",
                        "only an admin or the requester may cancel",
                    ))
                }
            }
            RequisitionAction::Attend | RequisitionAction::MarkInUse => {
                self.check_category_scope(claims, requisition)
            }
            RequisitionAction::Return => {
                self.check_category_scope(claims, requisition)?;
                // Only whoever approved the issue may confirm it came back.
                if requisition.approver_of_record() == Some(claims.sub) {
                    Ok(())
                } else {
                    Err(DomainError::denied(
                        "return_approver_mismatch",
                        "returns must be confirmed by the approver of record",
                    ))
                }
            }
            RequisitionAction::Delete => {
                if claims.is_admin() || self.is_requester(claims, requisition) {
                    Ok(())
                } else {
                    Err(DomainError::denied(
                        "delete_forbidden",
                        "only an admin or the requester may delete",
                    ))
                }
            }
        }
    }

    fn is_requester(&self, claims: &ClaimsModel, requisition: &Requisition) -> bool {
        requisition.requested_by() == Some(claims.sub)
    }

    /// Fail-closed category scope check for fulfillment operations.
    fn check_category_scope(
        &self,
        claims: &ClaimsModel,
        requisition: &Requisition,
    ) -> DomainResult<()> {
        if requisition.items().is_empty() {
            return Err(DomainError::denied(
                "empty_requisition",
                "a requisition without items cannot be fulfilled",
            ));
        }

        let scope = resolve(claims, &TemplateCode::new(MANAGE_CATEGORY));
        if scope.is_denied() {
            return Err(DomainError::denied(
                "category_scope",
                format!("missing '{MANAGE_CATEGORY}' grant"),
            ));
        }
        if scope == PermissionScope::Global {
            return Ok(());
        }

        let mut categories: HashSet<ResourceId> = HashSet::new();
        for item in requisition.items() {
            match self.catalog.category_of(item.material_id) {
                Err(e) => return Err(DomainError::unavailable(e.to_string())),
                Ok(None) => {
                    return Err(DomainError::denied(
                        "unresolved_category",
                        format!("material {} has no resolvable category", item.material_id),
                    ));
                }
                Ok(Some(category)) => {
                    categories.insert(ResourceId::from_uuid(*category.as_uuid()));
                }
            }
        }

        if scope.covers(categories) {
            Ok(())
        } else {
            Err(DomainError::denied(
                "category_scope",
                "one or more item categories are outside the granted scope",
            ))
        }
    }
}
