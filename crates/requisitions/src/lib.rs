//! `almox-requisitions`: requisition lifecycle domain.
//!
//! Owns the requisition state machine (creation → decision → fulfillment →
//! return) and the authorization gate that fronts every mutating operation.

pub mod gate;
pub mod requisition;

pub use gate::{AuthorizationGate, MANAGE_CATEGORY, RequisitionAction};
pub use requisition::{
    AddItem, AttendItem, CreateRequisition, Decide, Decision, DecisionId, DecisionKind,
    DecisionRecorded, DeleteRequisition, ItemAdded, ItemAttended, ItemReturned, ItemStatus,
    MarkInUse, MarkedInUse, Requisition, RequisitionCommand, RequisitionCreated,
    RequisitionDeleted, RequisitionEvent, RequisitionId, RequisitionItem, RequisitionItemId,
    RequisitionStatus, ReturnCondition, ReturnItem, derive_fulfillment_status,
};
