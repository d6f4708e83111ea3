use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use almox_catalog::MaterialId;
use almox_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use almox_events::Event;

/// Requisition identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequisitionId(pub AggregateId);

impl RequisitionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RequisitionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Requisition line-item identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequisitionItemId(pub AggregateId);

impl RequisitionItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RequisitionItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Decision-ledger entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(pub AggregateId);

impl DecisionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Requisition status lifecycle.
///
/// `Rejected` and `Cancelled` are terminal; no operation is accepted from
/// them. Post-approval statuses are recomputed from item quantities (see
/// [`derive_fulfillment_status`]); `InUse` is only ever entered through the
/// explicit administrative shortcut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    PartiallyFulfilled,
    InUse,
    Fulfilled,
    Returned,
}

impl RequisitionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequisitionStatus::Rejected | RequisitionStatus::Cancelled)
    }
}

/// Per-item status, always derived from quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    PartiallyAttended,
    Attended,
    InUse,
    Returned,
}

/// Condition an issued item came back in.
///
/// Condition is metadata only: a damaged or lost item still counts as
/// returned for quantity purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnCondition {
    Good,
    Damaged,
    Lost,
}

impl Default for ReturnCondition {
    fn default() -> Self {
        ReturnCondition::Good
    }
}

/// Decision kind (Approve/Reject/Cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Approve,
    Reject,
    Cancel,
}

/// An entry of the append-only decision ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub decided_by: UserId,
    pub kind: DecisionKind,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Requisition line item.
///
/// Invariants (enforced by the command handlers):
/// `0 <= qty_attended <= qty_requested` and `0 <= qty_returned <= qty_attended`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionItem {
    pub id: RequisitionItemId,
    pub material_id: MaterialId,
    pub description: String,
    pub qty_requested: u32,
    pub qty_attended: u32,
    pub qty_returned: u32,
}

impl RequisitionItem {
    /// Quantity currently checked out ("em uso").
    pub fn in_use(&self) -> u32 {
        self.qty_attended - self.qty_returned
    }

    pub fn status(&self) -> ItemStatus {
        if self.qty_attended == 0 {
            ItemStatus::Pending
        } else if self.qty_returned == self.qty_attended {
            ItemStatus::Returned
        } else if self.qty_returned > 0 {
            ItemStatus::InUse
        } else if self.qty_attended == self.qty_requested {
            ItemStatus::Attended
        } else {
            ItemStatus::PartiallyAttended
        }
    }
}

/// Recompute the post-approval header status from item totals.
///
/// This is a pure function of the items so incremental maintenance and a
/// from-scratch recomputation can never disagree:
/// - nothing attended yet ⇒ `Approved`
/// - everything that was issued came back ⇒ `Returned`
/// - something came back but something is still out ⇒ `PartiallyFulfilled`
/// - every item fully attended ⇒ `Fulfilled`
/// - otherwise ⇒ `PartiallyFulfilled`
pub fn derive_fulfillment_status(items: &[RequisitionItem]) -> RequisitionStatus {
    let attended: u64 = items.iter().map(|i| u64::from(i.qty_attended)).sum();
    if attended == 0 {
        return RequisitionStatus::Approved;
    }

    let returned: u64 = items.iter().map(|i| u64::from(i.qty_returned)).sum();
    if returned == attended {
        return RequisitionStatus::Returned;
    }
    if returned > 0 {
        return RequisitionStatus::PartiallyFulfilled;
    }

    if items.iter().all(|i| i.qty_attended == i.qty_requested) {
        RequisitionStatus::Fulfilled
    } else {
        RequisitionStatus::PartiallyFulfilled
    }
}

/// Aggregate root: Requisition.
///
/// Header plus line items plus the decision ledger; every mutation goes
/// through `handle`/`apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requisition {
    id: RequisitionId,
    requested_by: Option<UserId>,
    needed_by: Option<NaiveDate>,
    location: String,
    justification: Option<String>,
    created_at: Option<DateTime<Utc>>,
    status: RequisitionStatus,
    items: Vec<RequisitionItem>,
    decisions: Vec<Decision>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Requisition {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RequisitionId) -> Self {
        Self {
            id,
            requested_by: None,
            needed_by: None,
            location: String::new(),
            justification: None,
            created_at: None,
            status: RequisitionStatus::Pending,
            items: Vec::new(),
            decisions: Vec::new(),
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RequisitionId {
        self.id
    }

    pub fn status(&self) -> RequisitionStatus {
        self.status
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn needed_by(&self) -> Option<NaiveDate> {
        self.needed_by
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn justification(&self) -> Option<&str> {
        self.justification.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn items(&self) -> &[RequisitionItem] {
        &self.items
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Actor of the most recent Approve decision.
    ///
    /// This user is the only one allowed to confirm returns.
    pub fn approver_of_record(&self) -> Option<UserId> {
        self.decisions
            .iter()
            .rev()
            .find(|d| d.kind == DecisionKind::Approve)
            .map(|d| d.decided_by)
    }

    /// Total quantity currently checked out across all items.
    pub fn total_in_use(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.in_use())).sum()
    }

    fn item(&self, item_id: RequisitionItemId) -> Option<&RequisitionItem> {
        self.items.iter().find(|i| i.id == item_id)
    }
}

impl AggregateRoot for Requisition {
    type Id = RequisitionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateRequisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequisition {
    pub requisition_id: RequisitionId,
    pub requested_by: UserId,
    pub needed_by: NaiveDate,
    pub location: String,
    pub justification: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (only allowed while Pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub requisition_id: RequisitionId,
    pub item_id: RequisitionItemId,
    pub material_id: MaterialId,
    pub description: String,
    pub qty_requested: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Decide (Approve/Reject/Cancel, only while Pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decide {
    pub requisition_id: RequisitionId,
    pub decision_id: DecisionId,
    pub actor: UserId,
    pub kind: DecisionKind,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: issue some quantity of a requested item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendItem {
    pub requisition_id: RequisitionId,
    pub item_id: RequisitionItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: check an issued quantity back in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub requisition_id: RequisitionId,
    pub item_id: RequisitionItemId,
    pub quantity: u32,
    pub condition: ReturnCondition,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: administrative header-only shortcut to InUse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInUse {
    pub requisition_id: RequisitionId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteRequisition (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequisition {
    pub requisition_id: RequisitionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequisitionCommand {
    CreateRequisition(CreateRequisition),
    AddItem(AddItem),
    Decide(Decide),
    AttendItem(AttendItem),
    ReturnItem(ReturnItem),
    MarkInUse(MarkInUse),
    DeleteRequisition(DeleteRequisition),
}

/// Event: RequisitionCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionCreated {
    pub requisition_id: RequisitionId,
    pub requested_by: UserId,
    pub needed_by: NaiveDate,
    pub location: String,
    pub justification: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub requisition_id: RequisitionId,
    pub item_id: RequisitionItemId,
    pub material_id: MaterialId,
    pub description: String,
    pub qty_requested: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DecisionRecorded (appends to the immutable ledger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecorded {
    pub requisition_id: RequisitionId,
    pub decision_id: DecisionId,
    pub actor: UserId,
    pub kind: DecisionKind,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAttended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAttended {
    pub requisition_id: RequisitionId,
    pub item_id: RequisitionItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReturned {
    pub requisition_id: RequisitionId,
    pub item_id: RequisitionItemId,
    pub quantity: u32,
    pub condition: ReturnCondition,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MarkedInUse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedInUse {
    pub requisition_id: RequisitionId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequisitionDeleted (soft delete; the recycle log keeps the snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionDeleted {
    pub requisition_id: RequisitionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequisitionEvent {
    RequisitionCreated(RequisitionCreated),
    ItemAdded(ItemAdded),
    DecisionRecorded(DecisionRecorded),
    ItemAttended(ItemAttended),
    ItemReturned(ItemReturned),
    MarkedInUse(MarkedInUse),
    RequisitionDeleted(RequisitionDeleted),
}

impl Event for RequisitionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RequisitionEvent::RequisitionCreated(_) => "requisition.created",
            RequisitionEvent::ItemAdded(_) => "requisition.item_added",
            RequisitionEvent::DecisionRecorded(_) => "requisition.decision_recorded",
            RequisitionEvent::ItemAttended(_) => "requisition.item_attended",
            RequisitionEvent::ItemReturned(_) => "requisition.item_returned",
            RequisitionEvent::MarkedInUse(_) => "requisition.marked_in_use",
            RequisitionEvent::RequisitionDeleted(_) => "requisition.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RequisitionEvent::RequisitionCreated(e) => e.occurred_at,
            RequisitionEvent::ItemAdded(e) => e.occurred_at,
            RequisitionEvent::DecisionRecorded(e) => e.occurred_at,
            RequisitionEvent::ItemAttended(e) => e.occurred_at,
            RequisitionEvent::ItemReturned(e) => e.occurred_at,
            RequisitionEvent::MarkedInUse(e) => e.occurred_at,
            RequisitionEvent::RequisitionDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Requisition {
    type Command = RequisitionCommand;
    type Event = RequisitionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RequisitionEvent::RequisitionCreated(e) => {
                self.id = e.requisition_id;
                self.requested_by = Some(e.requested_by);
                self.needed_by = Some(e.needed_by);
                self.location = e.location.clone();
                self.justification = e.justification.clone();
                self.created_at = Some(e.occurred_at);
                self.status = RequisitionStatus::Pending;
                self.items.clear();
                self.decisions.clear();
                self.deleted = false;
                self.created = true;
            }
            RequisitionEvent::ItemAdded(e) => {
                self.items.push(RequisitionItem {
                    id: e.item_id,
                    material_id: e.material_id,
                    description: e.description.clone(),
                    qty_requested: e.qty_requested,
                    qty_attended: 0,
                    qty_returned: 0,
                });
            }
            RequisitionEvent::DecisionRecorded(e) => {
                self.decisions.push(Decision {
                    id: e.decision_id,
                    decided_by: e.actor,
                    kind: e.kind,
                    reason: e.reason.clone(),
                    decided_at: e.occurred_at,
                });
                self.status = match e.kind {
                    DecisionKind::Approve => RequisitionStatus::Approved,
                    DecisionKind::Reject => RequisitionStatus::Rejected,
                    DecisionKind::Cancel => RequisitionStatus::Cancelled,
                };
            }
            RequisitionEvent::ItemAttended(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.qty_attended += e.quantity;
                }
                self.status = derive_fulfillment_status(&self.items);
            }
            RequisitionEvent::ItemReturned(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.qty_returned += e.quantity;
                }
                self.status = derive_fulfillment_status(&self.items);
            }
            RequisitionEvent::MarkedInUse(_) => {
                self.status = RequisitionStatus::InUse;
            }
            RequisitionEvent::RequisitionDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RequisitionCommand::CreateRequisition(cmd) => self.handle_create(cmd),
            RequisitionCommand::AddItem(cmd) => self.handle_add_item(cmd),
            RequisitionCommand::Decide(cmd) => self.handle_decide(cmd),
            RequisitionCommand::AttendItem(cmd) => self.handle_attend(cmd),
            RequisitionCommand::ReturnItem(cmd) => self.handle_return(cmd),
            RequisitionCommand::MarkInUse(cmd) => self.handle_mark_in_use(cmd),
            RequisitionCommand::DeleteRequisition(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Requisition {
    fn ensure_exists(&self, requisition_id: RequisitionId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != requisition_id {
            return Err(DomainError::invalid_id("requisition_id mismatch"));
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), DomainError> {
        if self.deleted {
            return Err(DomainError::invalid_transition(
                "requisition was deleted",
            ));
        }
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "no operation is valid from terminal status {:?}",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreateRequisition,
    ) -> Result<Vec<RequisitionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("requisition already exists"));
        }

        if cmd.location.trim().is_empty() {
            return Err(DomainError::validation("delivery location must not be empty"));
        }

        Ok(vec![RequisitionEvent::RequisitionCreated(RequisitionCreated {
            requisition_id: cmd.requisition_id,
            requested_by: cmd.requested_by,
            needed_by: cmd.needed_by,
            location: cmd.location.clone(),
            justification: cmd.justification.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_exists(cmd.requisition_id)?;
        self.ensure_live()?;

        if self.status != RequisitionStatus::Pending {
            return Err(DomainError::invalid_transition(
                "items can only be added while the requisition is pending",
            ));
        }

        if cmd.qty_requested == 0 {
            return Err(DomainError::invalid_quantity("requested quantity must be positive"));
        }

        if self.item(cmd.item_id).is_some() {
            return Err(DomainError::conflict("item id already present"));
        }

        Ok(vec![RequisitionEvent::ItemAdded(ItemAdded {
            requisition_id: cmd.requisition_id,
            item_id: cmd.item_id,
            material_id: cmd.material_id,
            description: cmd.description.clone(),
            qty_requested: cmd.qty_requested,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decide(&self, cmd: &Decide) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_exists(cmd.requisition_id)?;
        self.ensure_live()?;

        if self.status != RequisitionStatus::Pending {
            return Err(DomainError::invalid_transition(
                "only pending requisitions accept decisions",
            ));
        }

        if let Some(reason) = &cmd.reason {
            if reason.trim().is_empty() {
                return Err(DomainError::validation("decision reason must not be empty"));
            }
        }

        if cmd.kind == DecisionKind::Approve && self.items.is_empty() {
            return Err(DomainError::validation(
                "cannot approve a requisition without items",
            ));
        }

        Ok(vec![RequisitionEvent::DecisionRecorded(DecisionRecorded {
            requisition_id: cmd.requisition_id,
            decision_id: cmd.decision_id,
            actor: cmd.actor,
            kind: cmd.kind,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attend(&self, cmd: &AttendItem) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_exists(cmd.requisition_id)?;
        self.ensure_live()?;

        if !matches!(
            self.status,
            RequisitionStatus::Approved | RequisitionStatus::PartiallyFulfilled
        ) {
            return Err(DomainError::invalid_transition(format!(
                "cannot attend items while requisition is {:?}",
                self.status
            )));
        }

        let item = self.item(cmd.item_id).ok_or(DomainError::NotFound)?;

        if cmd.quantity == 0 {
            return Err(DomainError::invalid_quantity("quantity must be positive"));
        }

        let remaining = item.qty_requested - item.qty_attended;
        if cmd.quantity > remaining {
            return Err(DomainError::invalid_quantity(format!(
                "quantity {} exceeds remaining requested quantity {}",
                cmd.quantity, remaining
            )));
        }

        Ok(vec![RequisitionEvent::ItemAttended(ItemAttended {
            requisition_id: cmd.requisition_id,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnItem) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_exists(cmd.requisition_id)?;
        self.ensure_live()?;

        if !matches!(
            self.status,
            RequisitionStatus::InUse
                | RequisitionStatus::PartiallyFulfilled
                | RequisitionStatus::Fulfilled
        ) {
            return Err(DomainError::invalid_transition(format!(
                "cannot return items while requisition is {:?}",
                self.status
            )));
        }

        let item = self.item(cmd.item_id).ok_or(DomainError::NotFound)?;

        if cmd.quantity == 0 {
            return Err(DomainError::invalid_quantity("quantity must be positive"));
        }

        let in_use = item.in_use();
        if cmd.quantity > in_use {
            return Err(DomainError::invalid_quantity(format!(
                "quantity {} exceeds quantity in use {}",
                cmd.quantity, in_use
            )));
        }

        Ok(vec![RequisitionEvent::ItemReturned(ItemReturned {
            requisition_id: cmd.requisition_id,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            condition: cmd.condition,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_in_use(&self, cmd: &MarkInUse) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_exists(cmd.requisition_id)?;
        self.ensure_live()?;

        // Header-only convenience: never attends items on its own.
        if !matches!(
            self.status,
            RequisitionStatus::Fulfilled | RequisitionStatus::PartiallyFulfilled
        ) {
            return Err(DomainError::invalid_transition(format!(
                "cannot mark in use while requisition is {:?}",
                self.status
            )));
        }

        Ok(vec![RequisitionEvent::MarkedInUse(MarkedInUse {
            requisition_id: cmd.requisition_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(
        &self,
        cmd: &DeleteRequisition,
    ) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_exists(cmd.requisition_id)?;

        if self.deleted {
            return Err(DomainError::invalid_transition("requisition was deleted"));
        }

        // Policy: never delete while any quantity is attended but not returned.
        if self.total_in_use() > 0 {
            return Err(DomainError::invalid_transition(
                "cannot delete a requisition with items still in use",
            ));
        }

        Ok(vec![RequisitionEvent::RequisitionDeleted(RequisitionDeleted {
            requisition_id: cmd.requisition_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rid() -> RequisitionId {
        RequisitionId::new(AggregateId::new())
    }

    fn iid() -> RequisitionItemId {
        RequisitionItemId::new(AggregateId::new())
    }

    fn did() -> DecisionId {
        DecisionId::new(AggregateId::new())
    }

    fn mat() -> MaterialId {
        MaterialId::new(AggregateId::new())
    }

    fn t() -> DateTime<Utc> {
        Utc::now()
    }

    fn needed() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
    }

    fn run(req: &mut Requisition, cmd: RequisitionCommand) {
        let events = req.handle(&cmd).unwrap();
        for e in &events {
            req.apply(e);
        }
    }

    /// Pending requisition with a single item of the given requested quantity.
    fn pending_with_item(qty: u32) -> (Requisition, RequisitionItemId, UserId) {
        let id = rid();
        let requester = UserId::new();
        let item_id = iid();
        let mut req = Requisition::empty(id);
        run(
            &mut req,
            RequisitionCommand::CreateRequisition(CreateRequisition {
                requisition_id: id,
                requested_by: requester,
                needed_by: needed(),
                location: "central warehouse".to_string(),
                justification: Some("maintenance".to_string()),
                occurred_at: t(),
            }),
        );
        run(
            &mut req,
            RequisitionCommand::AddItem(AddItem {
                requisition_id: id,
                item_id,
                material_id: mat(),
                description: "safety helmet".to_string(),
                qty_requested: qty,
                occurred_at: t(),
            }),
        );
        (req, item_id, requester)
    }

    fn approve(req: &mut Requisition, approver: UserId) {
        let id = req.id_typed();
        run(
            req,
            RequisitionCommand::Decide(Decide {
                requisition_id: id,
                decision_id: did(),
                actor: approver,
                kind: DecisionKind::Approve,
                reason: None,
                occurred_at: t(),
            }),
        );
    }

    fn attend(req: &mut Requisition, item_id: RequisitionItemId, qty: u32) {
        let id = req.id_typed();
        run(
            req,
            RequisitionCommand::AttendItem(AttendItem {
                requisition_id: id,
                item_id,
                quantity: qty,
                occurred_at: t(),
            }),
        );
    }

    fn give_back(req: &mut Requisition, item_id: RequisitionItemId, qty: u32) {
        let id = req.id_typed();
        run(
            req,
            RequisitionCommand::ReturnItem(ReturnItem {
                requisition_id: id,
                item_id,
                quantity: qty,
                condition: ReturnCondition::Good,
                notes: None,
                occurred_at: t(),
            }),
        );
    }

    #[test]
    fn full_lifecycle_attend_and_return() {
        let (mut req, item_id, _) = pending_with_item(10);
        let approver = UserId::new();
        approve(&mut req, approver);
        assert_eq!(req.status(), RequisitionStatus::Approved);

        attend(&mut req, item_id, 6);
        assert_eq!(req.status(), RequisitionStatus::PartiallyFulfilled);
        assert_eq!(req.items()[0].qty_attended, 6);
        assert_eq!(req.items()[0].status(), ItemStatus::PartiallyAttended);

        attend(&mut req, item_id, 4);
        assert_eq!(req.status(), RequisitionStatus::Fulfilled);
        assert_eq!(req.items()[0].status(), ItemStatus::Attended);

        give_back(&mut req, item_id, 3);
        assert_eq!(req.status(), RequisitionStatus::PartiallyFulfilled);
        assert_eq!(req.items()[0].in_use(), 7);
        assert_eq!(req.items()[0].status(), ItemStatus::InUse);

        give_back(&mut req, item_id, 7);
        assert_eq!(req.status(), RequisitionStatus::Returned);
        assert_eq!(req.items()[0].qty_returned, 10);
        assert_eq!(req.items()[0].status(), ItemStatus::Returned);
        assert_eq!(req.approver_of_record(), Some(approver));
    }

    #[test]
    fn partial_return_keeps_requisition_in_use() {
        let (mut req, item_id, _) = pending_with_item(10);
        approve(&mut req, UserId::new());
        attend(&mut req, item_id, 6);
        attend(&mut req, item_id, 4);
        give_back(&mut req, item_id, 3);

        assert_eq!(req.items()[0].in_use(), 7);
        give_back(&mut req, item_id, 6);
        assert_eq!(req.items()[0].in_use(), 1);
        assert_eq!(req.status(), RequisitionStatus::PartiallyFulfilled);

        give_back(&mut req, item_id, 1);
        assert_eq!(req.status(), RequisitionStatus::Returned);
    }

    #[test]
    fn attend_after_full_return_is_rejected() {
        let (mut req, item_id, _) = pending_with_item(10);
        approve(&mut req, UserId::new());
        attend(&mut req, item_id, 4);
        give_back(&mut req, item_id, 4);
        assert_eq!(req.status(), RequisitionStatus::Returned);

        // A fully-returned requisition is closed for further attends even
        // though some requested quantity was never issued.
        let err = req
            .handle(&RequisitionCommand::AttendItem(AttendItem {
                requisition_id: req.id_typed(),
                item_id,
                quantity: 1,
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn attend_beyond_remaining_fails_with_invalid_quantity() {
        let (mut req, item_id, _) = pending_with_item(10);
        approve(&mut req, UserId::new());
        attend(&mut req, item_id, 10);

        let err = req
            .handle(&RequisitionCommand::AttendItem(AttendItem {
                requisition_id: req.id_typed(),
                item_id,
                quantity: 1,
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn attend_zero_fails_with_invalid_quantity() {
        let (mut req, item_id, _) = pending_with_item(10);
        approve(&mut req, UserId::new());

        let err = req
            .handle(&RequisitionCommand::AttendItem(AttendItem {
                requisition_id: req.id_typed(),
                item_id,
                quantity: 0,
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn return_beyond_in_use_fails_with_invalid_quantity() {
        let (mut req, item_id, _) = pending_with_item(10);
        approve(&mut req, UserId::new());
        attend(&mut req, item_id, 4);

        let err = req
            .handle(&RequisitionCommand::ReturnItem(ReturnItem {
                requisition_id: req.id_typed(),
                item_id,
                quantity: 5,
                condition: ReturnCondition::Good,
                notes: None,
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn damaged_return_still_counts_for_quantities() {
        let (mut req, item_id, _) = pending_with_item(5);
        let id = req.id_typed();
        approve(&mut req, UserId::new());
        attend(&mut req, item_id, 5);
        run(
            &mut req,
            RequisitionCommand::ReturnItem(ReturnItem {
                requisition_id: id,
                item_id,
                quantity: 5,
                condition: ReturnCondition::Damaged,
                notes: Some("cracked shell".to_string()),
                occurred_at: t(),
            }),
        );
        assert_eq!(req.status(), RequisitionStatus::Returned);
        assert_eq!(req.items()[0].qty_returned, 5);
    }

    #[test]
    fn decisions_only_from_pending() {
        let (mut req, _item_id, _) = pending_with_item(3);
        approve(&mut req, UserId::new());

        let err = req
            .handle(&RequisitionCommand::Decide(Decide {
                requisition_id: req.id_typed(),
                decision_id: did(),
                actor: UserId::new(),
                kind: DecisionKind::Reject,
                reason: None,
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn no_operation_is_valid_from_terminal_states() {
        for kind in [DecisionKind::Reject, DecisionKind::Cancel] {
            let (mut req, item_id, _) = pending_with_item(3);
            let id = req.id_typed();
            run(
                &mut req,
                RequisitionCommand::Decide(Decide {
                    requisition_id: id,
                    decision_id: did(),
                    actor: UserId::new(),
                    kind,
                    reason: Some("not needed".to_string()),
                    occurred_at: t(),
                }),
            );

            let attend_err = req
                .handle(&RequisitionCommand::AttendItem(AttendItem {
                    requisition_id: req.id_typed(),
                    item_id,
                    quantity: 1,
                    occurred_at: t(),
                }))
                .unwrap_err();
            assert!(matches!(attend_err, DomainError::InvalidTransition(_)));

            let decide_err = req
                .handle(&RequisitionCommand::Decide(Decide {
                    requisition_id: req.id_typed(),
                    decision_id: did(),
                    actor: UserId::new(),
                    kind: DecisionKind::Approve,
                    reason: None,
                    occurred_at: t(),
                }))
                .unwrap_err();
            assert!(matches!(decide_err, DomainError::InvalidTransition(_)));
        }
    }

    #[test]
    fn approve_without_items_fails_validation() {
        let id = rid();
        let mut req = Requisition::empty(id);
        run(
            &mut req,
            RequisitionCommand::CreateRequisition(CreateRequisition {
                requisition_id: id,
                requested_by: UserId::new(),
                needed_by: needed(),
                location: "lab".to_string(),
                justification: None,
                occurred_at: t(),
            }),
        );

        let err = req
            .handle(&RequisitionCommand::Decide(Decide {
                requisition_id: id,
                decision_id: did(),
                actor: UserId::new(),
                kind: DecisionKind::Approve,
                reason: None,
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn blank_provided_reason_is_rejected() {
        let (req, _, _) = pending_with_item(2);
        let err = req
            .handle(&RequisitionCommand::Decide(Decide {
                requisition_id: req.id_typed(),
                decision_id: did(),
                actor: UserId::new(),
                kind: DecisionKind::Reject,
                reason: Some("   ".to_string()),
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn mark_in_use_is_header_only() {
        let (mut req, item_id, _) = pending_with_item(4);
        let id = req.id_typed();
        approve(&mut req, UserId::new());
        attend(&mut req, item_id, 4);
        run(
            &mut req,
            RequisitionCommand::MarkInUse(MarkInUse {
                requisition_id: id,
                occurred_at: t(),
            }),
        );
        assert_eq!(req.status(), RequisitionStatus::InUse);
        // Quantities untouched.
        assert_eq!(req.items()[0].qty_attended, 4);
        assert_eq!(req.items()[0].qty_returned, 0);

        // Return from InUse recomputes the header.
        give_back(&mut req, item_id, 4);
        assert_eq!(req.status(), RequisitionStatus::Returned);
    }

    #[test]
    fn mark_in_use_requires_some_fulfillment() {
        let (mut req, _item_id, _) = pending_with_item(4);
        approve(&mut req, UserId::new());
        let err = req
            .handle(&RequisitionCommand::MarkInUse(MarkInUse {
                requisition_id: req.id_typed(),
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn delete_refused_while_items_in_use() {
        let (mut req, item_id, _) = pending_with_item(4);
        approve(&mut req, UserId::new());
        attend(&mut req, item_id, 2);

        let err = req
            .handle(&RequisitionCommand::DeleteRequisition(DeleteRequisition {
                requisition_id: req.id_typed(),
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        give_back(&mut req, item_id, 2);
        let id = req.id_typed();
        run(
            &mut req,
            RequisitionCommand::DeleteRequisition(DeleteRequisition {
                requisition_id: id,
                occurred_at: t(),
            }),
        );
        assert!(req.is_deleted());

        // Nothing is accepted after deletion.
        let err = req
            .handle(&RequisitionCommand::AttendItem(AttendItem {
                requisition_id: req.id_typed(),
                item_id,
                quantity: 1,
                occurred_at: t(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn approver_of_record_is_latest_approve() {
        let (mut req, _item_id, _) = pending_with_item(2);
        let approver = UserId::new();
        approve(&mut req, approver);
        assert_eq!(req.approver_of_record(), Some(approver));
        assert_eq!(req.decisions().len(), 1);
        assert_eq!(req.decisions()[0].kind, DecisionKind::Approve);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (req, item_id, _) = pending_with_item(5);
        let before = req.clone();

        let _ = req.handle(&RequisitionCommand::Decide(Decide {
            requisition_id: req.id_typed(),
            decision_id: did(),
            actor: UserId::new(),
            kind: DecisionKind::Approve,
            reason: None,
            occurred_at: t(),
        }));
        let _ = req.handle(&RequisitionCommand::AttendItem(AttendItem {
            requisition_id: req.id_typed(),
            item_id,
            quantity: 1,
            occurred_at: t(),
        }));

        assert_eq!(req, before);
    }

    #[test]
    fn version_increments_on_apply() {
        let (mut req, item_id, _) = pending_with_item(5);
        assert_eq!(req.version(), 2);
        approve(&mut req, UserId::new());
        assert_eq!(req.version(), 3);
        attend(&mut req, item_id, 1);
        assert_eq!(req.version(), 4);
    }

    #[test]
    fn incremental_status_equals_recomputed_status() {
        let (mut req, item_id, _) = pending_with_item(10);
        approve(&mut req, UserId::new());
        for (attend_qty, return_qty) in [(6, 0), (4, 3), (0, 1)] {
            if attend_qty > 0 {
                attend(&mut req, item_id, attend_qty);
            }
            if return_qty > 0 {
                give_back(&mut req, item_id, return_qty);
            }
            assert_eq!(req.status(), derive_fulfillment_status(req.items()));
        }
    }

    proptest! {
        /// Quantity invariants hold under any accepted sequence of operations:
        /// `0 <= attended <= requested` and `0 <= returned <= attended`.
        #[test]
        fn quantity_invariants_hold(requested in 1u32..50, ops in proptest::collection::vec((proptest::bool::ANY, 1u32..20), 0..40)) {
            let (mut req, item_id, _) = pending_with_item(requested);
            approve(&mut req, UserId::new());

            for (is_attend, qty) in ops {
                let cmd = if is_attend {
                    RequisitionCommand::AttendItem(AttendItem {
                        requisition_id: req.id_typed(),
                        item_id,
                        quantity: qty,
                        occurred_at: t(),
                    })
                } else {
                    RequisitionCommand::ReturnItem(ReturnItem {
                        requisition_id: req.id_typed(),
                        item_id,
                        quantity: qty,
                        condition: ReturnCondition::Good,
                        notes: None,
                        occurred_at: t(),
                    })
                };

                if let Ok(events) = req.handle(&cmd) {
                    for e in &events {
                        req.apply(e);
                    }
                }

                let item = &req.items()[0];
                prop_assert!(item.qty_attended <= item.qty_requested);
                prop_assert!(item.qty_returned <= item.qty_attended);
                prop_assert_eq!(req.status(), derive_fulfillment_status(req.items()));
            }
        }
    }
}
