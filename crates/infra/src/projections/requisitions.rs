use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use almox_catalog::MaterialId;
use almox_core::{AggregateId, UserId};
use almox_events::EventEnvelope;
use almox_requisitions::{
    DecisionId, DecisionKind, ItemStatus, RequisitionEvent, RequisitionId, RequisitionItemId,
    RequisitionStatus, derive_fulfillment_status,
};

/// Read-side view of one requisition line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReadModel {
    pub item_id: RequisitionItemId,
    pub material_id: MaterialId,
    pub description: String,
    pub qty_requested: u32,
    pub qty_attended: u32,
    pub qty_returned: u32,
    pub status: ItemStatus,
}

/// Read-side view of one decision-ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionReadModel {
    pub decision_id: DecisionId,
    pub decided_by: UserId,
    pub kind: DecisionKind,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Read-side view of a full requisition (header + items + ledger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequisitionReadModel {
    pub requisition_id: RequisitionId,
    pub requested_by: UserId,
    pub needed_by: NaiveDate,
    pub location: String,
    pub justification: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: RequisitionStatus,
    pub items: Vec<ItemReadModel>,
    pub decisions: Vec<DecisionReadModel>,
    pub deleted: bool,
}

#[derive(Debug, Error)]
pub enum RequisitionProjectionError {
    #[error("failed to deserialize requisition event: {0}")]
    Deserialize(String),
    #[error("event requisition_id does not match envelope aggregate_id")]
    AggregateMismatch,
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
    #[error("projection store lock poisoned")]
    Poisoned,
}

/// Requisition list/detail projection.
///
/// Maintains one read model per requisition plus a per-stream cursor so
/// redelivered envelopes are skipped (at-least-once bus, idempotent apply).
/// The header status is recomputed from item quantities after every attend or
/// return, mirroring the aggregate.
#[derive(Debug, Default)]
pub struct RequisitionsProjection {
    store: RwLock<HashMap<AggregateId, RequisitionReadModel>>,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl RequisitionsProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, requisition_id: RequisitionId) -> Option<RequisitionReadModel> {
        self.store
            .read()
            .ok()
            .and_then(|store| store.get(&requisition_id.0).cloned())
    }

    /// All live (non-deleted) requisitions, unordered.
    pub fn list(&self) -> Vec<RequisitionReadModel> {
        self.store
            .read()
            .map(|store| store.values().filter(|rm| !rm.deleted).cloned().collect())
            .unwrap_or_default()
    }

    fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|cursors| cursors.get(&aggregate_id).copied())
            .unwrap_or(0)
    }

    fn update_cursor(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, seq);
        }
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), RequisitionProjectionError> {
        if envelope.aggregate_type() != "requisition" {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursor(aggregate_id);
        if seq == 0 {
            return Err(RequisitionProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Redelivery; already applied.
            return Ok(());
        }
        if seq != last + 1 {
            return Err(RequisitionProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: RequisitionEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| RequisitionProjectionError::Deserialize(e.to_string()))?;

        let requisition_id = match &ev {
            RequisitionEvent::RequisitionCreated(e) => e.requisition_id,
            RequisitionEvent::ItemAdded(e) => e.requisition_id,
            RequisitionEvent::DecisionRecorded(e) => e.requisition_id,
            RequisitionEvent::ItemAttended(e) => e.requisition_id,
            RequisitionEvent::ItemReturned(e) => e.requisition_id,
            RequisitionEvent::MarkedInUse(e) => e.requisition_id,
            RequisitionEvent::RequisitionDeleted(e) => e.requisition_id,
        };
        if requisition_id.0 != aggregate_id {
            return Err(RequisitionProjectionError::AggregateMismatch);
        }

        let mut store = self
            .store
            .write()
            .map_err(|_| RequisitionProjectionError::Poisoned)?;

        match ev {
            RequisitionEvent::RequisitionCreated(e) => {
                store.insert(
                    aggregate_id,
                    RequisitionReadModel {
                        requisition_id: e.requisition_id,
                        requested_by: e.requested_by,
                        needed_by: e.needed_by,
                        location: e.location,
                        justification: e.justification,
                        created_at: e.occurred_at,
                        status: RequisitionStatus::Pending,
                        items: vec![],
                        decisions: vec![],
                        deleted: false,
                    },
                );
            }
            RequisitionEvent::ItemAdded(e) => {
                if let Some(rm) = store.get_mut(&aggregate_id) {
                    rm.items.push(ItemReadModel {
                        item_id: e.item_id,
                        material_id: e.material_id,
                        description: e.description,
                        qty_requested: e.qty_requested,
                        qty_attended: 0,
                        qty_returned: 0,
                        status: ItemStatus::Pending,
                    });
                }
            }
            RequisitionEvent::DecisionRecorded(e) => {
                if let Some(rm) = store.get_mut(&aggregate_id) {
                    rm.decisions.push(DecisionReadModel {
                        decision_id: e.decision_id,
                        decided_by: e.actor,
                        kind: e.kind,
                        reason: e.reason,
                        decided_at: e.occurred_at,
                    });
                    rm.status = match e.kind {
                        DecisionKind::Approve => RequisitionStatus::Approved,
                        DecisionKind::Reject => RequisitionStatus::Rejected,
                        DecisionKind::Cancel => RequisitionStatus::Cancelled,
                    };
                }
            }
            RequisitionEvent::ItemAttended(e) => {
                if let Some(rm) = store.get_mut(&aggregate_id) {
                    if let Some(item) = rm.items.iter_mut().find(|i| i.item_id == e.item_id) {
                        item.qty_attended += e.quantity;
                    }
                    refresh_statuses(rm);
                }
            }
            RequisitionEvent::ItemReturned(e) => {
                if let Some(rm) = store.get_mut(&aggregate_id) {
                    if let Some(item) = rm.items.iter_mut().find(|i| i.item_id == e.item_id) {
                        item.qty_returned += e.quantity;
                    }
                    refresh_statuses(rm);
                }
            }
            RequisitionEvent::MarkedInUse(_) => {
                if let Some(rm) = store.get_mut(&aggregate_id) {
                    rm.status = RequisitionStatus::InUse;
                }
            }
            RequisitionEvent::RequisitionDeleted(_) => {
                if let Some(rm) = store.get_mut(&aggregate_id) {
                    rm.deleted = true;
                }
            }
        }

        drop(store);
        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    /// Discard the read models and replay every envelope in order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), RequisitionProjectionError> {
        {
            let mut store = self
                .store
                .write()
                .map_err(|_| RequisitionProjectionError::Poisoned)?;
            store.clear();
        }
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

fn refresh_statuses(rm: &mut RequisitionReadModel) {
    let items: Vec<almox_requisitions::RequisitionItem> = rm
        .items
        .iter()
        .map(|i| almox_requisitions::RequisitionItem {
            id: i.item_id,
            material_id: i.material_id,
            description: i.description.clone(),
            qty_requested: i.qty_requested,
            qty_attended: i.qty_attended,
            qty_returned: i.qty_returned,
        })
        .collect();

    for (read, item) in rm.items.iter_mut().zip(items.iter()) {
        read.status = item.status();
    }
    rm.status = derive_fulfillment_status(&items);
}
