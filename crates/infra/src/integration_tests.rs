//! End-to-end tests wiring dispatcher, store, bus, gate, projection, and the
//! recycle log together, all in memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use almox_auth::{ClaimsModel, ResourceId, Role, TemplateGrant};
use almox_catalog::{CategoryId, InMemoryCatalog, MaterialId, MaterialTypeId};
use almox_core::{AggregateId, UserId};
use almox_events::{EventBus, EventEnvelope, InMemoryEventBus};
use almox_requisitions::{
    AddItem, AttendItem, AuthorizationGate, CreateRequisition, Decide, DecisionId, DecisionKind,
    MANAGE_CATEGORY, MarkInUse, Requisition, RequisitionCommand, RequisitionId, RequisitionItemId,
    RequisitionStatus, ReturnCondition, ReturnItem,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::projections::RequisitionsProjection;
use crate::recycle::{InMemoryRecycleLog, RecycleEntry, RecycleLog};

type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;
type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;

struct Fixture {
    dispatcher: Dispatcher,
    store: Arc<InMemoryEventStore>,
    catalog: InMemoryCatalog,
    projection: RequisitionsProjection,
    subscription: almox_events::Subscription<EventEnvelope<JsonValue>>,
}

impl Fixture {
    fn new() -> Self {
        let bus = Bus::new();
        let subscription = bus.subscribe();
        let store = Arc::new(InMemoryEventStore::new());
        Self {
            dispatcher: CommandDispatcher::new(Arc::clone(&store), bus),
            store,
            catalog: InMemoryCatalog::new(),
            projection: RequisitionsProjection::new(),
            subscription,
        }
    }

    fn register_material(&self, category: CategoryId) -> MaterialId {
        let material = MaterialId::new(AggregateId::new());
        let material_type = MaterialTypeId::new(AggregateId::new());
        self.catalog.insert_chain(material, material_type, category);
        material
    }

    fn dispatch(
        &self,
        id: RequisitionId,
        cmd: RequisitionCommand,
        key: Option<Uuid>,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch::<Requisition>(id.0, "requisition", cmd, key, |agg_id| {
                Requisition::empty(RequisitionId::new(agg_id))
            })
            .map(|_| ())
    }

    /// Drain the bus into the projection.
    fn project(&self) {
        while let Ok(envelope) = self.subscription.recv_timeout(Duration::from_millis(10)) {
            self.projection.apply_envelope(&envelope).unwrap();
        }
    }

    fn rehydrate(&self, id: RequisitionId) -> Requisition {
        use almox_core::Aggregate;
        let mut req = Requisition::empty(id);
        for stored in self.store.load_stream(id.0).unwrap() {
            let ev = serde_json::from_value(stored.payload).unwrap();
            req.apply(&ev);
        }
        req
    }
}

fn admin_claims(sub: UserId) -> ClaimsModel {
    let now = Utc::now();
    ClaimsModel {
        sub,
        roles: vec![Role::new("admin")],
        grants: vec![],
        issued_at: now,
        expires_at: now + chrono::Duration::hours(1),
    }
}

fn scoped_claims(sub: UserId, categories: &[CategoryId]) -> ClaimsModel {
    let now = Utc::now();
    ClaimsModel {
        sub,
        roles: vec![],
        grants: categories
            .iter()
            .map(|c| {
                TemplateGrant::scoped(MANAGE_CATEGORY, "category", ResourceId::from_uuid(*c.as_uuid()))
            })
            .collect(),
        issued_at: now,
        expires_at: now + chrono::Duration::hours(1),
    }
}

fn create_cmd(id: RequisitionId, requester: UserId) -> RequisitionCommand {
    RequisitionCommand::CreateRequisition(CreateRequisition {
        requisition_id: id,
        requested_by: requester,
        needed_by: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        location: "central warehouse".to_string(),
        justification: Some("field maintenance".to_string()),
        occurred_at: Utc::now(),
    })
}

fn add_item_cmd(
    id: RequisitionId,
    item_id: RequisitionItemId,
    material: MaterialId,
    qty: u32,
) -> RequisitionCommand {
    RequisitionCommand::AddItem(AddItem {
        requisition_id: id,
        item_id,
        material_id: material,
        description: "safety equipment".to_string(),
        qty_requested: qty,
        occurred_at: Utc::now(),
    })
}

fn approve_cmd(id: RequisitionId, approver: UserId) -> RequisitionCommand {
    RequisitionCommand::Decide(Decide {
        requisition_id: id,
        decision_id: DecisionId::new(AggregateId::new()),
        actor: approver,
        kind: DecisionKind::Approve,
        reason: None,
        occurred_at: Utc::now(),
    })
}

#[test]
fn full_lifecycle_flows_into_the_read_model() {
    let fx = Fixture::new();
    let category = CategoryId::new(AggregateId::new());
    let material = fx.register_material(category);

    let id = RequisitionId::new(AggregateId::new());
    let item_id = RequisitionItemId::new(AggregateId::new());
    let requester = UserId::new();
    let approver = UserId::new();

    fx.dispatch(id, create_cmd(id, requester), None).unwrap();
    fx.dispatch(id, add_item_cmd(id, item_id, material, 10), None).unwrap();
    fx.dispatch(id, approve_cmd(id, approver), None).unwrap();

    // Authorization happens against the rehydrated aggregate before attending.
    let gate = AuthorizationGate::new(&fx.catalog);
    let operator = scoped_claims(UserId::new(), &[category]);
    let req = fx.rehydrate(id);
    gate.authorize(&operator, &req, almox_requisitions::RequisitionAction::Attend)
        .unwrap();

    fx.dispatch(
        id,
        RequisitionCommand::AttendItem(AttendItem {
            requisition_id: id,
            item_id,
            quantity: 6,
            occurred_at: Utc::now(),
        }),
        None,
    )
    .unwrap();
    fx.dispatch(
        id,
        RequisitionCommand::AttendItem(AttendItem {
            requisition_id: id,
            item_id,
            quantity: 4,
            occurred_at: Utc::now(),
        }),
        None,
    )
    .unwrap();

    // The approver of record confirms the return.
    let req = fx.rehydrate(id);
    let approver_claims = admin_claims(approver);
    gate.authorize(&approver_claims, &req, almox_requisitions::RequisitionAction::Return)
        .unwrap();
    fx.dispatch(
        id,
        RequisitionCommand::ReturnItem(ReturnItem {
            requisition_id: id,
            item_id,
            quantity: 10,
            condition: ReturnCondition::Good,
            notes: None,
            occurred_at: Utc::now(),
        }),
        None,
    )
    .unwrap();

    fx.project();
    let rm = fx.projection.get(id).unwrap();
    assert_eq!(rm.status, RequisitionStatus::Returned);
    assert_eq!(rm.items[0].qty_attended, 10);
    assert_eq!(rm.items[0].qty_returned, 10);
    assert_eq!(rm.decisions.len(), 1);
}

#[test]
fn out_of_scope_operator_is_denied_before_dispatch() {
    let fx = Fixture::new();
    let granted = CategoryId::new(AggregateId::new());
    let other = CategoryId::new(AggregateId::new());
    let material = fx.register_material(other);

    let id = RequisitionId::new(AggregateId::new());
    let item_id = RequisitionItemId::new(AggregateId::new());
    fx.dispatch(id, create_cmd(id, UserId::new()), None).unwrap();
    fx.dispatch(id, add_item_cmd(id, item_id, material, 2), None).unwrap();
    fx.dispatch(id, approve_cmd(id, UserId::new()), None).unwrap();

    let gate = AuthorizationGate::new(&fx.catalog);
    let operator = scoped_claims(UserId::new(), &[granted]);
    let req = fx.rehydrate(id);
    let err = gate
        .authorize(&operator, &req, almox_requisitions::RequisitionAction::Attend)
        .unwrap_err();
    assert!(matches!(err, almox_core::DomainError::AuthorizationDenied { .. }));

    // Nothing was dispatched, so the read model never saw an attend.
    fx.project();
    assert_eq!(fx.projection.get(id).unwrap().items[0].qty_attended, 0);
}

#[test]
fn duplicate_create_surfaces_as_concurrency_conflict() {
    let fx = Fixture::new();
    let id = RequisitionId::new(AggregateId::new());
    fx.dispatch(id, create_cmd(id, UserId::new()), None).unwrap();

    let err = fx
        .dispatch(id, create_cmd(id, UserId::new()), None)
        .unwrap_err();
    assert!(matches!(err, DispatchError::Concurrency(_)));
}

#[test]
fn idempotent_batch_item_replay_does_not_double_attend() {
    let fx = Fixture::new();
    let category = CategoryId::new(AggregateId::new());
    let material = fx.register_material(category);

    let id = RequisitionId::new(AggregateId::new());
    let item_id = RequisitionItemId::new(AggregateId::new());
    fx.dispatch(id, create_cmd(id, UserId::new()), None).unwrap();
    fx.dispatch(id, add_item_cmd(id, item_id, material, 10), None).unwrap();
    fx.dispatch(id, approve_cmd(id, UserId::new()), None).unwrap();

    // Batch endpoints derive one sub-key per item from the request key.
    let request_key = Uuid::now_v7();
    let sub_key = Uuid::new_v5(&request_key, item_id.0.as_uuid().as_bytes());

    let attend = RequisitionCommand::AttendItem(AttendItem {
        requisition_id: id,
        item_id,
        quantity: 6,
        occurred_at: Utc::now(),
    });
    fx.dispatch(id, attend.clone(), Some(sub_key)).unwrap();
    fx.dispatch(id, attend, Some(sub_key)).unwrap();

    fx.project();
    assert_eq!(fx.projection.get(id).unwrap().items[0].qty_attended, 6);
}

#[test]
fn delete_records_a_recycle_entry_and_hides_the_requisition() {
    let fx = Fixture::new();
    let id = RequisitionId::new(AggregateId::new());
    let requester = UserId::new();
    fx.dispatch(id, create_cmd(id, requester), None).unwrap();
    fx.project();

    let recycle = InMemoryRecycleLog::new();
    let snapshot = serde_json::json!({
        "requisition_id": id,
        "status": "pending",
    });
    fx.dispatch(
        id,
        RequisitionCommand::DeleteRequisition(almox_requisitions::DeleteRequisition {
            requisition_id: id,
            occurred_at: Utc::now(),
        }),
        None,
    )
    .unwrap();
    recycle.record(RecycleEntry {
        requisition_id: id,
        deleted_by: requester,
        deleted_at: Utc::now(),
        snapshot,
    });

    fx.project();
    assert!(fx.projection.list().is_empty());
    assert!(fx.projection.get(id).unwrap().deleted);
    assert_eq!(recycle.entries().len(), 1);
    assert_eq!(recycle.entries()[0].requisition_id, id);
}

#[test]
fn projection_rebuilds_from_the_full_store() {
    let fx = Fixture::new();
    let category = CategoryId::new(AggregateId::new());
    let material = fx.register_material(category);

    let id = RequisitionId::new(AggregateId::new());
    let item_id = RequisitionItemId::new(AggregateId::new());
    fx.dispatch(id, create_cmd(id, UserId::new()), None).unwrap();
    fx.dispatch(id, add_item_cmd(id, item_id, material, 4), None).unwrap();
    fx.dispatch(id, approve_cmd(id, UserId::new()), None).unwrap();
    fx.project();
    let live = fx.projection.get(id).unwrap();

    let fresh = RequisitionsProjection::new();
    let envelopes = fx
        .store
        .all_events()
        .unwrap()
        .iter()
        .map(|stored| stored.to_envelope())
        .collect::<Vec<_>>();
    fresh.rebuild_from_scratch(envelopes).unwrap();

    assert_eq!(fresh.get(id).unwrap(), live);
}

#[test]
fn mark_in_use_propagates_to_the_read_model() {
    let fx = Fixture::new();
    let category = CategoryId::new(AggregateId::new());
    let material = fx.register_material(category);

    let id = RequisitionId::new(AggregateId::new());
    let item_id = RequisitionItemId::new(AggregateId::new());
    fx.dispatch(id, create_cmd(id, UserId::new()), None).unwrap();
    fx.dispatch(id, add_item_cmd(id, item_id, material, 2), None).unwrap();
    fx.dispatch(id, approve_cmd(id, UserId::new()), None).unwrap();
    fx.dispatch(
        id,
        RequisitionCommand::AttendItem(AttendItem {
            requisition_id: id,
            item_id,
            quantity: 2,
            occurred_at: Utc::now(),
        }),
        None,
    )
    .unwrap();
    fx.dispatch(
        id,
        RequisitionCommand::MarkInUse(MarkInUse {
            requisition_id: id,
            occurred_at: Utc::now(),
        }),
        None,
    )
    .unwrap();

    fx.project();
    let rm = fx.projection.get(id).unwrap();
    assert_eq!(rm.status, RequisitionStatus::InUse);
    assert_eq!(rm.items[0].qty_attended, 2);
}
