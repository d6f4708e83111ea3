use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use almox_auth::{ClaimsModel, PermissionScope, ResourceId, TemplateCode, resolve};
use almox_catalog::{CategoryLookup, InMemoryCatalog, MaterialId};
use almox_core::Aggregate;
use almox_events::{EventEnvelope, InMemoryEventBus};
use almox_infra::{
    CommandDispatcher, DispatchError, InMemoryEventStore, InMemoryRecycleLog, RecycleEntry,
    RecycleLog, RequisitionReadModel, RequisitionsProjection, StoredEvent,
    event_store::EventStore,
};
use almox_requisitions::{
    AuthorizationGate, MANAGE_CATEGORY, Requisition, RequisitionCommand, RequisitionId,
};
use uuid::Uuid;

type InMemoryDispatcher =
    CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

/// Shared application services: dispatcher, stores, projection, and the gate.
///
/// The projection is fed synchronously after every successful dispatch so
/// reads issued right after a write observe it.
pub struct AppServices {
    dispatcher: InMemoryDispatcher,
    event_store: Arc<InMemoryEventStore>,
    projection: RequisitionsProjection,
    catalog: Arc<InMemoryCatalog>,
    gate: AuthorizationGate<Arc<InMemoryCatalog>>,
    recycle: InMemoryRecycleLog,
}

pub fn build_services() -> AppServices {
    let event_store = Arc::new(InMemoryEventStore::new());
    let event_bus = Arc::new(InMemoryEventBus::new());
    let catalog = Arc::new(InMemoryCatalog::new());

    AppServices {
        dispatcher: CommandDispatcher::new(Arc::clone(&event_store), event_bus),
        event_store,
        projection: RequisitionsProjection::new(),
        gate: AuthorizationGate::new(Arc::clone(&catalog)),
        catalog,
        recycle: InMemoryRecycleLog::new(),
    }
}

impl AppServices {
    pub fn gate(&self) -> &AuthorizationGate<Arc<InMemoryCatalog>> {
        &self.gate
    }

    pub fn catalog(&self) -> &Arc<InMemoryCatalog> {
        &self.catalog
    }

    /// Dispatch a requisition command and feed the committed events straight
    /// into the projection.
    pub fn dispatch(
        &self,
        id: RequisitionId,
        command: RequisitionCommand,
        idempotency_key: Option<Uuid>,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let committed = self.dispatcher.dispatch::<Requisition>(
            id.0,
            "requisition",
            command,
            idempotency_key,
            |aggregate_id| Requisition::empty(RequisitionId::new(aggregate_id)),
        )?;

        for stored in &committed {
            if let Err(e) = self.projection.apply_envelope(&stored.to_envelope()) {
                // Reads fall behind but the write already committed.
                tracing::error!("projection apply failed: {e}");
            }
        }

        Ok(committed)
    }

    /// Rehydrate the current aggregate state for pre-dispatch authorization.
    pub fn load_requisition(&self, id: RequisitionId) -> Result<Requisition, DispatchError> {
        let history = self.event_store.load_stream(id.0)?;
        let mut req = Requisition::empty(id);
        for stored in history {
            let ev = serde_json::from_value(stored.payload)
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            req.apply(&ev);
        }
        if !req.exists() || req.is_deleted() {
            return Err(DispatchError::NotFound);
        }
        Ok(req)
    }

    pub fn get(&self, id: RequisitionId) -> Option<RequisitionReadModel> {
        self.projection.get(id).filter(|rm| !rm.deleted)
    }

    /// Requisitions the actor may see.
    ///
    /// Admins see everything. Other users see their own requisitions plus the
    /// ones whose every item category falls inside their `manage_category`
    /// scope. Requisitions with unresolvable categories stay hidden.
    pub fn list_visible(&self, claims: &ClaimsModel) -> Vec<RequisitionReadModel> {
        let all = self.projection.list();
        if claims.is_admin() {
            return all;
        }

        let scope = resolve(claims, &TemplateCode::new(MANAGE_CATEGORY));
        all.into_iter()
            .filter(|rm| rm.requested_by == claims.sub || self.covered_by_scope(rm, &scope))
            .collect()
    }

    pub fn is_visible(&self, claims: &ClaimsModel, rm: &RequisitionReadModel) -> bool {
        if claims.is_admin() || rm.requested_by == claims.sub {
            return true;
        }
        let scope = resolve(claims, &TemplateCode::new(MANAGE_CATEGORY));
        self.covered_by_scope(rm, &scope)
    }

    fn covered_by_scope(&self, rm: &RequisitionReadModel, scope: &PermissionScope) -> bool {
        if scope.is_denied() || rm.items.is_empty() {
            return false;
        }
        if *scope == PermissionScope::Global {
            return true;
        }

        let mut categories: HashSet<ResourceId> = HashSet::new();
        for item in &rm.items {
            match self.category_of(item.material_id) {
                Some(category) => {
                    categories.insert(category);
                }
                // Unknown material or catalog outage: fail closed.
                None => return false,
            }
        }
        scope.covers(categories)
    }

    fn category_of(&self, material: MaterialId) -> Option<ResourceId> {
        self.catalog
            .category_of(material)
            .ok()
            .flatten()
            .map(|c| ResourceId::from_uuid(*c.as_uuid()))
    }

    pub fn record_recycle(&self, entry: RecycleEntry) {
        self.recycle.record(entry);
    }

    pub fn recycle_entries(&self) -> Vec<RecycleEntry> {
        self.recycle.entries()
    }
}
