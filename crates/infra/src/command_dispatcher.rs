//! Command execution pipeline.
//!
//! Orchestrates the full lifecycle for event-sourced aggregates: load the
//! stream, rehydrate, handle the command, append with an optimistic
//! concurrency check, publish to the bus. Domain code stays pure; every side
//! effect goes through the injected store and bus.
//!
//! ## Idempotent retries
//!
//! A caller may attach an idempotency key to a dispatch. The first successful
//! execution records its committed events under `(aggregate_id, key)`; a
//! replay with the same key returns the recorded events without re-running
//! the command. Keys are scoped per stream, so two different requisitions can
//! see the same client-supplied key without colliding.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use almox_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use almox_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    Concurrency(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Operation not valid from the aggregate's current status.
    InvalidTransition(String),
    /// Quantity outside the item invariants.
    InvalidQuantity(String),
    /// Unrecognized return condition.
    InvalidCondition(String),
    /// Domain authorization failure.
    Denied { code: String, reason: String },
    /// Domain-level not found.
    NotFound,
    /// A collaborator (catalog, claims backend) failed or timed out.
    Unavailable(String),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidTransition(msg) => DispatchError::InvalidTransition(msg),
            DomainError::InvalidQuantity(msg) => DispatchError::InvalidQuantity(msg),
            DomainError::InvalidCondition(msg) => DispatchError::InvalidCondition(msg),
            DomainError::AuthorizationDenied { code, reason } => {
                DispatchError::Denied { code, reason }
            }
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::DependencyUnavailable(msg) => DispatchError::Unavailable(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests can run fully in memory and a real
/// backend can be swapped in without touching domain code.
///
/// Guarantees:
/// - events are persisted before publication; if append fails nothing is
///   published
/// - each dispatch operates on a single aggregate stream
/// - a concurrent writer surfaces as `DispatchError::Concurrency`; callers
///   reload and retry (or surface a conflict)
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    completed: Mutex<HashMap<(AggregateId, Uuid), Vec<StoredEvent>>>,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            completed: Mutex::new(HashMap::new()),
        }
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// The `make_aggregate` closure creates a fresh instance for rehydration
    /// (e.g. `Requisition::empty(id)`), keeping the dispatcher generic over
    /// aggregate types.
    ///
    /// Returns the committed events with their assigned sequence numbers. An
    /// accepted command that decides no events returns an empty vector and
    /// records nothing against the idempotency key.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        idempotency_key: Option<Uuid>,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: almox_events::Event + Serialize + DeserializeOwned,
    {
        // 0) Idempotent replay: return the recorded outcome without re-running.
        if let Some(key) = idempotency_key {
            if let Ok(completed) = self.completed.lock() {
                if let Some(recorded) = completed.get(&(aggregate_id, key)) {
                    debug!(%aggregate_id, %key, "idempotent replay, returning recorded events");
                    return Ok(recorded.clone());
                }
            }
        }

        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(aggregate_id, aggregate_type.clone(), Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // Record before publication: a retry after a publish failure must see
        // the recorded outcome instead of a spurious concurrency conflict.
        if let Some(key) = idempotency_key {
            if let Ok(mut completed) = self.completed.lock() {
                completed.insert((aggregate_id, key), committed.clone());
            }
        }

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        debug!(%aggregate_id, events = committed.len(), "command committed");
        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(StoredEvent::stream_version).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // The stream must belong to the requested aggregate and be strictly
    // increasing by sequence.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!("loaded stream contains wrong aggregate_id at index {idx}"),
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
