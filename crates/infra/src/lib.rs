//! `almox-infra`: infrastructure for the requisition engine.
//!
//! Event store, command dispatcher, read-model projections, and the recycle
//! log. Everything here composes the domain crates through traits so tests
//! run fully in memory.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod recycle;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use projections::{
    DecisionReadModel, ItemReadModel, RequisitionProjectionError, RequisitionReadModel,
    RequisitionsProjection,
};
pub use recycle::{InMemoryRecycleLog, RecycleEntry, RecycleLog};
