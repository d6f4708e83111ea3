//! Recycle log for soft-deleted requisitions.
//!
//! Deletion never destroys data: the stream stays in the event store and the
//! recycle log keeps a JSON snapshot of the requisition as it looked at
//! deletion time, together with who deleted it and when. An administrator can
//! inspect the log to audit or manually restore deleted requisitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, RwLock};

use almox_core::UserId;
use almox_requisitions::RequisitionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycleEntry {
    pub requisition_id: RequisitionId,
    pub deleted_by: UserId,
    pub deleted_at: DateTime<Utc>,
    /// Full read-side snapshot taken just before deletion.
    pub snapshot: JsonValue,
}

pub trait RecycleLog: Send + Sync {
    fn record(&self, entry: RecycleEntry);

    /// All entries, oldest first.
    fn entries(&self) -> Vec<RecycleEntry>;
}

#[derive(Debug, Default)]
pub struct InMemoryRecycleLog {
    entries: RwLock<Vec<RecycleEntry>>,
}

impl InMemoryRecycleLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecycleLog for InMemoryRecycleLog {
    fn record(&self, entry: RecycleEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push(entry);
        }
    }

    fn entries(&self) -> Vec<RecycleEntry> {
        self.entries
            .read()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl<L> RecycleLog for Arc<L>
where
    L: RecycleLog + ?Sized,
{
    fn record(&self, entry: RecycleEntry) {
        (**self).record(entry)
    }

    fn entries(&self) -> Vec<RecycleEntry> {
        (**self).entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almox_core::AggregateId;
    use serde_json::json;

    #[test]
    fn records_entries_in_order() {
        let log = InMemoryRecycleLog::new();
        let first = RecycleEntry {
            requisition_id: RequisitionId::new(AggregateId::new()),
            deleted_by: UserId::new(),
            deleted_at: Utc::now(),
            snapshot: json!({"status": "returned"}),
        };
        let second = RecycleEntry {
            requisition_id: RequisitionId::new(AggregateId::new()),
            deleted_by: UserId::new(),
            deleted_at: Utc::now(),
            snapshot: json!({"status": "pending"}),
        };

        log.record(first.clone());
        log.record(second.clone());
        assert_eq!(log.entries(), vec![first, second]);
    }
}
