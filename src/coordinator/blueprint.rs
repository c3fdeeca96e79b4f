//! Cached workbook structure, dropped when a structural write settles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::events::{Subscription, WriteEvent, WriteImpact};
use super::queue::WriteCoordinator;

/// Opaque structure summary for one workbook (sheet names, used ranges, tables).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbookBlueprint {
    pub workbook_id: String,
    pub content: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct BlueprintCache {
    entries: Arc<Mutex<HashMap<String, WorkbookBlueprint>>>,
}

impl BlueprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, WorkbookBlueprint>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invalidate entries from `coordinator` events until the subscription drops.
    pub fn attach(&self, coordinator: &WriteCoordinator) -> Subscription {
        let cache = self.clone();
        coordinator.subscribe(move |event| cache.observe(event))
    }

    pub fn get(&self, workbook_id: &str) -> Option<WorkbookBlueprint> {
        self.entries().get(workbook_id).cloned()
    }

    pub fn store(&self, workbook_id: impl Into<String>, content: impl Into<String>) {
        let workbook_id = workbook_id.into();
        let blueprint = WorkbookBlueprint {
            workbook_id: workbook_id.clone(),
            content: content.into(),
            captured_at: Utc::now(),
        };
        self.entries().insert(workbook_id, blueprint);
    }

    pub fn invalidate(&self, workbook_id: &str) -> bool {
        self.entries().remove(workbook_id).is_some()
    }

    /// A failed structural write may have partially applied, so it invalidates too.
    pub fn observe(&self, event: &WriteEvent) {
        if event.impact == WriteImpact::Structural
            && event.kind.is_terminal()
            && self.invalidate(&event.workbook_id)
        {
            debug!(
                workbook_id = %event.workbook_id,
                op_id = %event.op_id,
                "blueprint invalidated"
            );
        }
    }
}
