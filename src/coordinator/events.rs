//! Write requests, lifecycle events and subscriptions.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Whether a write changes workbook structure (sheets, tables, named ranges)
/// or only cell contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteImpact {
    #[default]
    Content,
    Structural,
}

/// All coordinated operations are writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    #[default]
    Write,
}

/// Identity of one write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteContext {
    /// Stable identifier of the shared document.
    pub workbook_id: String,
    /// Agent session (tab) requesting the write.
    pub session_id: String,
    /// Unique id of this attempt.
    pub op_id: String,
    /// Tool that asked for the write. Diagnostic only.
    pub tool_name: String,
    #[serde(default)]
    pub impact: WriteImpact,
}

impl WriteContext {
    /// Create a content write with a fresh op id.
    pub fn new(
        workbook_id: impl Into<String>,
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            workbook_id: workbook_id.into(),
            session_id: session_id.into(),
            op_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            impact: WriteImpact::Content,
        }
    }

    pub fn with_op_id(mut self, op_id: impl Into<String>) -> Self {
        self.op_id = op_id.into();
        self
    }

    /// Mark this write as changing workbook structure.
    pub fn structural(mut self) -> Self {
        self.impact = WriteImpact::Structural;
        self
    }
}

/// Lifecycle stage of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteEventKind {
    Queued,
    Started,
    Completed,
    Failed,
}

impl WriteEventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, WriteEventKind::Completed | WriteEventKind::Failed)
    }
}

/// Event delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteEvent {
    pub kind: WriteEventKind,
    pub workbook_id: String,
    pub session_id: String,
    pub op_id: String,
    pub tool_name: String,
    pub operation_type: OperationType,
    pub impact: WriteImpact,
    /// Failure reason for `Failed` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl WriteEvent {
    pub fn new(kind: WriteEventKind, ctx: &WriteContext, error: Option<String>) -> Self {
        Self {
            kind,
            workbook_id: ctx.workbook_id.clone(),
            session_id: ctx.session_id.clone(),
            op_id: ctx.op_id.clone(),
            tool_name: ctx.tool_name.clone(),
            operation_type: OperationType::Write,
            impact: ctx.impact,
            error,
            at: Utc::now(),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&WriteEvent) + Send + Sync>;

/// Registered event handlers.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, EventHandler)>>,
}

impl Subscribers {
    pub(crate) fn add(&self, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub(crate) fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call every handler synchronously. The list is copied first so handlers
    /// may subscribe or unsubscribe from inside a callback. A panicking handler
    /// is logged and skipped; it never unwinds into the coordinator.
    pub(crate) fn emit(&self, event: &WriteEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(
                    op_id = %event.op_id,
                    kind = ?event.kind,
                    "write event subscriber panicked"
                );
            }
        }
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Subscribers>,
}

impl Subscription {
    pub(crate) fn new(id: u64, registry: &Arc<Subscribers>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
