//! Workbook write coordination shared by all agent sessions.
//!
//! Every tool that mutates a workbook goes through [`WriteCoordinator::run_write`].
//! Observers ([`LockStateTracker`], [`BlueprintCache`]) follow the lifecycle
//! events it emits.

mod blueprint;
mod events;
mod lock_state;
mod queue;

pub use blueprint::{BlueprintCache, WorkbookBlueprint};
pub use events::{
    EventHandler, OperationType, Subscription, WriteContext, WriteEvent, WriteEventKind,
    WriteImpact,
};
pub use lock_state::{LockStateTracker, RuntimeLockState};
pub use queue::{CoordinatorConfig, WriteCoordinator, WriteOutcome};
