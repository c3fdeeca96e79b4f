//! Per-session lock badge derived from coordinator events.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::events::{Subscription, WriteEvent, WriteEventKind};
use super::queue::WriteCoordinator;

/// What a session is doing with workbook locks right now. Display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeLockState {
    #[default]
    Idle,
    WaitingForLock,
    HoldingLock,
}

#[derive(Debug, Default)]
struct SessionOps {
    waiting: HashSet<String>,
    holding: HashSet<String>,
}

impl SessionOps {
    fn state(&self) -> RuntimeLockState {
        if !self.holding.is_empty() {
            RuntimeLockState::HoldingLock
        } else if !self.waiting.is_empty() {
            RuntimeLockState::WaitingForLock
        } else {
            RuntimeLockState::Idle
        }
    }
}

/// Tracks queued and running writes per session.
#[derive(Debug, Clone, Default)]
pub struct LockStateTracker {
    sessions: Arc<Mutex<HashMap<String, SessionOps>>>,
}

impl LockStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start following `coordinator`. Tracking stops when the returned
    /// subscription is dropped.
    pub fn attach(&self, coordinator: &WriteCoordinator) -> Subscription {
        let tracker = self.clone();
        coordinator.subscribe(move |event| tracker.observe(event))
    }

    pub fn observe(&self, event: &WriteEvent) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let ops = sessions.entry(event.session_id.clone()).or_default();
        match event.kind {
            WriteEventKind::Queued => {
                ops.waiting.insert(event.op_id.clone());
            }
            WriteEventKind::Started => {
                ops.waiting.remove(&event.op_id);
                ops.holding.insert(event.op_id.clone());
            }
            WriteEventKind::Completed | WriteEventKind::Failed => {
                ops.waiting.remove(&event.op_id);
                ops.holding.remove(&event.op_id);
            }
        }
        if ops.state() == RuntimeLockState::Idle {
            sessions.remove(&event.session_id);
        }
    }

    pub fn state(&self, session_id: &str) -> RuntimeLockState {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map_or(RuntimeLockState::Idle, SessionOps::state)
    }
}
