//! A single agent session's conversation.
//!
//! The message list has one owner. Readers take snapshots; the only bulk
//! mutation is [`ConversationSession::commit_rewrite`], which swaps in a
//! compacted list in one step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cellpilot_common::{ConversationMessage, ModelInfo};
use tracing::debug;

use crate::errors::CompactionError;

#[derive(Debug, Default)]
struct SessionState {
    messages: Vec<ConversationMessage>,
    /// Bumped whenever the list is replaced wholesale.
    generation: u64,
}

/// Messages as of one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub messages: Vec<ConversationMessage>,
    pub generation: u64,
}

#[derive(Debug)]
pub struct ConversationSession {
    id: String,
    model: ModelInfo,
    state: Mutex<SessionState>,
    busy: AtomicBool,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>, model: ModelInfo, messages: Vec<ConversationMessage>) -> Self {
        Self {
            id: id.into(),
            model,
            state: Mutex::new(SessionState {
                messages,
                generation: 0,
            }),
            busy: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.state().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, message: ConversationMessage) {
        self.state().messages.push(message);
    }

    /// Replace the whole list, e.g. when a stored session is reloaded.
    pub fn replace_all(&self, messages: Vec<ConversationMessage>) {
        let mut state = self.state();
        state.messages = messages;
        state.generation += 1;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            messages: state.messages.clone(),
            generation: state.generation,
        }
    }

    /// Swap in `rewritten` as the replacement for `snapshot`.
    ///
    /// Messages appended after the snapshot was taken are kept after the
    /// rewritten list. If the list was replaced in the meantime nothing changes
    /// and `ConversationChanged` is returned. Returns how many late messages
    /// were carried over.
    pub fn commit_rewrite(
        &self,
        snapshot: &SessionSnapshot,
        mut rewritten: Vec<ConversationMessage>,
    ) -> Result<usize, CompactionError> {
        let mut state = self.state();
        let base = snapshot.messages.len();
        if state.generation != snapshot.generation
            || state.messages.len() < base
            || state.messages[..base] != snapshot.messages[..]
        {
            return Err(CompactionError::ConversationChanged);
        }

        let appended = state.messages.split_off(base);
        let carried = appended.len();
        rewritten.extend(appended);
        state.messages = rewritten;
        state.generation += 1;
        debug!(session_id = %self.id, carried, "conversation replaced");
        Ok(carried)
    }

    /// Claim the session for one compaction run. `None` if one is in flight.
    pub fn try_begin_compaction(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { flag: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears the session's busy flag when dropped.
#[must_use]
#[derive(Debug)]
pub struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
