//! Per-workbook FIFO write queue.
//!
//! At most one mutation holds a workbook's lock at a time. Later writers wait in
//! arrival order and are handed the lock directly by the previous holder when it
//! settles, so the lock is never observed free while someone is waiting.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{
    EventHandler, Subscribers, Subscription, WriteContext, WriteEvent, WriteEventKind,
};
use crate::errors::CoordinatorError;

/// Coordinator tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Reject new writers once this many are already waiting on one workbook.
    /// `None` means unbounded.
    pub max_queue_depth: Option<usize>,
}

/// Result of a successful coordinated write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome<R> {
    pub result: R,
    /// Time spent queued before the mutation started.
    pub waited: Duration,
}

struct Waiter {
    ctx: WriteContext,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct WorkbookQueue {
    holder: Option<String>,
    waiting: VecDeque<Waiter>,
}

#[derive(Default)]
struct CoordinatorState {
    queues: HashMap<String, WorkbookQueue>,
    disposed: bool,
}

struct Inner {
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    subscribers: Arc<Subscribers>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: WriteEventKind, ctx: &WriteContext, error: Option<String>) {
        debug!(
            workbook_id = %ctx.workbook_id,
            session_id = %ctx.session_id,
            op_id = %ctx.op_id,
            tool = %ctx.tool_name,
            ?kind,
            "workbook write event"
        );
        self.subscribers.emit(&WriteEvent::new(kind, ctx, error));
    }

    /// Register a writer. Returns a receiver when it has to wait for the lock.
    fn enqueue(
        &self,
        ctx: &WriteContext,
    ) -> Result<Option<oneshot::Receiver<()>>, CoordinatorError> {
        let receiver = {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(CoordinatorError::Disposed);
            }
            let queue = state.queues.entry(ctx.workbook_id.clone()).or_default();
            if queue.holder.is_none() {
                queue.holder = Some(ctx.op_id.clone());
                None
            } else {
                if let Some(max) = self.config.max_queue_depth
                    && queue.waiting.len() >= max
                {
                    warn!(
                        workbook_id = %ctx.workbook_id,
                        depth = queue.waiting.len(),
                        "write queue full"
                    );
                    return Err(CoordinatorError::QueueFull {
                        workbook_id: ctx.workbook_id.clone(),
                        depth: queue.waiting.len(),
                    });
                }
                let (grant, receiver) = oneshot::channel();
                queue.waiting.push_back(Waiter {
                    ctx: ctx.clone(),
                    grant,
                });
                Some(receiver)
            }
        };
        self.emit(WriteEventKind::Queued, ctx, None);
        Ok(receiver)
    }

    /// Hand the workbook lock to the next live waiter, or free it.
    fn release(&self, workbook_id: &str) {
        let mut state = self.lock_state();
        let Some(queue) = state.queues.get_mut(workbook_id) else {
            return;
        };
        queue.holder = None;
        while let Some(waiter) = queue.waiting.pop_front() {
            // A closed receiver belongs to a writer that gave up; skip it.
            if waiter.grant.send(()).is_ok() {
                queue.holder = Some(waiter.ctx.op_id);
                return;
            }
        }
        state.queues.remove(workbook_id);
    }

    /// A queued writer went away before running.
    fn abandon(&self, ctx: &WriteContext) {
        let granted = {
            let mut state = self.lock_state();
            match state.queues.get_mut(&ctx.workbook_id) {
                Some(queue) if queue.holder.as_deref() == Some(ctx.op_id.as_str()) => true,
                Some(queue) => {
                    queue.waiting.retain(|waiter| waiter.ctx.op_id != ctx.op_id);
                    false
                }
                None => false,
            }
        };
        if granted {
            // The lock arrived after the caller stopped listening.
            self.release(&ctx.workbook_id);
        }
        self.emit(
            WriteEventKind::Failed,
            ctx,
            Some("cancelled while queued".to_string()),
        );
    }
}

/// Removes a waiting entry if the caller's future is dropped mid-wait.
struct PendingEntry<'a> {
    inner: &'a Inner,
    ctx: &'a WriteContext,
    armed: bool,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon(self.ctx);
        }
    }
}

/// Releases the workbook lock exactly once, even on panic or cancellation.
struct HeldLock<'a> {
    inner: &'a Inner,
    ctx: &'a WriteContext,
    settled: bool,
}

impl HeldLock<'_> {
    fn settle(&mut self, kind: WriteEventKind, error: Option<String>) {
        self.settled = true;
        self.inner.emit(kind, self.ctx, error);
        self.inner.release(&self.ctx.workbook_id);
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(
                WriteEventKind::Failed,
                Some("cancelled while running".to_string()),
            );
        }
    }
}

/// Serializes workbook mutations across agent sessions.
///
/// Cloning is cheap and every clone shares the same queues and subscribers.
/// Construct one at application start and pass it to every runtime.
#[derive(Clone)]
pub struct WriteCoordinator {
    inner: Arc<Inner>,
}

impl Default for WriteCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl WriteCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(CoordinatorState::default()),
                subscribers: Arc::new(Subscribers::default()),
            }),
        }
    }

    /// Register a lifecycle listener. Handlers run synchronously inside the
    /// emitting call and must not block.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&WriteEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        let id = self.inner.subscribers.add(handler);
        Subscription::new(id, &self.inner.subscribers)
    }

    /// Run `mutate` once it holds the lock for `ctx.workbook_id`.
    ///
    /// Writes to the same workbook run one at a time in arrival order; writes to
    /// different workbooks never wait on each other. A failing or panicking
    /// mutation releases the lock like a successful one and the error goes back
    /// to this caller only.
    pub async fn run_write<R, F, Fut>(
        &self,
        ctx: WriteContext,
        mutate: F,
    ) -> Result<WriteOutcome<R>, CoordinatorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let inner = self.inner.as_ref();
        let queued_at = Instant::now();

        if let Some(grant) = inner.enqueue(&ctx)? {
            let mut pending = PendingEntry {
                inner,
                ctx: &ctx,
                armed: true,
            };
            let granted = grant.await;
            pending.armed = false;
            if granted.is_err() {
                return Err(CoordinatorError::Disposed);
            }
        }

        let waited = queued_at.elapsed();
        let mut held = HeldLock {
            inner,
            ctx: &ctx,
            settled: false,
        };
        inner.emit(WriteEventKind::Started, &ctx, None);

        // A closure that panics before producing its future fails the same way
        // as one whose future panics.
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(mutate)) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(payload) => Err(payload),
        };

        match outcome {
            Ok(Ok(result)) => {
                held.settle(WriteEventKind::Completed, None);
                Ok(WriteOutcome { result, waited })
            }
            Ok(Err(err)) => {
                held.settle(WriteEventKind::Failed, Some(format!("{:#}", err)));
                Err(CoordinatorError::MutationFailed(err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                held.settle(WriteEventKind::Failed, Some(message.clone()));
                Err(CoordinatorError::MutationPanicked { message })
            }
        }
    }

    /// Like [`run_write`](Self::run_write) but gives up with
    /// [`CoordinatorError::Cancelled`] once `cancel` fires. Whether the write was
    /// still queued or already running, its lock is released and the next writer
    /// proceeds.
    pub async fn run_write_cancellable<R, F, Fut>(
        &self,
        ctx: WriteContext,
        cancel: &CancellationToken,
        mutate: F,
    ) -> Result<WriteOutcome<R>, CoordinatorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(op_id = %ctx.op_id, "workbook write cancelled by caller");
                Err(CoordinatorError::Cancelled)
            }
            outcome = self.run_write(ctx.clone(), mutate) => outcome,
        }
    }

    /// Reject all queued writers, drop every subscriber and refuse new writes.
    /// Mutations already running finish normally.
    pub fn dispose(&self) {
        let rejected: Vec<WriteContext> = {
            let mut state = self.inner.lock_state();
            state.disposed = true;
            // Dropping the waiters closes their grant channels.
            state
                .queues
                .drain()
                .flat_map(|(_, queue)| queue.waiting)
                .map(|waiter| waiter.ctx)
                .collect()
        };
        for ctx in &rejected {
            self.inner.emit(
                WriteEventKind::Failed,
                ctx,
                Some("coordinator disposed".to_string()),
            );
        }
        self.inner.subscribers.clear();
        info!(rejected = rejected.len(), "write coordinator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock_state().disposed
    }

    /// Op id currently holding the workbook's lock.
    pub fn holder(&self, workbook_id: &str) -> Option<String> {
        self.inner
            .lock_state()
            .queues
            .get(workbook_id)
            .and_then(|q| q.holder.clone())
    }

    /// Number of writers waiting behind the holder.
    pub fn queue_depth(&self, workbook_id: &str) -> usize {
        self.inner
            .lock_state()
            .queues
            .get(workbook_id)
            .map_or(0, |q| q.waiting.len())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "mutation panicked".to_string()
    }
}
