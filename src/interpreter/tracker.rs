//! Concurrency / quiescence tracker
//!
//! Records, per call stack, the work that is still in flight so the session
//! can tell when a program has gone quiet. Every invocation running on a call
//! stack holds a [`PendingGuard`]; fire-and-forget invocations additionally
//! leave their join handle here so `drain` can await them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::frames::CallStackId;

#[derive(Debug, Default)]
struct StackRecord {
    outstanding: Vec<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
pub struct Tracker {
    stacks: Mutex<HashMap<CallStackId, StackRecord>>,
    entry_active: AtomicBool,
    extern_calls: AtomicUsize,
    settled: Notify,
}

/// Marks one invocation as running until dropped
#[derive(Debug)]
pub struct PendingGuard {
    tracker: Arc<Tracker>,
    pending: Arc<AtomicUsize>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.tracker.settled.notify_waiters();
    }
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count an invocation on `id` as in flight until the guard drops
    pub fn task_started(self: &Arc<Self>, id: CallStackId) -> PendingGuard {
        let pending = {
            let mut stacks = self.stacks.lock();
            let record = stacks.entry(id).or_default();
            record.pending.fetch_add(1, Ordering::SeqCst);
            Arc::clone(&record.pending)
        };
        PendingGuard {
            tracker: Arc::clone(self),
            pending,
        }
    }

    /// Keep the handle of a fire-and-forget invocation started on `id`
    pub fn track(&self, id: CallStackId, handle: JoinHandle<()>) {
        self.stacks
            .lock()
            .entry(id)
            .or_default()
            .outstanding
            .push(handle);
    }

    pub fn set_entry_active(&self, active: bool) {
        self.entry_active.store(active, Ordering::SeqCst);
    }

    pub fn extern_started(&self) {
        self.extern_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn extern_finished(&self) {
        let _ = self
            .extern_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn extern_calls(&self) -> usize {
        self.extern_calls.load(Ordering::SeqCst)
    }

    /// True when no entry invocation, no host call and no started
    /// invocation on any call stack is still running
    pub fn is_idle_candidate(&self) -> bool {
        if self.entry_active.load(Ordering::SeqCst) || self.extern_calls() > 0 {
            return false;
        }
        self.stacks
            .lock()
            .values()
            .all(|record| record.pending.load(Ordering::SeqCst) == 0)
    }

    /// Number of call stacks with a record
    pub fn stack_count(&self) -> usize {
        self.stacks.lock().len()
    }

    /// Await everything started on `id`, including work started while
    /// waiting, then drop its record.
    pub async fn drain(&self, id: CallStackId) {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            let handles = {
                let mut stacks = self.stacks.lock();
                let Some(record) = stacks.get_mut(&id) else {
                    return;
                };
                let handles = std::mem::take(&mut record.outstanding);
                if handles.is_empty() && record.pending.load(Ordering::SeqCst) == 0 {
                    stacks.remove(&id);
                    debug!(call_stack = %id, "call stack drained");
                    return;
                }
                handles
            };

            if handles.is_empty() {
                settled.await;
                continue;
            }

            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(call_stack = %id, error = %err, "tracked invocation did not complete");
                }
            }
        }
    }

    /// Drain every known call stack until none is left
    pub async fn drain_all(&self) {
        loop {
            let ids: Vec<CallStackId> = self.stacks.lock().keys().copied().collect();
            if ids.is_empty() {
                return;
            }
            for id in ids {
                self.drain(id).await;
            }
        }
    }
}
