//! Delayed work queue
//!
//! Holds at most one pending entry per operation. An operation handed to a
//! worker is marked processing and is not handed out again until the worker
//! calls [`WorkQueue::done`]; entries added meanwhile wait for that. A queued
//! delay is never shortened, so a rescheduled operation is not picked up
//! before its delay has passed.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<Uuid, Instant>,
    processing: HashSet<Uuid>,
    shut_down: bool,
}

/// Deduplicating delay queue shared by workers
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an operation for immediate processing
    pub fn add(&self, operation_id: Uuid) {
        self.add_after(operation_id, Duration::ZERO);
    }

    /// Queue an operation once `delay` has passed
    ///
    /// If the operation is already pending, the later due time wins.
    pub fn add_after(&self, operation_id: Uuid, delay: Duration) {
        let due = Instant::now() + delay;
        {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            state
                .pending
                .entry(operation_id)
                .and_modify(|pending| *pending = (*pending).max(due))
                .or_insert(due);
        }
        self.notify.notify_waiters();
    }

    /// Wait for the next due operation; `None` once shut down
    pub async fn next(&self) -> Option<Uuid> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait_until = {
                let mut state = self.lock();
                if state.shut_down {
                    return None;
                }

                let earliest = state
                    .pending
                    .iter()
                    .filter(|(id, _)| !state.processing.contains(*id))
                    .min_by_key(|(_, due)| **due)
                    .map(|(id, due)| (*id, *due));

                match earliest {
                    Some((id, due)) if due <= Instant::now() => {
                        state.pending.remove(&id);
                        state.processing.insert(id);
                        return Some(id);
                    }
                    Some((_, due)) => Some(due),
                    None => None,
                }
            };

            match wait_until {
                Some(due) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release an operation handed out by [`WorkQueue::next`]
    pub fn done(&self, operation_id: Uuid) {
        self.lock().processing.remove(&operation_id);
        self.notify.notify_waiters();
    }

    /// Stop handing out work; pending entries are dropped
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shut_down = true;
            state.pending.clear();
        }
        self.notify.notify_waiters();
    }

    /// Number of pending entries, including those not yet due
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self, operation_id: Uuid) -> bool {
        self.lock().processing.contains(&operation_id)
    }
}
