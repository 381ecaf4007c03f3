//! Work and failure queues.
//!
//! `WorkQueue` is a multi-consumer FIFO with task accounting: every `put`
//! must be matched by a `task_done` once the dequeued record has been routed,
//! and `join` resolves when nothing is queued or in flight. `close` is the
//! explicit end-of-batch signal that releases blocked consumers.
//!
//! Locks are held only for the duration of a queue operation; waiting is
//! done on `Notify` outside the lock.

use crate::types::WhoisRecord;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct WorkState {
    items: VecDeque<WhoisRecord>,
    /// Records queued or handed out and not yet acknowledged
    unfinished: usize,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<WorkState>,
    item_ready: Notify,
    all_done: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, WorkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a record and wake one waiting consumer.
    pub fn put(&self, record: WhoisRecord) {
        {
            let mut state = self.state();
            state.items.push_back(record);
            state.unfinished += 1;
        }
        self.item_ready.notify_one();
    }

    /// Dequeue the next record, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn get(&self) -> Option<WhoisRecord> {
        loop {
            let notified = self.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(record) = state.items.pop_front() {
                    return Some(record);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Acknowledge one dequeued record.
    pub fn task_done(&self) {
        let finished = {
            let mut state = self.state();
            state.unfinished = state.unfinished.saturating_sub(1);
            state.unfinished == 0
        };
        if finished {
            self.all_done.notify_waiters();
        }
    }

    /// Wait until every queued record has been acknowledged.
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state().unfinished == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Signal that no more work will arrive; wakes every blocked `get`.
    pub fn close(&self) {
        self.state().closed = true;
        self.item_ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    /// Records not yet acknowledged, including those in flight.
    pub fn unfinished(&self) -> usize {
        self.state().unfinished
    }

    /// Copy of every queued record, front first.
    pub fn snapshot(&self) -> Vec<WhoisRecord> {
        self.state().items.iter().cloned().collect()
    }

    /// Remove and return every queued record. Their accounting is released.
    pub fn drain_pending(&self) -> Vec<WhoisRecord> {
        let (records, finished) = {
            let mut state = self.state();
            let records: Vec<WhoisRecord> = state.items.drain(..).collect();
            state.unfinished = state.unfinished.saturating_sub(records.len());
            (records, state.unfinished == 0)
        };
        if finished {
            self.all_done.notify_waiters();
        }
        records
    }
}

/// Terminal sink for records that exhausted their retries.
#[derive(Debug, Default)]
pub struct FailureQueue {
    items: Mutex<VecDeque<WhoisRecord>>,
}

impl FailureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<WhoisRecord>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, record: WhoisRecord) {
        self.items().push_back(record);
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Take every failed record, oldest first.
    pub fn drain(&self) -> Vec<WhoisRecord> {
        self.items().drain(..).collect()
    }
}
