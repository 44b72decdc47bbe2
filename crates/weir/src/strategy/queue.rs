//! Bounded input queue with overflow policies.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::pipe::Item;
use crate::strategy::QueuePolicy;

/// What happened to a pushed item.
pub(crate) enum PushOutcome {
    /// The item is queued.
    Queued,
    /// The oldest queued item (with its sequence number) was discarded to
    /// make room.
    DroppedOldest(u64, Item),
    /// The arriving item was discarded.
    DroppedNewest(u64, Item),
}

struct QueueState {
    items: VecDeque<(u64, Item)>,
    closed: bool,
}

/// A sequence-stamped item queue between a dispatcher and a worker pool.
///
/// With [`QueuePolicy::Block`] a full queue suspends the pusher until a
/// worker dequeues; the drop policies discard instead. Closing wakes all
/// waiters; pops drain remaining items first.
pub(crate) struct PolicyQueue {
    state: Mutex<QueueState>,
    capacity: Option<usize>,
    policy: QueuePolicy,
    /// Wakes poppers when an item arrives or the queue closes.
    items_ready: Notify,
    /// Wakes blocked pushers when space frees up.
    space_ready: Notify,
}

impl PolicyQueue {
    pub(crate) fn new(capacity: Option<usize>, policy: QueuePolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity,
            policy,
            items_ready: Notify::new(),
            space_ready: Notify::new(),
        }
    }

    /// Enqueues an item, honoring the overflow policy.
    ///
    /// Fails once the queue is closed or the run is cancelled.
    pub(crate) async fn push(
        &self,
        seq: u64,
        item: Item,
        ctx: &crate::engine::PipelineContext,
    ) -> Result<PushOutcome> {
        loop {
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if state.closed {
                    return Err(Error::Internal("push into closed queue".into()));
                }
                let full = self
                    .capacity
                    .is_some_and(|cap| state.items.len() >= cap);
                if !full {
                    state.items.push_back((seq, item));
                    drop(state);
                    self.items_ready.notify_one();
                    return Ok(PushOutcome::Queued);
                }
                match self.policy {
                    QueuePolicy::Block => {}
                    QueuePolicy::DropOldest => {
                        let (dropped_seq, dropped) =
                            state.items.pop_front().expect("full queue has a front");
                        state.items.push_back((seq, item));
                        drop(state);
                        self.items_ready.notify_one();
                        return Ok(PushOutcome::DroppedOldest(dropped_seq, dropped));
                    }
                    QueuePolicy::DropNewest => {
                        return Ok(PushOutcome::DroppedNewest(seq, item));
                    }
                }
            }
            tokio::select! {
                biased;

                () = ctx.cancelled() => return Err(Error::Cancelled),
                () = self.space_ready.notified() => {}
            }
        }
    }

    /// Dequeues the next item; `None` once the queue is closed and drained
    /// or the run is cancelled.
    pub(crate) async fn pop(&self, ctx: &crate::engine::PipelineContext) -> Option<(u64, Item)> {
        loop {
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if let Some(entry) = state.items.pop_front() {
                    let more = !state.items.is_empty();
                    drop(state);
                    self.space_ready.notify_one();
                    if more {
                        self.items_ready.notify_one();
                    }
                    return Some(entry);
                }
                if state.closed {
                    return None;
                }
            }
            tokio::select! {
                biased;

                () = ctx.cancelled() => return None,
                () = self.items_ready.notified() => {}
            }
        }
    }

    /// Closes the queue; remaining items can still be popped.
    pub(crate) fn close(&self) {
        self.state.lock().expect("queue lock poisoned").closed = true;
        self.items_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    /// Current queue length.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").items.len()
    }
}
