//! Update queue between the decode thread and the workers
//!
//! Multi-producer, multi-consumer, optionally bounded. Every item is stamped
//! with a log-order sequence number at enqueue. An item counts as in flight
//! from `dequeue` until the worker calls [`UpdateQueue::task_done`], so
//! [`UpdateQueue::wait_until_empty`] returns only once every queued update
//! has actually been applied.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use vecsync_core::UpdateItem;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<UpdateItem>,
    in_flight: usize,
    next_seq: u64,
    shutdown: bool,
}

impl QueueState {
    fn is_drained(&self) -> bool {
        self.items.is_empty() && self.in_flight == 0
    }
}

/// Blocking update queue
#[derive(Debug)]
pub struct UpdateQueue {
    state: Mutex<QueueState>,
    /// 0 = unbounded
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
}

impl UpdateQueue {
    /// Queue holding at most `capacity` items; 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Append `item`, blocking while a bounded queue is full.
    ///
    /// Returns the sequence number assigned to the item, or the item itself
    /// once the queue has been shut down.
    pub fn enqueue(&self, mut item: UpdateItem) -> Result<u64, UpdateItem> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(item);
            }
            if self.capacity == 0 || state.items.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut state);
        }
        state.next_seq += 1;
        item.seq = state.next_seq;
        state.items.push_back(item);
        let seq = state.next_seq;
        drop(state);
        self.not_empty.notify_one();
        Ok(seq)
    }

    /// Take the next item, blocking until one arrives.
    ///
    /// Returns `None` only when the queue is shut down and empty. The caller
    /// must call [`UpdateQueue::task_done`] once the item is handled.
    pub fn dequeue(&self) -> Option<UpdateItem> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.in_flight += 1;
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.shutdown {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Take the next item without blocking.
    ///
    /// Items taken this way are discarded rather than applied, so they are
    /// not counted as in flight.
    pub fn try_dequeue(&self) -> Option<UpdateItem> {
        let mut state = self.state.lock();
        let item = state.items.pop_front()?;
        let drained = state.is_drained();
        drop(state);
        self.not_full.notify_one();
        if drained {
            self.drained.notify_all();
        }
        Some(item)
    }

    /// Mark one dequeued item as handled.
    pub fn task_done(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.is_drained() {
            drop(state);
            self.drained.notify_all();
        }
    }

    /// Block until nothing is queued or in flight.
    pub fn wait_until_empty(&self) {
        let mut state = self.state.lock();
        while !state.is_drained() {
            self.drained.wait(&mut state);
        }
    }

    /// Refuse new items and wake every blocked producer and consumer.
    ///
    /// Items already queued are still handed out by `dequeue`.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether [`UpdateQueue::shutdown`] was called
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Items waiting to be dequeued
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no item is waiting
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Items dequeued but not yet marked done
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Configured bound, 0 when unbounded
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
