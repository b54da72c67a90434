//! Bounded pipeline queue
//!
//! Generic thread-safe FIFO handoff between two pipeline stages with
//! flow control. Writers block at capacity; readers block on empty until
//! an item arrives, the declared logical total is consumed (end of
//! stream), or the queue is aborted. Items are owned by the queue while
//! resident and move to the consumer on `read`.

use crate::error::{Result, TracebinError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    produced: u64,
    consumed: u64,
    /// Total items this stream will ever carry, once known.
    logical_total: Option<u64>,
    aborted: bool,
}

/// Capacity-bounded FIFO monitor.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                capacity,
                produced: 0,
                consumed: 0,
                logical_total: None,
                aborted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueue, blocking while the queue is at capacity.
    pub fn write(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        while !state.aborted && state.items.len() >= state.capacity {
            self.not_full.wait(&mut state);
        }
        if state.aborted {
            return Err(TracebinError::Cancelled);
        }

        state.items.push_back(item);
        state.produced += 1;
        drop(state);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Dequeue in FIFO order.
    ///
    /// Blocks while empty; `Ok(None)` once the declared logical total has
    /// been consumed, `Cancelled` after an abort.
    pub fn read(&self) -> Result<Option<T>> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(TracebinError::Cancelled);
            }
            if let Some(item) = state.items.pop_front() {
                state.consumed += 1;
                drop(state);
                self.not_full.notify_all();
                return Ok(Some(item));
            }
            if let Some(total) = state.logical_total {
                if state.consumed >= total {
                    return Ok(None);
                }
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Declare the total number of items this stream will carry; wakes
    /// readers that may now observe end of stream.
    pub fn set_logical_total(&self, total: u64) {
        let mut state = self.state.lock();
        state.logical_total = Some(total);
        drop(state);
        self.not_empty.notify_all();
    }

    /// Change the capacity bound; wakes writers a larger bound may
    /// unblock.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock();
        state.capacity = capacity;
        drop(state);
        self.not_full.notify_all();
    }

    /// Wake all waiters; further blocking calls return `Cancelled`.
    /// Items still queued are discarded with the queue. Idempotent.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Items enqueued so far.
    pub fn produced(&self) -> u64 {
        self.state.lock().produced
    }

    /// Items dequeued so far.
    pub fn consumed(&self) -> u64 {
        self.state.lock().consumed
    }

    /// Items currently resident.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// True once every declared item has been consumed.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state
            .logical_total
            .map_or(false, |total| state.consumed >= total)
    }
}
