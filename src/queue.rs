use std::{
    collections::VecDeque,
    pin::pin,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    sync::Notify,
    time::{timeout_at, Instant},
};

use crate::{task::DeliveryTask, BitcasterError, Result};

/// Item handed to the consumer.
#[derive(Debug)]
pub(crate) enum Slot {
    Task(DeliveryTask),
    /// Termination marker. Not counted against capacity or outstanding work.
    Stop,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Slot>,
    /// Tasks currently sitting in `items`.
    queued: usize,
    /// Queued tasks plus the one being executed.
    outstanding: usize,
    /// Set once the worker stops accepting new tasks.
    closed: bool,
}

/// Bounded FIFO of delivery tasks shared by the producer and the worker.
///
/// Pushing never blocks: a full queue rejects the task. Popping waits until
/// an item is available.
#[derive(Debug)]
pub struct TaskQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    available: Notify,
    drained: Notify,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            drained: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a task at the tail.
    ///
    /// Fails with [`BitcasterError::WorkerStopped`] once the queue is closed
    /// and with [`BitcasterError::QueueFull`] when it is at capacity.
    pub fn push(&self, task: DeliveryTask) -> Result<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(BitcasterError::WorkerStopped);
            }
            if state.queued >= self.capacity {
                return Err(BitcasterError::QueueFull {
                    capacity: self.capacity,
                });
            }
            state.items.push_back(Slot::Task(task));
            state.queued += 1;
            state.outstanding += 1;
        }
        self.available.notify_one();
        Ok(())
    }

    /// Puts a transiently failed task back for another attempt.
    ///
    /// Still accepted after the queue is closed, ahead of the stop marker so
    /// the drain keeps retrying it.
    pub(crate) fn requeue(&self, task: DeliveryTask) -> Result<()> {
        {
            let mut state = self.lock();
            if state.queued >= self.capacity {
                return Err(BitcasterError::QueueFull {
                    capacity: self.capacity,
                });
            }
            match state.items.iter().position(|slot| matches!(slot, Slot::Stop)) {
                Some(stop) => state.items.insert(stop, Slot::Task(task)),
                None => state.items.push_back(Slot::Task(task)),
            }
            state.queued += 1;
            state.outstanding += 1;
        }
        self.available.notify_one();
        Ok(())
    }

    /// Rejects further pushes. Tasks already queued stay.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
    }

    /// Closes the queue and appends the stop marker in one step, so no task
    /// can land behind the marker.
    pub(crate) fn push_stop(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.items.push_back(Slot::Stop);
        }
        self.available.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Waits for the head of the queue.
    pub(crate) async fn pop(&self) -> Slot {
        loop {
            {
                let mut state = self.lock();
                if let Some(slot) = state.items.pop_front() {
                    if matches!(slot, Slot::Task(_)) {
                        state.queued -= 1;
                    }
                    return slot;
                }
            }
            // A push racing with this point leaves a permit behind, so the
            // wakeup is not lost.
            self.available.notified().await;
        }
    }

    /// Marks a previously popped task as finished.
    pub(crate) fn task_done(&self) {
        let drained = {
            let mut state = self.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            state.outstanding == 0
        };
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Number of tasks waiting in the queue (excludes the one in flight).
    pub fn len(&self) -> usize {
        self.lock().queued
    }

    /// Number of tasks queued or in flight.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// `true` when nothing is queued or in flight.
    pub fn is_empty(&self) -> bool {
        self.outstanding() == 0
    }

    /// Waits until no task is outstanding. Returns `false` on timeout.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();
            if self.is_empty() {
                return true;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.is_empty();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
