//! Single-consumer background delivery worker.
//!
//! The worker owns one loop spawned on the tokio runtime captured at
//! construction. Deliveries run strictly one at a time, so a client never
//! has more than one request in flight against the remote service.
//!
//! Lifecycle: `Idle → Running → Draining → Terminated`. There is no way back
//! to `Idle`; a terminated worker stays terminated.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokio::{runtime::Handle, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    queue::{Slot, TaskQueue},
    shutdown::ExitHook,
    task::DeliveryTask,
    BitcasterError, ClientOptions, Result,
};

/// Lifecycle state of a [`BackgroundWorker`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum WorkerState {
    /// No consumer loop has been spawned yet.
    Idle = 0,
    /// The loop is dequeuing and executing tasks.
    Running = 1,
    /// Termination requested; remaining tasks ahead of the stop marker run.
    Draining = 2,
    /// The loop has exited or was abandoned at shutdown.
    Terminated = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Terminated,
        }
    }

    /// `true` while a consumer loop is servicing the queue.
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Settings captured when the worker is built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    pub shutdown_timeout: Duration,
    pub backoff_unit: Duration,
}

impl From<&ClientOptions> for WorkerConfig {
    fn from(options: &ClientOptions) -> Self {
        Self {
            queue_capacity: options.queue_capacity,
            shutdown_timeout: Duration::from_millis(options.shutdown_timeout_ms),
            backoff_unit: Duration::from_millis(options.backoff_ms),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&ClientOptions::default())
    }
}

/// Count of consecutive failed attempts driving the backoff delay.
#[derive(Debug, Default)]
pub struct ErrorBudget {
    consecutive: AtomicU32,
}

impl ErrorBudget {
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }

    /// Records a failed attempt and returns the new count.
    pub fn record_failure(&self) -> u32 {
        self.consecutive
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
    }

    pub fn reset(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    /// Delay before the next dequeue: `unit * consecutive_errors`.
    pub fn delay(&self, unit: Duration) -> Duration {
        unit.saturating_mul(self.consecutive_errors())
    }
}

struct Shared {
    config: WorkerConfig,
    queue: TaskQueue,
    state: AtomicU8,
    errors: ErrorBudget,
    runtime: Handle,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Handle to the background delivery worker. Clones share the same queue.
#[derive(Clone)]
pub struct BackgroundWorker {
    shared: Arc<Shared>,
}

impl fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .field("outstanding", &self.shared.queue.outstanding())
            .finish()
    }
}

impl BackgroundWorker {
    /// Creates an idle worker bound to the current tokio runtime.
    ///
    /// Fails with [`BitcasterError::Configuration`] outside a runtime or when
    /// the queue capacity is zero.
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            BitcasterError::Configuration(format!(
                "background delivery requires a tokio runtime: {err}"
            ))
        })?;
        if config.queue_capacity == 0 {
            return Err(BitcasterError::Configuration(
                "queue_capacity must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                queue: TaskQueue::new(config.queue_capacity),
                config,
                state: AtomicU8::new(WorkerState::Idle as u8),
                errors: ErrorBudget::default(),
                runtime,
                handle: Mutex::new(None),
            }),
        })
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.shared.queue
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.shared.errors.consecutive_errors()
    }

    /// `true` when no task is queued or in flight.
    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// Spawns the consumer loop. Returns `false` if the worker already left
    /// the `Idle` state.
    pub fn start(&self) -> bool {
        if !self.shared.transition(WorkerState::Idle, WorkerState::Running) {
            return false;
        }

        let shared = Arc::clone(&self.shared);
        let handle = self.shared.runtime.spawn(async move {
            info!("background delivery worker started");
            run(&shared).await;
            shared
                .state
                .store(WorkerState::Terminated as u8, Ordering::SeqCst);
            info!(
                outstanding = shared.queue.outstanding(),
                "background delivery worker stopped"
            );
        });
        *self
            .shared
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Queues a task, starting the loop on first use.
    ///
    /// Never fails: a full queue or a stopping worker drops the task with a
    /// warning.
    pub fn submit(&self, task: DeliveryTask) {
        self.start();

        let label = task.label().to_owned();
        match self.shared.queue.push(task) {
            Ok(()) => {}
            Err(BitcasterError::WorkerStopped) => {
                warn!(task = %label, state = %self.state(), "worker is not accepting deliveries, dropping task");
            }
            Err(err) => {
                warn!(task = %label, error = %err, "background worker queue full, dropping delivery");
            }
        }
    }

    /// Requests termination after the work already queued.
    ///
    /// Safe to call repeatedly; never restarts a terminated worker.
    pub fn terminate(&self) {
        if self.begin_drain() {
            return;
        }
        if self
            .shared
            .transition(WorkerState::Idle, WorkerState::Terminated)
        {
            self.shared.queue.close();
            debug!("idle worker terminated before start");
        }
    }

    /// Registers a shutdown hook draining this worker's queue.
    pub fn exit_hook(&self) -> ExitHook {
        ExitHook::new(self.clone())
    }

    /// Moves `Running → Draining` and queues the stop marker.
    pub(crate) fn begin_drain(&self) -> bool {
        if self
            .shared
            .transition(WorkerState::Running, WorkerState::Draining)
        {
            debug!("termination requested, queueing stop marker");
            self.shared.queue.push_stop();
            true
        } else {
            false
        }
    }

    /// Gives up on the remaining work. The loop exits after its current
    /// task.
    pub(crate) fn abandon(&self) {
        self.shared.queue.close();
        self.shared
            .state
            .store(WorkerState::Terminated as u8, Ordering::SeqCst);
    }

    /// Waits for the consumer loop to exit. Returns immediately if it was
    /// never started or has already been joined.
    pub async fn join(&self) {
        let handle = self
            .shared
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "background delivery worker panicked");
            }
        }
    }
}

async fn run(shared: &Shared) {
    loop {
        if shared.state() == WorkerState::Terminated {
            debug!("worker abandoned, leaving remaining deliveries");
            break;
        }

        let task = match shared.queue.pop().await {
            Slot::Task(task) => task,
            Slot::Stop => {
                debug!("stop marker dequeued");
                break;
            }
        };

        let delay = shared.errors.delay(shared.config.backoff_unit);
        if !delay.is_zero() {
            debug!(
                task = task.label(),
                delay_ms = delay.as_millis() as u64,
                consecutive_errors = shared.errors.consecutive_errors(),
                "backing off before delivery"
            );
            sleep(delay).await;
        }

        match task.run().await {
            Ok(()) => {
                shared.errors.reset();
                debug!(task = task.label(), "delivery succeeded");
            }
            Err(err) if err.is_transient() => {
                let consecutive_errors = shared.errors.record_failure();
                warn!(
                    task = task.label(),
                    error = %err,
                    consecutive_errors,
                    "transient delivery failure, rescheduling"
                );
                let label = task.label().to_owned();
                if let Err(push_err) = shared.queue.requeue(task) {
                    error!(task = %label, error = %push_err, "could not reschedule delivery, dropping it");
                }
            }
            Err(err) => {
                let consecutive_errors = shared.errors.record_failure();
                error!(
                    task = task.label(),
                    error = %err,
                    consecutive_errors,
                    "delivery failed permanently, dropping it"
                );
            }
        }

        shared.queue.task_done();
        tokio::task::yield_now().await;
    }
}
