use tracing::debug;

use crate::{
    task::DeliveryTask,
    worker::{BackgroundWorker, WorkerConfig, WorkerState},
    DispatchMode, Result,
};

/// Decides where a delivery task runs.
#[derive(Clone, Debug)]
pub enum Dispatcher {
    /// Runs the task on the caller's task and returns its error.
    Immediate,
    /// Hands the task to a background worker; errors never reach the caller.
    Deferred(BackgroundWorker),
}

impl Dispatcher {
    pub fn new(mode: DispatchMode, config: WorkerConfig) -> Result<Self> {
        match mode {
            DispatchMode::Immediate => Ok(Self::Immediate),
            DispatchMode::Deferred => BackgroundWorker::new(config).map(Self::Deferred),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        match self {
            Self::Immediate => DispatchMode::Immediate,
            Self::Deferred(_) => DispatchMode::Deferred,
        }
    }

    pub async fn submit(&self, task: DeliveryTask) -> Result<()> {
        match self {
            Self::Immediate => {
                debug!(task = task.label(), "running delivery inline");
                task.run().await
            }
            Self::Deferred(worker) => {
                worker.submit(task);
                Ok(())
            }
        }
    }

    /// `true` when no deliveries are queued or in flight.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Immediate => true,
            Self::Deferred(worker) => worker.is_empty(),
        }
    }

    pub fn terminate(&self) {
        if let Self::Deferred(worker) = self {
            worker.terminate();
        }
    }

    /// Immediate dispatch has no worker and always reports `Idle`.
    pub fn state(&self) -> WorkerState {
        match self {
            Self::Immediate => WorkerState::Idle,
            Self::Deferred(worker) => worker.state(),
        }
    }

    pub fn worker(&self) -> Option<&BackgroundWorker> {
        match self {
            Self::Immediate => None,
            Self::Deferred(worker) => Some(worker),
        }
    }
}
