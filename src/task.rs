use std::{fmt, future::Future, pin::Pin};

use crate::Result;

/// Boxed future produced by one delivery attempt.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// A re-runnable unit of work performing one delivery attempt per call.
///
/// The same task is handed back to the queue after a transient failure, so
/// the closure must be callable more than once.
pub struct DeliveryTask {
    label: String,
    attempt: Box<dyn Fn() -> TaskFuture + Send + Sync>,
}

impl DeliveryTask {
    /// Wraps an async closure into a task. `label` is only used in logs.
    pub fn new<F, Fut>(label: impl Into<String>, attempt: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            attempt: Box::new(move || Box::pin(attempt())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Starts a new attempt.
    pub fn run(&self) -> TaskFuture {
        (self.attempt)()
    }
}

impl fmt::Debug for DeliveryTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryTask")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::DeliveryTask;

    #[tokio::test]
    async fn each_run_is_a_fresh_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let task = DeliveryTask::new("orders", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        task.run().await.expect("first attempt");
        task.run().await.expect("second attempt");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(task.label(), "orders");
        assert!(format!("{task:?}").contains("orders"));
    }
}
