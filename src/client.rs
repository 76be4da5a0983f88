use std::fmt;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{
    check_response,
    dispatch::Dispatcher,
    shutdown::{ExitHook, ShutdownReport},
    task::DeliveryTask,
    worker::{WorkerConfig, WorkerState},
    ClientOptions, Endpoint, Response, Result, Transport,
};

/// Client for a single Bitcaster application.
///
/// Deliveries go through the dispatcher chosen by
/// [`ClientOptions::dispatch`]: inline by default, or through a bounded
/// background queue with [`DispatchMode::Deferred`](crate::DispatchMode).
pub struct BitcasterClient {
    endpoint: Endpoint,
    transport: Transport,
    dispatcher: Dispatcher,
    options: ClientOptions,
}

impl fmt::Debug for BitcasterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcasterClient")
            .field("endpoint", &self.endpoint)
            .field("dispatcher", &self.dispatcher)
            .field("options", &self.options)
            .finish()
    }
}

impl BitcasterClient {
    /// Creates a client from an application endpoint URL with default
    /// options (immediate dispatch).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bitcaster_sdk::BitcasterClient;
    ///
    /// let client = BitcasterClient::new("https://token@bitcaster.example/api/o/acme/a/7/")
    ///     .expect("valid endpoint");
    /// ```
    pub fn new(aep: &str) -> Result<Self> {
        Self::from_endpoint(Endpoint::parse(aep)?, ClientOptions::default())
    }

    /// Creates a client from the `BITCASTER_AEP` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::from_endpoint(Endpoint::from_env()?, ClientOptions::default())
    }

    /// Creates a client from an already parsed endpoint.
    ///
    /// Deferred dispatch must be requested from inside a tokio runtime; the
    /// background worker is bound to it.
    pub fn from_endpoint(endpoint: Endpoint, options: ClientOptions) -> Result<Self> {
        let transport = Transport::new(
            &endpoint.base_url(),
            &endpoint.token,
            options.request_timeout(),
            options.debug,
        )?;
        let dispatcher = Dispatcher::new(options.dispatch, WorkerConfig::from(&options))?;

        Ok(Self {
            endpoint,
            transport,
            dispatcher,
            options,
        })
    }

    /// Rebuilds the client with new options.
    ///
    /// Any worker owned by the previous configuration is terminated.
    pub fn with_options(self, opts: ClientOptions) -> Result<Self> {
        self.dispatcher.terminate();
        Self::from_endpoint(self.endpoint.clone(), opts)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Checks that the server is reachable and the token accepted.
    pub async fn ping(&self) -> Result<()> {
        let response = self.transport.get("/api/system/ping/").await?;
        check_response(response).map(|_| ())
    }

    /// Delivers `payload` to `stream` right away and returns the response.
    ///
    /// Always bypasses the queue, whatever the dispatch mode.
    pub async fn send(&self, stream: &str, payload: &JsonValue) -> Result<Response> {
        if self.options.debug {
            debug!(stream, "sending to stream");
        }
        self.transport.trigger(stream, payload).await
    }

    /// Submits a delivery through the configured dispatcher.
    ///
    /// In deferred mode this returns as soon as the delivery is queued and
    /// never fails; the worker retries transient failures and logs the
    /// rest. In immediate mode the delivery error is returned.
    pub async fn enqueue(&self, stream: &str, payload: JsonValue) -> Result<()> {
        let transport = self.transport.clone();
        let target = stream.to_owned();
        let task = DeliveryTask::new(stream, move || {
            let transport = transport.clone();
            let stream = target.clone();
            let payload = payload.clone();
            async move { transport.trigger(&stream, &payload).await.map(|_| ()) }
        });
        self.dispatcher.submit(task).await
    }

    /// `true` when no delivery is queued or in flight.
    pub fn is_queue_empty(&self) -> bool {
        self.dispatcher.is_empty()
    }

    pub fn state(&self) -> WorkerState {
        self.dispatcher.state()
    }

    /// Stops the background worker after the already queued work.
    pub fn terminate(&self) {
        self.dispatcher.terminate();
    }

    /// Registers an exit hook for the background worker, if there is one.
    pub fn exit_hook(&self) -> Option<ExitHook> {
        self.dispatcher.worker().map(|worker| worker.exit_hook())
    }

    /// Drains pending deliveries, waiting at most
    /// [`ClientOptions::shutdown_timeout_ms`].
    pub async fn shutdown(&self) -> ShutdownReport {
        match self.exit_hook() {
            Some(hook) => hook.fire().await,
            None => ShutdownReport::default(),
        }
    }

    /// Deliveries a live worker still holds, if any.
    fn pending_deliveries(&self) -> Option<usize> {
        let worker = self.dispatcher.worker()?;
        let outstanding = worker.queue().outstanding();
        (worker.state().is_alive() && outstanding > 0).then_some(outstanding)
    }
}

impl Drop for BitcasterClient {
    fn drop(&mut self) {
        if let Some(outstanding) = self.pending_deliveries() {
            warn!(
                outstanding,
                state = %self.state(),
                "client dropped with deliveries pending; call shutdown() to flush them"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::BitcasterClient;
    use crate::{task::DeliveryTask, BitcasterError, ClientOptions, DispatchMode, WorkerState};

    const AEP: &str = "https://secret-token@bitcaster.example/api/o/acme/a/7/";

    #[test]
    fn new_uses_immediate_dispatch() {
        let client = BitcasterClient::new(AEP).expect("valid endpoint");
        assert_eq!(client.options().dispatch, DispatchMode::Immediate);
        assert_eq!(client.state(), WorkerState::Idle);
        assert!(client.is_queue_empty());
        assert!(client.exit_hook().is_none());
        assert_eq!(
            client.transport().base_url(),
            "https://bitcaster.example/api/o/acme/a/7/"
        );
    }

    #[test]
    fn deferred_outside_runtime_is_a_configuration_error() {
        let client = BitcasterClient::new(AEP).expect("valid endpoint");
        let err = client
            .with_options(ClientOptions {
                dispatch: DispatchMode::Deferred,
                ..ClientOptions::default()
            })
            .expect_err("no runtime");
        assert!(matches!(err, BitcasterError::Configuration(_)));
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let err = BitcasterClient::new("https://bitcaster.example/").expect_err("no token");
        assert!(matches!(err, BitcasterError::Configuration(_)));
    }

    #[test]
    fn debug_redacts_token() {
        let client = BitcasterClient::new(AEP).expect("valid endpoint");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[tokio::test]
    async fn pending_deliveries_are_reported_while_worker_is_alive() {
        let client = BitcasterClient::new(AEP)
            .expect("valid endpoint")
            .with_options(ClientOptions {
                dispatch: DispatchMode::Deferred,
                ..ClientOptions::default()
            })
            .expect("deferred client");
        assert_eq!(client.pending_deliveries(), None);

        client
            .dispatcher
            .submit(DeliveryTask::new("stuck", || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }))
            .await
            .expect("submit never fails in deferred mode");

        assert_eq!(client.state(), WorkerState::Running);
        assert_eq!(client.pending_deliveries(), Some(1));
        drop(client);
    }

    #[tokio::test]
    async fn nothing_is_pending_after_a_clean_shutdown() {
        let client = BitcasterClient::new(AEP)
            .expect("valid endpoint")
            .with_options(ClientOptions {
                dispatch: DispatchMode::Deferred,
                ..ClientOptions::default()
            })
            .expect("deferred client");
        client
            .dispatcher
            .submit(DeliveryTask::new("quick", || async { Ok(()) }))
            .await
            .expect("submit");

        assert!(client.shutdown().await.is_clean());
        assert_eq!(client.state(), WorkerState::Terminated);
        assert_eq!(client.pending_deliveries(), None);
    }
}
