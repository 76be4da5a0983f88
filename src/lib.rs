//! `bitcaster-sdk` is an async client for the Bitcaster notification API.
//!
//! Events are delivered to a stream with [`BitcasterClient::send`] or
//! [`BitcasterClient::enqueue`]. With [`DispatchMode::Deferred`] deliveries
//! go through a bounded queue served by a single background worker that
//! retries transient failures; [`BitcasterClient::shutdown`] drains it
//! before the host exits.

mod client;
mod dispatch;
mod endpoint;
mod error;
mod options;
mod queue;
mod shutdown;
mod task;
mod transport;
mod worker;

pub use client::BitcasterClient;
pub use dispatch::Dispatcher;
pub use endpoint::{Endpoint, ENDPOINT_ENV};
pub use error::BitcasterError;
pub use options::{ClientOptions, DispatchMode};
pub use queue::TaskQueue;
pub use shutdown::{ExitHook, ShutdownReport};
pub use task::{DeliveryTask, TaskFuture};
pub use transport::{check_response, Response, Transport};
pub use worker::{BackgroundWorker, ErrorBudget, WorkerConfig, WorkerState};

pub type Result<T> = std::result::Result<T, BitcasterError>;
