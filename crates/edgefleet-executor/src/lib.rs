//! Remote execution for edgefleet.
//!
//! This crate provides the [`RemoteExecutor`] which runs one command or HTTP
//! probe against one node under a hard deadline and turns whatever happened
//! into an [`ExecutionResult`] value. It never retries and never raises on a
//! per-node failure; callers decide what a failure means.
//!
//! The wire work is delegated to a [`Transport`]. [`NetworkTransport`] is the
//! production implementation (system `ssh` client plus `reqwest`); tests plug
//! in simulated transports.

mod executor;
mod http;
mod network;
mod request;
mod result;
mod ssh;
mod transport;

pub use executor::RemoteExecutor;
pub use http::HttpClient;
pub use network::NetworkTransport;
pub use request::{ExecutionRequest, HttpMethod, HttpProbe, IdempotencyClass, Identity, Operation, RemoteCommand};
pub use result::{ErrorDetail, ExecStatus, ExecutionResult};
pub use ssh::{SshClient, SshOptions};
pub use transport::{CommandOutput, HttpResponse, Transport, TransportError};
