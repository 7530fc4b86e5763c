//! # VarRun
//!
//! Endpoints, workers and servers for multiplexed RPC over one byte stream.
//!
//! An `Endpoint` owns a connection. It runs the services registered on it for
//! the counterpart, and makes calls into the counterpart's services, with
//! both directions sharing the one stream. A `Server` stamps out an endpoint
//! per accepted connection.
//!
//! Concurrency is bounded in both directions by explicit configuration:
//! `parallel_workers` inbound calls execute at once, and at most
//! `parallel_client_calls` outbound calls are outstanding at once.

pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod listener;
pub mod server;
pub mod service;

pub use config::EndpointConfig;
pub use context::Context;
pub use endpoint::Connection;
pub use endpoint::Endpoint;
pub use endpoint::EndpointStats;
pub use error::Error;
pub use error::Result;
pub use listener::Listener;
pub use server::Server;
pub use service::FuncCall;
pub use service::Handler;
pub use service::Method;
pub use service::RemoteError;
pub use service::Reply;
pub use service::Service;
pub use service::ServiceTable;

#[cfg(test)]
mod tests;
