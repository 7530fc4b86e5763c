//! # Server
//!
//! Accepts connections and gives each one its own `Endpoint`, built from a
//! shared template config.
//!
//! ## Philosophy
//!
//! - **Many Listeners**: `serve` may run on any number of listeners at once;
//!   all of them feed the same set of endpoints.
//! - **Self-Pruning**: an endpoint that closes on its own is dropped from
//!   tracking as soon as it stops.
//! - **Orderly Stop**: `close` stops accepting first, then closes every live
//!   endpoint, then waits for all of it to unwind.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::EndpointConfig;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::error::Result;
use crate::listener::Listener;

#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: EndpointConfig,
    closing: AtomicBool,
    shutdown: CancellationToken,
    listeners: TaskTracker,
    watchers: TaskTracker,
    endpoints: DashMap<u64, Endpoint>,
    next_id: AtomicU64,
}

impl Server {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                closing: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                listeners: TaskTracker::new(),
                watchers: TaskTracker::new(),
                endpoints: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Accepts connections from `listener` until the server closes.
    ///
    /// Always returns an error: `ServerClosed` after `close`, or the accept
    /// failure that stopped it.
    pub async fn serve<L: Listener>(&self, mut listener: L) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::ServerClosed);
        }
        let _running = self.inner.listeners.token();
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => return Err(Error::ServerClosed),
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((conn, peer)) => self.adopt(conn, peer),
                Err(e) => {
                    warn!(server = %self.inner.config.name, error = %e, "accept failed");
                    return Err(e.into());
                }
            }
        }
    }

    fn adopt<C: crate::endpoint::Connection>(&self, conn: C, peer: String) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}#{}", self.inner.config.name, id);
        let endpoint = Endpoint::new(conn, self.inner.config.clone().name(name));
        info!(endpoint = %endpoint.name(), peer = %peer, "accepted connection");
        self.inner.endpoints.insert(id, endpoint.clone());

        let inner = self.inner.clone();
        self.inner.watchers.spawn(async move {
            // Accepted just as the server began closing; it may have missed the sweep.
            if inner.shutdown.is_cancelled() {
                if let Err(e) = endpoint.close().await {
                    warn!(endpoint = %endpoint.name(), error = %e, "late endpoint did not close cleanly");
                }
            }
            let cause = endpoint.closed().await;
            debug!(endpoint = %endpoint.name(), cause = %cause, "connection finished");
            inner.endpoints.remove(&id);
        });
    }

    /// Endpoints that are currently connected.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.inner.endpoints.iter().map(|e| e.value().clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Stops every listener, closes every endpoint and waits for both.
    ///
    /// Endpoints that were already closing are not reported as errors.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }
        info!(server = %self.inner.config.name, "server closing");
        self.inner.shutdown.cancel();
        self.inner.listeners.close();
        self.inner.listeners.wait().await;

        let endpoints = self.endpoints();
        let results = join_all(endpoints.iter().map(|e| e.close())).await;
        let mut errors: Vec<Error> = results
            .into_iter()
            .filter_map(|r| r.err())
            .filter(|e| !matches!(e, Error::AlreadyClosed))
            .collect();

        self.inner.watchers.close();
        self.inner.watchers.wait().await;

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}
