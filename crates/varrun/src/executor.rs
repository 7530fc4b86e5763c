//! # Executor
//!
//! A bounded pool of workers for inbound calls.
//!
//! `start` is the only backpressure point on the inbound side: while every
//! worker is busy it does not return, and since it is awaited by the read
//! loop, the whole connection waits with it. Each wait is logged and counted.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::trace;
use varpack::Pack;

use crate::context::Context;
use crate::error::Error;
use crate::error::Result;
use crate::service::Handler;

/// Receives the result of a finished handler.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, req_num: u64, result: Box<dyn Pack + Send>);
}

pub struct Executor {
    name: String,
    capacity: usize,
    permits: Arc<Semaphore>,
    workers: Arc<DashMap<u64, Context>>,
    lifecycle: Context,
    stalls: AtomicU64,
}

impl Executor {
    /// Every worker context is a child of `lifecycle`.
    pub fn new(name: impl Into<String>, capacity: usize, lifecycle: Context) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            workers: Arc::new(DashMap::new()),
            lifecycle,
            stalls: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handlers currently holding a worker.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Number of times `start` had to wait for a worker.
    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    /// Runs `handler` on a worker once one is free.
    ///
    /// Returns as soon as the handler is spawned, not when it finishes. Fails
    /// only if the lifecycle ends while waiting.
    pub async fn start(&self, req_num: u64, handler: Handler, responder: Arc<dyn Responder>) -> Result<()> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let stalls = self.stalls.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    endpoint = %self.name,
                    req_num,
                    workers = self.capacity,
                    stalls,
                    "all workers busy, read loop waiting"
                );
                tokio::select! {
                    biased;
                    _ = self.lifecycle.cancelled() => {
                        return Err(Error::Cancelled(self.lifecycle.cause().unwrap_or_default()));
                    }
                    permit = self.permits.clone().acquire_owned() => {
                        permit.map_err(|_| Error::Protocol("worker pool closed".into()))?
                    }
                }
            }
        };

        let ctx = self.lifecycle.with_cancel();
        self.workers.insert(req_num, ctx.clone());
        trace!(endpoint = %self.name, req_num, "worker started");

        let name = self.name.clone();
        let workers = self.workers.clone();
        let lifecycle = self.lifecycle.clone();
        tokio::spawn(async move {
            let result = handler(ctx.clone()).await;
            drop(permit);
            workers.remove_if(&req_num, |_, tracked| tracked.same(&ctx));

            if lifecycle.is_cancelled() {
                debug!(endpoint = %name, req_num, "endpoint closed, dropping response");
                return;
            }
            responder.respond(req_num, result).await;
        });
        Ok(())
    }

    /// Cancels the worker running `req_num`. Does nothing if it already finished.
    pub fn cancel(&self, req_num: u64, cause: impl Into<String>) {
        // Clone out so the shard lock is not held while cancelling.
        let ctx = self.workers.get(&req_num).map(|w| w.value().clone());
        match ctx {
            Some(ctx) => {
                let cause = cause.into();
                debug!(endpoint = %self.name, req_num, cause = %cause, "cancelling worker");
                ctx.cancel(cause);
            }
            None => trace!(endpoint = %self.name, req_num, "cancel for finished worker"),
        }
    }
}
