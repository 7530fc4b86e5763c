//! # Pending-Call Ledger
//!
//! Correlates outbound requests with their responses.
//!
//! ## Invariants
//! - **Fixed Pool**: request numbers come from `0..capacity`. A number is
//!   held by at most one outstanding call and goes back to the pool only when
//!   its response is resolved or its request is abandoned before sending.
//! - **Fair Wake**: every release adds exactly one permit, so exactly one
//!   blocked `lease` proceeds.

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::sync::oneshot;
use varpack::Decoder;
use varpack::Unpack;

use crate::context::Context;
use crate::error::Error;
use crate::error::Result;

/// Where a response payload goes once its header has been read.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Decodes the payload off the connection and hands it to the caller.
    ///
    /// The payload must be consumed even when nobody is waiting any more.
    async fn deliver(self: Box<Self>, dec: &mut Decoder) -> varpack::Result<()>;
}

/// Decodes an `R` and sends it down a oneshot.
pub struct TypedSink<R> {
    tx: oneshot::Sender<varpack::Result<R>>,
}

impl<R> TypedSink<R> {
    pub fn new(tx: oneshot::Sender<varpack::Result<R>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl<R: Unpack + 'static> ResponseSink for TypedSink<R> {
    async fn deliver(self: Box<Self>, dec: &mut Decoder) -> varpack::Result<()> {
        let result = R::unpack(dec).await;
        let outcome = match &result {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone()),
        };
        // A caller that stopped waiting is not an error.
        let _ = self.tx.send(result);
        outcome
    }
}

pub struct Ledger {
    capacity: usize,
    permits: Semaphore,
    free: Mutex<Vec<u64>>,
    pending: DashMap<u64, Box<dyn ResponseSink>>,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            permits: Semaphore::new(capacity),
            // Reversed so slot 0 is handed out first.
            free: Mutex::new((0..capacity as u64).rev().collect()),
            pending: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently leased.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Waits for a free slot, or fails once `ctx` is cancelled.
    ///
    /// The returned lease gives the slot back when dropped, unless it was
    /// `commit`ted first.
    pub async fn lease(&self, ctx: &Context) -> Result<Lease<'_>> {
        let permit = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                return Err(Error::Cancelled(ctx.cause().unwrap_or_default()));
            }
            permit = self.permits.acquire() => {
                permit.map_err(|_| Error::Protocol("call slot pool closed".into()))?
            }
        };
        permit.forget();

        let slot = self.free_slots().pop();
        match slot {
            Some(slot) => Ok(Lease { ledger: self, slot, held: true }),
            None => {
                self.permits.add_permits(1);
                Err(Error::Protocol("call slot pool out of sync".into()))
            }
        }
    }

    /// Registers the sink for a leased slot.
    pub fn record(&self, slot: u64, sink: Box<dyn ResponseSink>) {
        self.pending.insert(slot, sink);
    }

    /// Takes the sink for `slot` and frees the slot.
    pub fn resolve(&self, slot: u64) -> Result<Box<dyn ResponseSink>> {
        let (_, sink) = self
            .pending
            .remove(&slot)
            .ok_or_else(|| Error::Protocol(format!("response for unknown request {}", slot)))?;
        self.release(slot);
        Ok(sink)
    }

    /// Frees a slot whose request never made it onto the wire.
    pub fn abandon(&self, slot: u64) {
        self.pending.remove(&slot);
        self.release(slot);
    }

    fn release(&self, slot: u64) {
        self.free_slots().push(slot);
        self.permits.add_permits(1);
    }

    fn free_slots(&self) -> std::sync::MutexGuard<'_, Vec<u64>> {
        // The list is only ever pushed or popped; a poisoned guard is still sound.
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A leased request number.
pub struct Lease<'a> {
    ledger: &'a Ledger,
    slot: u64,
    held: bool,
}

impl Lease<'_> {
    pub fn slot(&self) -> u64 {
        self.slot
    }

    /// Keeps the slot leased past this guard; it is freed by `resolve` or
    /// `abandon` from here on.
    pub fn commit(mut self) -> u64 {
        self.held = false;
        self.slot
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if self.held {
            self.ledger.abandon(self.slot);
        }
    }
}
