//! # Services
//!
//! The seam between the runtime and generated (or hand-written) stubs.
//!
//! The runtime knows a service only as an id and a lookup from function id
//! to a `FuncCall`. A `FuncCall` reads its own arguments off the connection
//! and hands back a `Handler`, a closure the executor runs on a worker.
//!
//! `ServiceTable`, `Method` and `Reply` are the pieces a stub is built from:
//!
//! ```ignore
//! let table = ServiceTable::new("calc")
//!     .method(0, |_ctx, (a, b): (i64, i64)| async move { Ok::<_, RemoteError>(a + b) });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use varpack::Decoder;
use varpack::Pack;
use varpack::Unpack;

use crate::context::Context;

/// A prepared inbound call: arguments already decoded, waiting for a worker.
pub type Handler = Box<dyn FnOnce(Context) -> BoxFuture<'static, Box<dyn Pack + Send>> + Send>;

/// A named set of remotely callable functions.
pub trait Service: Send + Sync {
    /// The full id. Only the first four bytes take part in routing.
    fn id(&self) -> &[u8];

    fn func_call(&self, func_id: u64) -> Option<Arc<dyn FuncCall>>;
}

/// One remotely callable function.
#[async_trait]
pub trait FuncCall: Send + Sync {
    /// Reads this function's arguments and returns the work to run.
    ///
    /// Argument errors that leave the stream readable should come back as a
    /// handler producing an error reply. `Err` is reserved for a stream that
    /// can no longer be read, and closes the endpoint.
    async fn prepare(&self, dec: &mut Decoder) -> varpack::Result<Handler>;
}

/// An application-level failure, carried inside a normal response.
#[derive(Debug, Clone, PartialEq, Eq, varpack::Pack, varpack::Unpack)]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote error: {}", self.message)
    }
}

impl std::error::Error for RemoteError {}

/// What every `Method` returns over the wire.
pub type Reply<T> = std::result::Result<T, RemoteError>;

/// Adapts an async function of `(Context, Req)` into a `FuncCall`.
pub struct Method<Req, F> {
    f: Arc<F>,
    _req: PhantomData<fn() -> Req>,
}

impl<Req, F> Method<Req, F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f), _req: PhantomData }
    }
}

fn reply_handler<T>(reply: Reply<T>) -> Handler
where
    T: Pack + Send + 'static,
{
    Box::new(move |_ctx: Context| async move { Box::new(reply) as Box<dyn Pack + Send> }.boxed())
}

#[async_trait]
impl<Req, T, F, Fut> FuncCall for Method<Req, F>
where
    Req: Unpack + 'static,
    T: Pack + Send + 'static,
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply<T>> + Send + 'static,
{
    async fn prepare(&self, dec: &mut Decoder) -> varpack::Result<Handler> {
        let req = match Req::unpack(dec).await {
            Ok(req) => req,
            Err(e) if e.is_stream() => return Err(e),
            Err(e) => return Ok(reply_handler::<T>(Err(RemoteError::new(format!("bad arguments: {}", e))))),
        };
        let f = self.f.clone();
        Ok(Box::new(move |ctx: Context| {
            async move {
                let reply = f(ctx, req).await;
                Box::new(reply) as Box<dyn Pack + Send>
            }
            .boxed()
        }))
    }
}

/// A dispatch table from function id to `FuncCall`.
pub struct ServiceTable {
    id: Vec<u8>,
    funcs: HashMap<u64, Arc<dyn FuncCall>>,
}

impl ServiceTable {
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self { id: id.into(), funcs: HashMap::new() }
    }

    /// Registers a raw `FuncCall`, replacing any earlier one with the same id.
    pub fn func(mut self, func_id: u64, call: Arc<dyn FuncCall>) -> Self {
        self.funcs.insert(func_id, call);
        self
    }

    /// Registers an async function through the `Method` adapter.
    pub fn method<Req, T, F, Fut>(self, func_id: u64, f: F) -> Self
    where
        Req: Unpack + 'static,
        T: Pack + Send + 'static,
        F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Reply<T>> + Send + 'static,
    {
        self.func(func_id, Arc::new(Method::new(f)))
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl Service for ServiceTable {
    fn id(&self) -> &[u8] {
        &self.id
    }

    fn func_call(&self, func_id: u64) -> Option<Arc<dyn FuncCall>> {
        self.funcs.get(&func_id).cloned()
    }
}
