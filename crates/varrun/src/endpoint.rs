//! # Endpoint
//!
//! One end of a connection: it serves the services registered on it and
//! makes calls to the services registered on the other end. Both directions
//! share the one stream.
//!
//! ## Philosophy
//!
//! - **One Reader**: a single task reads packets in arrival order and either
//!   dispatches a request to the executor or delivers a response to its
//!   waiting caller. A saturated worker pool therefore also delays response
//!   delivery.
//! - **Whole Packets**: every packet is assembled in the shared encoder under
//!   the write lock and written with one `write_all`. The write itself runs
//!   on its own task, so a caller that goes away mid-write cannot leave half
//!   a packet on the wire.
//! - **One Cause**: the first reason an endpoint stops is recorded and handed
//!   to every call that fails afterwards.
//!
//! ## Lifecycle
//!
//! running → closing → closed. Closing is entered by `close()`, a read
//! failure (including a response payload that does not decode), a
//! `ClosingNow` from the counterpart or a failed response write.
//! It sends `ClosingNow` if it still can, cancels the lifecycle context (and
//! with it every worker), then shuts the write half down.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;
use varpack::Decoder;
use varpack::Encoder;
use varpack::Pack;
use varpack::Unpack;
use varrpc::ContextEnd;
use varrpc::Packet;
use varrpc::RequestHeader;
use varrpc::ResponseHeader;
use varrpc::ServiceKey;

use crate::config::EndpointConfig;
use crate::context::Context;
use crate::error::Error;
use crate::error::Result;
use crate::executor::Executor;
use crate::executor::Responder;
use crate::ledger::Ledger;
use crate::ledger::TypedSink;
use crate::service::Service;

/// Anything an endpoint can run over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// A point-in-time view of an endpoint's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointStats {
    /// Inbound calls currently holding a worker.
    pub inbound_in_flight: usize,
    /// Outbound calls currently holding a request number.
    pub outbound_in_flight: usize,
    /// Times the read loop had to wait for a free worker.
    pub worker_stalls: u64,
}

/// Where a failed send went wrong.
enum SendError {
    /// Nothing reached the wire; the connection is fine.
    Local(Error),
    /// The connection is unusable.
    Fatal(Error),
}

/// Fills `enc` with one packet. On failure `enc` is left empty.
fn encode<F>(enc: &mut Encoder, packet: &Packet, payload: F) -> Result<()>
where
    F: FnOnce(&mut Encoder) -> varpack::Result<()>,
{
    enc.clear();
    let written = packet.write(enc).map_err(Error::from).and_then(|()| Ok(payload(enc)?));
    if written.is_err() {
        enc.clear();
    }
    written
}

struct Writer {
    enc: Encoder,
    conn: Option<WriteHalf>,
}

impl Writer {
    async fn flush(&mut self) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::ClosedLocally);
        };
        conn.write_all(self.enc.as_bytes()).await?;
        conn.flush().await?;
        self.enc.clear();
        Ok(())
    }
}

#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    services: DashMap<ServiceKey, Arc<dyn Service>>,
    ledger: Ledger,
    executor: Executor,
    writer: Arc<Mutex<Writer>>,
    lifecycle: Context,
    cause: OnceLock<Error>,
    closing: AtomicBool,
    stopped: CancellationToken,
    close_timeout: Duration,
}

impl Endpoint {
    /// Takes ownership of `conn` and starts the read loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<C: Connection>(conn: C, config: EndpointConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(conn);
        let lifecycle = Context::background();
        let inner = Arc::new(Inner {
            ledger: Ledger::new(config.get_parallel_client_calls()),
            executor: Executor::new(config.name.clone(), config.parallel_workers, lifecycle.clone()),
            name: config.name,
            services: DashMap::new(),
            writer: Arc::new(Mutex::new(Writer {
                enc: Encoder::new(),
                conn: Some(Box::new(write_half)),
            })),
            lifecycle,
            cause: OnceLock::new(),
            closing: AtomicBool::new(false),
            stopped: CancellationToken::new(),
            close_timeout: config.close_timeout,
        });
        for service in config.services {
            inner.register(service);
        }

        let dec = Decoder::new(read_half).with_max_len(config.max_len);
        debug!(endpoint = %inner.name, "endpoint started");
        tokio::spawn(Inner::run(inner.clone(), dec));
        Self { inner }
    }

    /// Connects over TCP and wraps the stream in an endpoint.
    pub async fn connect_tcp(addr: impl tokio::net::ToSocketAddrs, config: EndpointConfig) -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, config))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Makes `service` callable by the counterpart.
    ///
    /// Services are keyed by the first four bytes of their id; a later
    /// registration with the same key replaces the earlier one.
    pub fn register_service(&self, service: Arc<dyn Service>) {
        self.inner.register(service);
    }

    /// Calls `func_id` on the counterpart's `service_id` and waits for the
    /// result.
    ///
    /// Cancelling `ctx` before a request number is free fails the call right
    /// away. Cancelling it afterwards tells the counterpart, but the call
    /// still completes only when the counterpart answers or the endpoint
    /// closes.
    pub async fn call_remote_func<Req, Res>(&self, ctx: &Context, service_id: &[u8], func_id: u64, req: &Req) -> Result<Res>
    where
        Req: Pack + Sync + ?Sized,
        Res: Unpack + 'static,
    {
        let inner = &self.inner;
        if inner.is_closing() {
            return Err(inner.closed_error());
        }

        let lease = tokio::select! {
            biased;
            _ = inner.lifecycle.cancelled() => return Err(inner.closed_error()),
            lease = inner.ledger.lease(ctx) => lease?,
        };
        let req_num = lease.slot();
        let header = Packet::Request(RequestHeader {
            req_num,
            service: ServiceKey::from_id(service_id),
            func_id,
        });

        let (tx, mut rx) = oneshot::channel::<varpack::Result<Res>>();
        inner.ledger.record(req_num, Box::new(TypedSink::new(tx)));

        let mut writer = inner.lock_writer().await?;
        // On error, dropping the lease gives the slot back.
        encode(&mut writer.enc, &header, |enc| req.pack(enc))?;
        // From here the slot is freed by the response, or by a failed write.
        lease.commit();
        trace!(endpoint = %inner.name, req_num, func_id, "sending request");
        if let Err(e) = inner.flush(writer).await {
            inner.ledger.abandon(req_num);
            inner.fail(e).await;
            return Err(inner.closed_error());
        }

        let mut told_counterpart = false;
        loop {
            tokio::select! {
                biased;
                delivered = &mut rx => {
                    return match delivered {
                        Ok(result) => result.map_err(Error::Codec),
                        Err(_) => Err(inner.closed_error()),
                    };
                }
                _ = inner.lifecycle.cancelled() => return Err(inner.closed_error()),
                _ = ctx.cancelled(), if !told_counterpart => {
                    told_counterpart = true;
                    let cause = ctx.cause().unwrap_or_default();
                    debug!(endpoint = %inner.name, req_num, cause = %cause, "caller gave up, telling counterpart");
                    let notice = Packet::ContextEnd(ContextEnd { req_num, cause });
                    if let Err(SendError::Local(e) | SendError::Fatal(e)) = inner.send(&notice).await {
                        debug!(endpoint = %inner.name, req_num, error = %e, "context end not delivered");
                    }
                }
            }
        }
    }

    /// Closes the endpoint and waits for the read loop to stop.
    ///
    /// Fails with `AlreadyClosed` if the endpoint was already closing, or
    /// with a transport error if the connection did not shut down cleanly.
    pub async fn close(&self) -> Result<()> {
        let closed = self.inner.shutdown(Error::ClosedLocally).await;
        if matches!(closed, Err(Error::AlreadyClosed)) {
            return closed;
        }
        self.inner.stopped.cancelled().await;
        closed
    }

    /// Waits until the endpoint has fully stopped and returns why.
    pub async fn closed(&self) -> Error {
        self.inner.stopped.cancelled().await;
        self.inner.closed_error()
    }

    /// Why the endpoint stopped, or `None` while it is running.
    pub fn close_cause(&self) -> Option<Error> {
        self.inner.cause.get().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closing()
    }

    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            inbound_in_flight: self.inner.executor.in_flight(),
            outbound_in_flight: self.inner.ledger.in_flight(),
            worker_stalls: self.inner.executor.stalls(),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn register(&self, service: Arc<dyn Service>) {
        let key = ServiceKey::from_id(service.id());
        if self.services.insert(key, service).is_some() {
            warn!(endpoint = %self.name, service = %key, "service key collision, replacing earlier registration");
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> Error {
        self.cause.get().cloned().unwrap_or(Error::ClosedLocally)
    }

    async fn lock_writer(&self) -> Result<OwnedMutexGuard<Writer>> {
        let writer = self.writer.clone().lock_owned().await;
        if writer.conn.is_none() {
            return Err(self.closed_error());
        }
        Ok(writer)
    }

    /// Writes the packet sitting in the locked encoder.
    ///
    /// The write runs on its own task, which owns the lock until it is done,
    /// so it always finishes or fails as a whole. It is abandoned only when
    /// the endpoint itself is closing.
    async fn flush(&self, mut writer: OwnedMutexGuard<Writer>) -> Result<()> {
        let lifecycle = self.lifecycle.clone();
        let write = tokio::spawn(async move {
            tokio::select! {
                result = writer.flush() => result,
                _ = lifecycle.cancelled() => Err(Error::ClosedLocally),
            }
        });
        match write.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::ClosedLocally)) => Err(self.closed_error()),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::Transport(format!("writer task failed: {}", e))),
        }
    }

    /// Sends a header-only packet, or a header plus `payload`.
    async fn send_with(&self, packet: &Packet, payload: Option<Box<dyn Pack + Send>>) -> std::result::Result<(), SendError> {
        let mut writer = self.lock_writer().await.map_err(SendError::Fatal)?;
        if let Err(e) = encode(&mut writer.enc, packet, |enc| match &payload {
            Some(payload) => payload.pack(enc),
            None => Ok(()),
        }) {
            return Err(SendError::Local(e));
        }
        drop(payload);
        self.flush(writer).await.map_err(SendError::Fatal)
    }

    async fn send(&self, packet: &Packet) -> std::result::Result<(), SendError> {
        self.send_with(packet, None).await
    }

    /// Enters closing.
    ///
    /// Fails with `AlreadyClosed` if the endpoint was already closing, or
    /// with the error that kept the connection from shutting down.
    async fn shutdown(&self, cause: Error) -> Result<()> {
        // Recorded before the flag, so anyone who sees `closing` also sees why.
        let cause = self.cause.get_or_init(|| cause).clone();
        if self.closing.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }
        match &cause {
            Error::ClosedLocally | Error::ClosedByCounterpart => info!(endpoint = %self.name, cause = %cause, "endpoint closing"),
            other => warn!(endpoint = %self.name, error = %other, "endpoint failed, closing"),
        }

        // The counterpart already knows in these cases.
        if !matches!(cause, Error::ClosedByCounterpart | Error::Transport(_)) {
            let notice = tokio::time::timeout(self.close_timeout, self.send(&Packet::ClosingNow)).await;
            if !matches!(notice, Ok(Ok(()))) {
                debug!(endpoint = %self.name, "closing notice not delivered");
            }
        }

        self.lifecycle.cancel(cause.to_string());

        let mut conn = match tokio::time::timeout(self.close_timeout, self.writer.lock()).await {
            Ok(mut writer) => match writer.conn.take() {
                Some(conn) => conn,
                None => return Ok(()),
            },
            Err(_) => return Err(Error::Transport("timed out waiting for the writer to close".into())),
        };
        match tokio::time::timeout(self.close_timeout, conn.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            // The counterpart hung up first; nothing left to shut down.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Ok(Err(e)) => {
                warn!(endpoint = %self.name, error = %e, "connection shutdown failed");
                Err(e.into())
            }
            Err(_) => Err(Error::Transport("timed out shutting the connection down".into())),
        }
    }

    /// Closes on a failure nobody is waiting to hear about.
    async fn fail(&self, cause: Error) {
        if let Err(e) = self.shutdown(cause).await {
            if !matches!(e, Error::AlreadyClosed) {
                debug!(endpoint = %self.name, error = %e, "connection did not close cleanly");
            }
        }
    }

    async fn run(self: Arc<Self>, mut dec: Decoder) {
        let outcome = tokio::select! {
            biased;
            _ = self.lifecycle.cancelled() => Ok(()),
            result = self.read_loop(&mut dec) => result,
        };
        if let Err(e) = outcome {
            self.fail(e).await;
        }
        self.stopped.cancel();
        debug!(endpoint = %self.name, "read loop stopped");
    }

    async fn read_loop(self: &Arc<Self>, dec: &mut Decoder) -> Result<()> {
        loop {
            let packet = Packet::read(dec).await.map_err(Error::from_wire)?;
            match packet {
                Packet::Request(header) => self.dispatch(header, dec).await?,
                Packet::Response(ResponseHeader { req_num }) => {
                    trace!(endpoint = %self.name, req_num, "response received");
                    let sink = self.ledger.resolve(req_num)?;
                    // Packets carry no length: any unread rest of the payload
                    // would be read as the next header.
                    if let Err(e) = sink.deliver(dec).await {
                        if e.is_stream() {
                            return Err(Error::from_stream(e));
                        }
                        return Err(Error::Protocol(format!("response {} did not decode: {}", req_num, e)));
                    }
                }
                Packet::ContextEnd(end) => self.executor.cancel(end.req_num, end.cause),
                Packet::ClosingNow => return Err(Error::ClosedByCounterpart),
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, header: RequestHeader, dec: &mut Decoder) -> Result<()> {
        let RequestHeader { req_num, service, func_id } = header;
        trace!(endpoint = %self.name, req_num, service = %service, func_id, "request received");

        let target = self.services.get(&service).map(|s| s.value().clone());
        let Some(target) = target else {
            return Err(Error::Protocol(format!("unknown service {:?}", service.to_string())));
        };
        let Some(call) = target.func_call(func_id) else {
            return Err(Error::Protocol(format!("service {:?} has no function {}", service.to_string(), func_id)));
        };

        let handler = call.prepare(dec).await.map_err(Error::from_stream)?;
        let responder: Arc<dyn Responder> = self.clone();
        self.executor.start(req_num, handler, responder).await
    }
}

#[async_trait]
impl Responder for Inner {
    async fn respond(&self, req_num: u64, result: Box<dyn Pack + Send>) {
        let header = Packet::Response(ResponseHeader { req_num });
        trace!(endpoint = %self.name, req_num, "sending response");
        match self.send_with(&header, Some(result)).await {
            Ok(()) => {}
            // The counterpart is waiting on this number and will never hear back.
            Err(SendError::Local(e)) | Err(SendError::Fatal(e)) => {
                if !self.is_closing() {
                    self.fail(e).await;
                }
            }
        }
    }
}
