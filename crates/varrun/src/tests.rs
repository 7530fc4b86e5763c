use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use varpack::Decoder;
use varpack::Encoder;
use varpack::Pack;

use crate::context::DEADLINE_EXCEEDED;
use crate::executor::Executor;
use crate::executor::Responder;
use crate::ledger::Ledger;
use crate::ledger::ResponseSink;
use crate::ledger::TypedSink;
use crate::*;

const SHORT: Duration = Duration::from_millis(50);

/// True if `fut` is still pending after a short wait.
async fn stays_pending<F: std::future::Future>(fut: F) -> bool {
    tokio::time::timeout(SHORT, fut).await.is_err()
}

// ============================================================================
//  CONTEXT
// ============================================================================

#[test]
fn test_context_cancel_reaches_children_only() {
    let root = Context::background();
    let child = root.with_cancel();
    let grandchild = child.with_cancel();
    let sibling = root.with_cancel();

    child.cancel("child done");
    assert!(!root.is_cancelled());
    assert!(!sibling.is_cancelled());
    assert!(child.is_cancelled());
    assert!(grandchild.is_cancelled());
    assert_eq!(grandchild.cause().as_deref(), Some("child done"));
    assert_eq!(root.cause(), None);
}

#[test]
fn test_context_first_cause_sticks() {
    let root = Context::background();
    let child = root.with_cancel();

    root.cancel("shutdown");
    child.cancel("too late");
    root.cancel("also too late");
    assert_eq!(root.cause().as_deref(), Some("shutdown"));
    assert_eq!(child.cause().as_deref(), Some("shutdown"));
}

#[test]
fn test_context_identity() {
    let a = Context::background();
    let b = a.clone();
    assert!(a.same(&b));
    assert!(!a.same(&a.with_cancel()));
}

#[tokio::test]
async fn test_context_timeout() {
    let root = Context::background();
    let ctx = root.with_timeout(Duration::from_millis(10));
    ctx.cancelled().await;
    assert_eq!(ctx.cause().as_deref(), Some(DEADLINE_EXCEEDED));
    assert!(!root.is_cancelled());
}

// ============================================================================
//  LEDGER
// ============================================================================

fn sink() -> (Box<TypedSink<u64>>, oneshot::Receiver<varpack::Result<u64>>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(TypedSink::new(tx)), rx)
}

#[tokio::test]
async fn test_ledger_hands_out_distinct_slots() -> Result<()> {
    let ledger = Ledger::new(3);
    let ctx = Context::background();
    let mut slots = vec![
        ledger.lease(&ctx).await?.commit(),
        ledger.lease(&ctx).await?.commit(),
        ledger.lease(&ctx).await?.commit(),
    ];
    slots.sort();
    assert_eq!(slots, vec![0, 1, 2]);
    assert_eq!(ledger.in_flight(), 3);
    Ok(())
}

#[tokio::test]
async fn test_ledger_blocks_past_capacity_and_wakes_one() -> Result<()> {
    let ledger = Arc::new(Ledger::new(2));
    let ctx = Context::background();

    for _ in 0..2 {
        let slot = ledger.lease(&ctx).await?.commit();
        let (sink, _rx) = sink();
        ledger.record(slot, sink);
    }
    assert!(stays_pending(ledger.lease(&ctx)).await);

    let (woke_tx, mut woke_rx) = mpsc::unbounded_channel();
    for _ in 0..2 {
        let ledger = ledger.clone();
        let woke_tx = woke_tx.clone();
        tokio::spawn(async move {
            let ctx = Context::background();
            if let Ok(lease) = ledger.lease(&ctx).await {
                let _ = woke_tx.send(lease.commit());
            }
        });
    }
    assert!(stays_pending(woke_rx.recv()).await);

    // One response frees one slot, which wakes exactly one waiter.
    let freed = 1;
    let _sink = ledger.resolve(freed)?;
    assert_eq!(woke_rx.recv().await, Some(freed));
    assert!(stays_pending(woke_rx.recv()).await);
    Ok(())
}

#[tokio::test]
async fn test_ledger_lease_fails_on_cancelled_context() -> Result<()> {
    let ledger = Ledger::new(1);
    let held = ledger.lease(&Context::background()).await?;

    let ctx = Context::background().with_timeout(Duration::from_millis(10));
    let err = ledger.lease(&ctx).await.err();
    assert!(matches!(err, Some(Error::Cancelled(ref cause)) if cause == DEADLINE_EXCEEDED), "{:?}", err);

    drop(held);
    assert_eq!(ledger.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_ledger_dropped_lease_frees_slot() -> Result<()> {
    let ledger = Ledger::new(1);
    let ctx = Context::background();
    {
        let lease = ledger.lease(&ctx).await?;
        let (sink, _rx) = sink();
        ledger.record(lease.slot(), sink);
    }
    assert_eq!(ledger.in_flight(), 0);
    // The sink went with it.
    assert!(matches!(ledger.resolve(0), Err(Error::Protocol(_))));
    Ok(())
}

#[tokio::test]
async fn test_ledger_unknown_slot_is_protocol_error() {
    let ledger = Ledger::new(4);
    let err = ledger.resolve(7).err();
    assert!(matches!(err, Some(Error::Protocol(_))), "{:?}", err);
}

#[tokio::test]
async fn test_ledger_sink_decodes_payload() -> Result<()> {
    let ledger = Ledger::new(1);
    let slot = ledger.lease(&Context::background()).await?.commit();
    let (sink, rx) = sink();
    ledger.record(slot, sink);

    let mut dec = Decoder::from_bytes(varpack::to_bytes(&300u64)?);
    ledger.resolve(slot)?.deliver(&mut dec).await?;
    assert_eq!(rx.await.ok().and_then(|r| r.ok()), Some(300));
    assert_eq!(ledger.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_ledger_sink_consumes_payload_without_waiter() -> Result<()> {
    let (sink, rx) = sink();
    drop(rx);
    let mut enc = Encoder::new();
    5u64.pack(&mut enc)?;
    9u64.pack(&mut enc)?;
    let mut dec = Decoder::from_bytes(enc.into_bytes());

    sink.deliver(&mut dec).await?;
    assert_eq!(dec.u64().await?, 9);
    Ok(())
}

// ============================================================================
//  EXECUTOR
// ============================================================================

struct Collect(mpsc::UnboundedSender<(u64, Vec<u8>)>);

#[async_trait]
impl Responder for Collect {
    async fn respond(&self, req_num: u64, result: Box<dyn Pack + Send>) {
        let bytes = varpack::to_bytes(result.as_ref()).unwrap_or_default();
        let _ = self.0.send((req_num, bytes));
    }
}

fn collector() -> (Arc<dyn Responder>, mpsc::UnboundedReceiver<(u64, Vec<u8>)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Collect(tx)), rx)
}

/// A handler that finishes with `value` once `gate` lets it through.
fn gated(gate: Arc<Semaphore>, value: u64) -> Handler {
    Box::new(move |_ctx: Context| {
        async move {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            Box::new(value) as Box<dyn Pack + Send>
        }
        .boxed()
    })
}

/// A handler that waits for its context and reports the cause.
fn until_cancelled() -> Handler {
    Box::new(|ctx: Context| {
        async move {
            ctx.cancelled().await;
            Box::new(ctx.cause().unwrap_or_default()) as Box<dyn Pack + Send>
        }
        .boxed()
    })
}

#[tokio::test]
async fn test_executor_holds_excess_call_until_worker_frees() -> Result<()> {
    let executor = Arc::new(Executor::new("probe", 2, Context::background()));
    let (responder, mut responses) = collector();
    let gate = Arc::new(Semaphore::new(0));

    executor.start(0, gated(gate.clone(), 10), responder.clone()).await?;
    executor.start(1, gated(gate.clone(), 11), responder.clone()).await?;
    assert_eq!(executor.in_flight(), 2);

    let third = {
        let executor = executor.clone();
        let gate = gate.clone();
        let responder = responder.clone();
        tokio::spawn(async move { executor.start(2, gated(gate, 12), responder).await })
    };
    tokio::time::sleep(SHORT).await;
    assert!(!third.is_finished(), "third call started while both workers were busy");
    assert_eq!(executor.stalls(), 1);

    gate.add_permits(1);
    let (first_done, _) = responses.recv().await.ok_or(Error::ClosedLocally)?;
    assert!(first_done == 0 || first_done == 1);
    third.await.map_err(|e| Error::Transport(e.to_string()))??;

    gate.add_permits(2);
    let mut rest = vec![responses.recv().await, responses.recv().await];
    rest.sort();
    assert_eq!(rest.len(), 2);
    assert_eq!(executor.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_executor_cancel_reaches_handler() -> Result<()> {
    let executor = Executor::new("cancel", 1, Context::background());
    let (responder, mut responses) = collector();

    executor.start(4, until_cancelled(), responder).await?;
    executor.cancel(4, "caller gave up");

    let (req_num, bytes) = responses.recv().await.ok_or(Error::ClosedLocally)?;
    assert_eq!(req_num, 4);
    let cause: String = varpack::from_bytes(bytes).await?;
    assert_eq!(cause, "caller gave up");
    Ok(())
}

#[tokio::test]
async fn test_executor_cancel_for_finished_worker_is_noop() -> Result<()> {
    let executor = Executor::new("noop", 1, Context::background());
    let (responder, mut responses) = collector();
    let gate = Arc::new(Semaphore::new(1));

    executor.start(0, gated(gate, 1), responder).await?;
    responses.recv().await;
    executor.cancel(0, "late");
    executor.cancel(99, "never existed");
    Ok(())
}

#[tokio::test]
async fn test_executor_lifecycle_end_cancels_workers_and_drops_responses() -> Result<()> {
    let lifecycle = Context::background();
    let executor = Arc::new(Executor::new("lifecycle", 1, lifecycle.clone()));
    let (responder, mut responses) = collector();

    executor.start(0, until_cancelled(), responder.clone()).await?;

    let blocked = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.start(1, until_cancelled(), responder).await })
    };
    tokio::time::sleep(SHORT).await;

    lifecycle.cancel("endpoint closed");
    let err = blocked.await.map_err(|e| Error::Transport(e.to_string()))?.err();
    assert!(matches!(err, Some(Error::Cancelled(ref c)) if c == "endpoint closed"), "{:?}", err);

    // The running worker finished, but its response was dropped.
    assert!(stays_pending(responses.recv()).await);
    assert_eq!(executor.in_flight(), 0);
    Ok(())
}

// ============================================================================
//  SERVICES
// ============================================================================

fn adder() -> ServiceTable {
    ServiceTable::new("math")
        .method(0, |_ctx, (a, b): (i64, i64)| async move { Ok::<_, RemoteError>(a + b) })
        .method(1, |_ctx, name: String| async move {
            if name.is_empty() {
                Err(RemoteError::new("empty name"))
            } else {
                Ok(format!("hello {}", name))
            }
        })
}

async fn run_prepared(call: Arc<dyn FuncCall>, args: Vec<u8>) -> Result<Vec<u8>> {
    let mut dec = Decoder::from_bytes(args);
    let handler = call.prepare(&mut dec).await?;
    let out = handler(Context::background()).await;
    Ok(varpack::to_bytes(out.as_ref())?)
}

#[tokio::test]
async fn test_method_runs_with_decoded_arguments() -> Result<()> {
    let table = adder();
    assert_eq!(table.id(), b"math");
    assert_eq!(table.len(), 2);

    let call = table.func_call(0).ok_or(Error::Protocol("missing".into()))?;
    let bytes = run_prepared(call, varpack::to_bytes(&(2i64, 40i64))?).await?;
    let reply: Reply<i64> = varpack::from_bytes(bytes).await?;
    assert_eq!(reply, Ok(42));

    let call = table.func_call(1).ok_or(Error::Protocol("missing".into()))?;
    let bytes = run_prepared(call, varpack::to_bytes("")?).await?;
    let reply: Reply<String> = varpack::from_bytes(bytes).await?;
    assert_eq!(reply, Err(RemoteError::new("empty name")));
    Ok(())
}

#[tokio::test]
async fn test_method_bad_arguments_become_error_reply() -> Result<()> {
    let call = adder().func_call(1).ok_or(Error::Protocol("missing".into()))?;
    // Length 1, then a byte that is not UTF-8.
    let bytes = run_prepared(call, vec![1, 0xff]).await?;
    let reply: Reply<String> = varpack::from_bytes(bytes).await?;
    let err = reply.err().map(|e| e.message).unwrap_or_default();
    assert!(err.starts_with("bad arguments"), "{}", err);
    Ok(())
}

#[tokio::test]
async fn test_method_truncated_arguments_fail_prepare() {
    let call = adder().func_call(0).expect("func 0");
    let mut dec = Decoder::from_bytes(vec![4]);
    let err = call.prepare(&mut dec).await.err();
    assert!(matches!(err, Some(ref e) if e.is_stream()), "{:?}", err);
}

#[test]
fn test_unknown_func_is_none() {
    assert!(adder().func_call(9).is_none());
}

// ============================================================================
//  CONFIG
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = EndpointConfig::new("edge");
    assert_eq!(config.get_name(), "edge");
    assert_eq!(config.get_parallel_workers(), 3);
    assert_eq!(config.get_parallel_client_calls(), 4);

    let config = config.parallel_workers(0).parallel_client_calls(9);
    assert_eq!(config.get_parallel_workers(), 1);
    assert_eq!(config.get_parallel_client_calls(), 9);
}
