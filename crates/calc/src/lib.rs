//! # Calc
//!
//! A small arithmetic service, and a typed client for it.
//!
//! Every result is offset by the serving side's `skew`, so a test can tell
//! from the answer alone which peer computed it.
//!
//! ## Functions
//!
//! | id | name     | arguments  | reply                                  |
//! |----|----------|------------|----------------------------------------|
//! | 0  | `Add`    | `Operands` | `a + b + skew`                         |
//! | 1  | `Div`    | `Operands` | `a / b + skew`, `RemoteError` on `b=0` |
//! | 2  | `DivErr` | `Operands` | `Quotient`, carrying a `Fault` value   |
//!
//! `Div` reports failure through the reply's error slot. `DivErr` always
//! succeeds at the RPC level and describes failure with a `Fault` interface
//! value inside the result.

use std::sync::Arc;

use varrun::Context;
use varrun::Endpoint;
use varrun::RemoteError;
use varrun::Reply;
use varrun::ServiceTable;

pub const SERVICE_ID: &str = "calc";

pub const ADD: u64 = 0;
pub const DIV: u64 = 1;
pub const DIV_ERR: u64 = 2;

pub const DIVIDE_BY_ZERO: &str = "divide-by-zero";
pub const OVERFLOW: &str = "overflow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, varpack::Pack, varpack::Unpack)]
pub struct Operands {
    pub a: i64,
    pub b: i64,
}

impl Operands {
    pub fn new(a: i64, b: i64) -> Self {
        Self { a, b }
    }
}

varpack::snapshot! {
    /// An application failure, sent as a value rather than a transport error.
    pub trait Fault => FaultSnapshot {
        fn kind(&self) -> String;
        fn message(&self) -> String;
    }
}

/// What `DivErr` answers with.
#[derive(varpack::Pack, varpack::Unpack)]
pub struct Quotient {
    pub value: i64,
    pub fault: Option<Box<dyn Fault>>,
}

impl std::fmt::Debug for Quotient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fault = self.fault.as_ref().map(|x| (x.kind(), x.message()));
        f.debug_struct("Quotient").field("value", &self.value).field("fault", &fault).finish()
    }
}

struct DivideByZero {
    dividend: i64,
}

impl Fault for DivideByZero {
    fn kind(&self) -> String {
        DIVIDE_BY_ZERO.to_string()
    }

    fn message(&self) -> String {
        format!("cannot divide {} by zero", self.dividend)
    }
}

struct Overflow {
    op: &'static str,
    ops: Operands,
}

impl Fault for Overflow {
    fn kind(&self) -> String {
        OVERFLOW.to_string()
    }

    fn message(&self) -> String {
        format!("{} {} {} overflows", self.ops.a, self.op, self.ops.b)
    }
}

// ============================================================================
// Server side
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Calc {
    skew: i64,
}

impl Calc {
    pub fn new(skew: i64) -> Self {
        Self { skew }
    }

    pub fn skew(&self) -> i64 {
        self.skew
    }

    pub fn add(&self, ops: Operands) -> Reply<i64> {
        ops.a
            .checked_add(ops.b)
            .and_then(|sum| sum.checked_add(self.skew))
            .ok_or_else(|| RemoteError::new(Overflow { op: "+", ops }.message()))
    }

    pub fn div(&self, ops: Operands) -> Reply<i64> {
        if ops.b == 0 {
            return Err(RemoteError::new(DivideByZero { dividend: ops.a }.message()));
        }
        ops.a
            .checked_div(ops.b)
            .and_then(|q| q.checked_add(self.skew))
            .ok_or_else(|| RemoteError::new(Overflow { op: "/", ops }.message()))
    }

    pub fn div_err(&self, ops: Operands) -> Quotient {
        let fault: Box<dyn Fault> = if ops.b == 0 {
            Box::new(DivideByZero { dividend: ops.a })
        } else {
            match ops.a.checked_div(ops.b).and_then(|q| q.checked_add(self.skew)) {
                Some(value) => return Quotient { value, fault: None },
                None => Box::new(Overflow { op: "/", ops }),
            }
        };
        Quotient { value: 0, fault: Some(fault) }
    }

    /// The dispatch table serving this calculator under `SERVICE_ID`.
    pub fn service(self) -> ServiceTable {
        let calc = Arc::new(self);
        let (add, div, div_err) = (calc.clone(), calc.clone(), calc);
        ServiceTable::new(SERVICE_ID)
            .method(ADD, move |_ctx: Context, ops: Operands| {
                let reply = add.add(ops);
                async move { reply }
            })
            .method(DIV, move |_ctx: Context, ops: Operands| {
                let reply = div.div(ops);
                async move { reply }
            })
            .method(DIV_ERR, move |_ctx: Context, ops: Operands| {
                let reply = div_err.div_err(ops);
                async move { Ok::<_, RemoteError>(reply) }
            })
    }
}

// ============================================================================
// Client side
// ============================================================================

/// Typed calls into a counterpart's calc service.
#[derive(Debug, Clone)]
pub struct CalcClient {
    endpoint: Endpoint,
}

impl CalcClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn add(&self, ctx: &Context, a: i64, b: i64) -> varrun::Result<Reply<i64>> {
        self.call(ctx, ADD, Operands::new(a, b)).await
    }

    pub async fn div(&self, ctx: &Context, a: i64, b: i64) -> varrun::Result<Reply<i64>> {
        self.call(ctx, DIV, Operands::new(a, b)).await
    }

    pub async fn div_err(&self, ctx: &Context, a: i64, b: i64) -> varrun::Result<Reply<Quotient>> {
        self.call(ctx, DIV_ERR, Operands::new(a, b)).await
    }

    async fn call<R: varpack::Unpack + 'static>(&self, ctx: &Context, func_id: u64, ops: Operands) -> varrun::Result<R> {
        self.endpoint.call_remote_func(ctx, SERVICE_ID.as_bytes(), func_id, &ops).await
    }
}
