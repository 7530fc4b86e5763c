use std::net::SocketAddr;
use std::time::Duration;

use calc::CalcClient;
use clap::Parser;
use clap::ValueEnum;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use varrun::Context;
use varrun::Endpoint;
use varrun::EndpointConfig;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Op {
    Add,
    Div,
    DivErr,
}

#[derive(Parser, Debug)]
#[command(version, about = "Call a calc server over TCP")]
struct Args {
    #[arg(value_enum)]
    op: Op,

    #[arg(allow_negative_numbers = true)]
    a: i64,

    #[arg(allow_negative_numbers = true)]
    b: i64,

    /// Server address.
    #[arg(long, default_value = "127.0.0.1:7700")]
    addr: SocketAddr,

    /// After this many milliseconds, ask the server to stop working on the
    /// call. The call still waits for the server's answer or for the
    /// connection to close.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let endpoint = Endpoint::connect_tcp(args.addr, EndpointConfig::new("calc-client")).await?;
    let calc = CalcClient::new(endpoint.clone());
    let ctx = Context::background().with_timeout(Duration::from_millis(args.timeout_ms));

    match args.op {
        Op::Add => match calc.add(&ctx, args.a, args.b).await? {
            Ok(sum) => info!(a = args.a, b = args.b, sum, "add"),
            Err(e) => warn!(error = %e, "add failed"),
        },
        Op::Div => match calc.div(&ctx, args.a, args.b).await? {
            Ok(quotient) => info!(a = args.a, b = args.b, quotient, "div"),
            Err(e) => warn!(error = %e, "div failed"),
        },
        Op::DivErr => {
            let quotient = calc.div_err(&ctx, args.a, args.b).await??;
            match quotient.fault {
                None => info!(a = args.a, b = args.b, quotient = quotient.value, "div-err"),
                Some(fault) => warn!(kind = %fault.kind(), message = %fault.message(), "div-err faulted"),
            }
        }
    }

    endpoint.close().await?;
    Ok(())
}
