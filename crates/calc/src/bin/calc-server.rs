use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use calc::Calc;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use varrun::EndpointConfig;
use varrun::Error;
use varrun::Server;

#[derive(Parser, Debug)]
#[command(version, about = "Serve the calc service over TCP")]
struct Args {
    /// Listen address.
    #[arg(default_value = "127.0.0.1:7700")]
    addr: SocketAddr,

    /// Added to every result.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    skew: i64,

    /// Inbound calls executed at once per connection.
    #[arg(long, default_value_t = 3)]
    workers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = EndpointConfig::new("calc-server")
        .parallel_workers(args.workers)
        .service(Arc::new(Calc::new(args.skew).service()));
    let server = Server::new(config);

    let listener = TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!(addr = %listener.local_addr()?, skew = args.skew, "serving calc");

    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("interrupted, closing");
    if let Err(e) = server.close().await {
        tracing::warn!(error = %e, "close reported errors");
    }
    match serving.await? {
        Err(Error::ServerClosed) | Ok(()) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
