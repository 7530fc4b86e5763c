//! Calc served across an in-memory connection.

use std::sync::Arc;

use calc::Calc;
use calc::CalcClient;
use calc::DIVIDE_BY_ZERO;
use tokio::io::duplex;
use varrun::Context;
use varrun::Endpoint;
use varrun::EndpointConfig;
use varrun::Error;

fn peer(name: &str, skew: i64) -> EndpointConfig {
    EndpointConfig::new(name).service(Arc::new(Calc::new(skew).service()))
}

/// A client with no services of its own, talking to a calc with `skew`.
fn serve_calc(skew: i64) -> (CalcClient, Endpoint) {
    let (a, b) = duplex(64 * 1024);
    let client = Endpoint::new(a, EndpointConfig::new("client"));
    let server = Endpoint::new(b, peer("calc", skew));
    (CalcClient::new(client), server)
}

#[tokio::test]
async fn test_div_without_skew() -> anyhow::Result<()> {
    let (calc, _server) = serve_calc(0);
    let ctx = Context::background();
    assert_eq!(calc.div(&ctx, 6, 3).await??, 2);
    Ok(())
}

#[tokio::test]
async fn test_peers_add_with_each_others_skew() -> anyhow::Result<()> {
    let (a, b) = duplex(64 * 1024);
    let one = CalcClient::new(Endpoint::new(a, peer("one", 1)));
    let two = CalcClient::new(Endpoint::new(b, peer("two", 2)));
    let ctx = Context::background();

    // Each answer comes from the other side.
    let (from_two, from_one) = tokio::join!(one.add(&ctx, 1, 2), two.add(&ctx, 1, 2));
    assert_eq!(from_two??, 5);
    assert_eq!(from_one??, 4);
    Ok(())
}

#[tokio::test]
async fn test_div_err_is_an_application_fault() -> anyhow::Result<()> {
    let (calc, server) = serve_calc(0);
    let ctx = Context::background();

    let quotient = calc.div_err(&ctx, 6, 0).await??;
    let fault = quotient.fault.expect("dividing by zero should fault");
    assert_eq!(fault.kind(), DIVIDE_BY_ZERO);
    assert_eq!(fault.message(), "cannot divide 6 by zero");

    // Div reports the same problem in the reply's error slot.
    let err = calc.div(&ctx, 6, 0).await?.unwrap_err();
    assert_eq!(err.message, "cannot divide 6 by zero");

    // Neither is a protocol failure: the connection stays up.
    assert!(!calc.endpoint().is_closed());
    assert!(!server.is_closed());
    assert_eq!(calc.add(&ctx, 2, 2).await??, 4);
    Ok(())
}

#[tokio::test]
async fn test_unserved_calc_closes_with_protocol_error() -> anyhow::Result<()> {
    let (a, b) = duplex(64 * 1024);
    let calc = CalcClient::new(Endpoint::new(a, EndpointConfig::new("client")));
    let bare = Endpoint::new(b, EndpointConfig::new("bare"));

    let ctx = Context::background();
    assert!(matches!(calc.add(&ctx, 1, 2).await, Err(Error::ClosedByCounterpart)));
    assert!(matches!(bare.closed().await, Error::Protocol(_)));
    Ok(())
}
