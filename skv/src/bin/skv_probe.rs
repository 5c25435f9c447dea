//! # skv-probe
//!
//! Smoke-tests a store through the facade: connect, set/get, publish to a
//! subscribed channel, then clean up and disconnect.
//!
//! ```text
//! skv-probe [redis://host:port/db]
//! ```
//!
//! Without an argument the URI comes from `SERVICE_REDIS_URI`. Log verbosity
//! follows `RUST_LOG` (default `info`).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use skv::{FacadeOptions, MessageDataOptions, Payload, StoreFacade};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROBE_KEY: &str = "skv-probe:key";
const PROBE_CHANNEL: &str = "skv-probe:channel";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let options = match std::env::args().nth(1) {
        Some(uri) => FacadeOptions::with_uri(uri),
        None => FacadeOptions::from_env(),
    };
    let facade = StoreFacade::new(options);
    facade
        .events()
        .register(|event| info!(event = %event, "lifecycle"));

    facade.connect().await.context("connect")?;

    let ack = facade.set(PROBE_KEY, r#"{"probe":true}"#).await.context("set")?;
    let value = facade.get(PROBE_KEY).await.context("get")?;
    info!(%ack, ?value, "roundtrip");
    if value != Some(json!({ "probe": true })) {
        bail!("unexpected value read back: {:?}", value);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = facade
        .subscribe(
            &[PROBE_CHANNEL],
            move |message| {
                if let Payload::Text(text) = message.payload {
                    let _ = tx.send(text);
                }
            },
            false,
        )
        .await
        .context("subscribe")?;

    let receivers = facade
        .publish(PROBE_CHANNEL, &json!({ "x": 1 }))
        .await
        .context("publish")?;
    let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .context("no message within 5s")?
        .context("listener dropped")?;
    let data = StoreFacade::message_data(&text, MessageDataOptions::default());
    info!(receivers, ?data, "pubsub");

    facade
        .unsubscribe(&[PROBE_CHANNEL], Some(listener))
        .await
        .context("unsubscribe")?;
    facade.remove(PROBE_KEY).await.context("remove")?;
    facade.disconnect().await.context("disconnect")?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
