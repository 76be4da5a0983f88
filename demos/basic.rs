use bitcaster_sdk::{BitcasterClient, ClientOptions, DispatchMode};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let stream = std::env::var("BITCASTER_STREAM")?;

    let client = BitcasterClient::from_env()?.with_options(ClientOptions {
        dispatch: DispatchMode::Deferred,
        ..ClientOptions::default()
    })?;

    client.ping().await?;

    for order in 1..=5 {
        client
            .enqueue(&stream, json!({"order": order, "status": "shipped"}))
            .await?;
    }
    println!("queued 5 notifications, queue empty: {}", client.is_queue_empty());

    let report = client.shutdown().await;
    if !report.is_clean() {
        eprintln!("{} notifications were not delivered", report.undelivered);
    }

    Ok(())
}
