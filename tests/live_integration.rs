use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitcaster_sdk::{BitcasterClient, BitcasterError, ClientOptions, DispatchMode, Endpoint};
use serde_json::json;

/// Stream used by the live test, in addition to `BITCASTER_AEP`.
const STREAM_ENV: &str = "BITCASTER_TEST_STREAM";

fn load_live_config() -> Result<(Endpoint, String), String> {
    let endpoint = Endpoint::from_env().map_err(|err| err.to_string())?;
    let stream = std::env::var(STREAM_ENV)
        .map_err(|_| format!("missing {STREAM_ENV} environment variable"))?;
    Ok((endpoint, stream))
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be after epoch")
        .as_millis()
}

#[tokio::test]
async fn live_send_queue_and_drain() {
    let (endpoint, stream) = match load_live_config() {
        Ok(values) => values,
        Err(reason) => {
            eprintln!("skipping live test: {reason}");
            return;
        }
    };

    let client = BitcasterClient::from_endpoint(endpoint.clone(), ClientOptions::default())
        .expect("client must build");
    client.ping().await.expect("ping must succeed");

    let run = unique_suffix();
    client
        .send(&stream, &json!({"run": run, "mode": "immediate"}))
        .await
        .expect("immediate delivery must succeed");

    let missing = client
        .send(&format!("missing-{run}"), &json!({}))
        .await
        .expect_err("unknown stream must fail");
    assert!(matches!(missing, BitcasterError::StreamNotFound { .. }));

    let deferred = BitcasterClient::from_endpoint(
        endpoint,
        ClientOptions {
            dispatch: DispatchMode::Deferred,
            shutdown_timeout_ms: 30_000,
            ..ClientOptions::default()
        },
    )
    .expect("deferred client must build");

    for index in 0..3 {
        deferred
            .enqueue(&stream, json!({"run": run, "mode": "deferred", "index": index}))
            .await
            .expect("enqueue never fails");
    }

    let report = tokio::time::timeout(Duration::from_secs(60), deferred.shutdown())
        .await
        .expect("shutdown is bounded by its own timeout");
    assert!(report.is_clean(), "undelivered: {}", report.undelivered);
}
