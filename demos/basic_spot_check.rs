//! Basic spot check example against an in-memory fleet.
//!
//! This example shows how to:
//! - Describe a small fleet with canned sensor responses
//! - Configure an IOC check
//! - Run a SpotCheck and read its statistics
//!
//! Run with: cargo run --example basic_spot_check

use serde_json::json;
use spotcheck::audit::{emit_run_finished, emit_run_started, TracingObserver};
use spotcheck::checks::CollectingSink;
use spotcheck::directory::{InMemoryDirectory, InMemorySensor};
use spotcheck::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Spotcheck Basic Example ===\n");

    // One infected workstation, one clean server, one laptop that connects late
    let directory = InMemoryDirectory::new()
        .with_sensor(
            InMemorySensor::new("a1b2", Platform::Windows)
                .with_hostname("ws-finance-01")
                .with_tags(["prod"])
                .with_response(
                    "reg_list",
                    vec![json!({
                        "ERROR": 0,
                        "ROOT": "hklm\\software\\microsoft\\windows\\currentversion\\run",
                        "REGISTRY_VALUE": [{"NAME": "Updater", "VALUE": "c:\\users\\public\\u.exe"}]
                    })],
                )
                .with_response("file_info", vec![json!({"ERROR": 0, "FILE_PATH": "c:\\users\\public\\u.exe"})])
                .with_response("file_hash", vec![json!({"ERROR": 0, "HASH": "00ff"})]),
        )
        .with_sensor(
            InMemorySensor::new("c3d4", Platform::Windows)
                .with_hostname("srv-db-02")
                .with_tags(["prod"])
                .with_response("reg_list", vec![json!({"ERROR": 2})])
                .with_response("file_info", vec![json!({"ERROR": 2})]),
        )
        .with_sensor(
            InMemorySensor::new("e5f6", Platform::Windows)
                .with_hostname("laptop-07")
                .with_tags(["prod"])
                .offline_for(1)
                .with_response("reg_list", vec![json!({"ERROR": 2})])
                .with_response("file_info", vec![json!({"ERROR": 2})]),
        );

    let hits = Arc::new(CollectingSink::new());
    let check = IocCheck::new(
        IocCheckConfig::new()
            .with_registry_value(r"hklm\software\microsoft\windows\currentversion\run", "updater")
            .with_file(r"c:\users\public\u.exe"),
        hits.clone(),
    )?;

    let config = SpotCheckConfig::new()
        .with_concurrency(2)
        .with_retry_interval(Duration::from_secs(2))
        .with_filter(SensorFilter::new().with_linux(false).with_macos(false));

    let run_id = spotcheck::scheduler::new_run_id();
    let spot_check = SpotCheck::builder()
        .with_directory(directory)
        .with_check(check)
        .with_observer(TracingObserver::new(run_id.as_str()))
        .with_config(config)
        .with_run_id(run_id.as_str())
        .build()?;

    let enqueued = spot_check.start().await?;
    emit_run_started(spot_check.run_id(), enqueued, spot_check.config());
    println!("Run {}: {} sensors enqueued", spot_check.run_id(), enqueued);

    let finished = spot_check.wait(Some(Duration::from_secs(30))).await;
    if !finished {
        spot_check.stop().await;
    }

    println!("\n=== Hits ===");
    for record in hits.records() {
        println!(
            "! ({} / {}): {}",
            record.sensor_id,
            record.hostname.as_deref().unwrap_or("-"),
            record.hit_json()
        );
    }

    let stats = spot_check.stats();
    emit_run_finished(spot_check.run_id(), &stats);
    println!("\n=== Statistics ===");
    println!("Enqueued: {}", stats.enqueued);
    println!("Done: {}", stats.checks_done);
    println!("Offline re-checks: {}", stats.offline);
    println!("Errors: {}", stats.check_errors);

    println!("\n=== Example Complete ===");
    Ok(())
}
