//! Basic example: list nearby button-tag advertisements
//!
//! Run with: cargo run --example discover_devices

use std::time::Duration;

use simplekey_ble::{ClientConfig, ClientEvent, KeyClient, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("simplekey_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Scanning for button-tag peripherals for 10 seconds...\n");

    // No target name: discoveries are reported but nothing is
    // connected.
    let client = KeyClient::new(ClientConfig::default()).await?;

    let _handle = client.on_event(|event| {
        if let ClientEvent::Fault(error) = event {
            eprintln!("Error: {error}");
        }
    });

    client.start().await?;

    tokio::time::sleep(Duration::from_secs(10)).await;

    client.stop().await?;
    client.shutdown().await?;

    println!("\nDone. Run with RUST_LOG=simplekey_ble=debug to see every advertisement.");

    Ok(())
}
