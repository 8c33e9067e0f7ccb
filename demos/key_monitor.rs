//! Monitor the buttons and reed switch of a Simple Key peripheral
//!
//! Run with: cargo run --example key_monitor -- <device-name>

use simplekey_ble::{ClientConfig, ClientEvent, KeyClient, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let device_name = std::env::args().nth(1);

    let config = match &device_name {
        Some(name) => {
            println!("Looking for a device named {name}");
            ClientConfig::for_device(name.clone())
        }
        None => {
            println!("WARNING: No device name specified. Will not connect.");
            ClientConfig::default()
        }
    };

    let client = KeyClient::new(config).await?;
    let mut events = client.subscribe_events();

    client.start().await?;
    println!("Scanning... Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            event = events.recv() => {
                let Ok(event) = event else { break };
                report(&event);
            }
        }
    }

    client.shutdown().await?;

    Ok(())
}

fn report(event: &ClientEvent) {
    match event {
        ClientEvent::Connected { peripheral } => {
            println!("Connected to {peripheral}");
        }
        ClientEvent::Disconnected { peripheral } => {
            println!("Disconnected from {peripheral}");
        }
        ClientEvent::Subscribed { .. } => {
            println!("Subscribed for button notifications");
        }
        ClientEvent::Keys { keys, .. } => {
            if keys.is_empty() {
                println!("No buttons are pressed.");
            } else {
                for flag in keys.flags() {
                    println!("{}", flag.press_message());
                }
            }
        }
        ClientEvent::Fault(error) => {
            eprintln!("Error: {error}");
        }
    }
}
