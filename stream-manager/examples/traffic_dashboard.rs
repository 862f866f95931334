//! Traffic Dashboard - several panels sharing a few live streams
//!
//! This example shows how independent dashboard panels subscribe to streaming
//! endpoints without each opening its own connection:
//! - The incident list and incident map share one `/stream/incidents` connection
//! - The flow panel gets its own `/stream/flow` connection
//! - A status line is printed every 10 seconds
//!
//! Point it at a server with:
//!   TRAFFIC_API_URL=http://localhost:8080/api/ cargo run -p traffic-stream-manager --example traffic_dashboard
//!
//! Stop with Ctrl-C.

use std::time::Duration;

use stream_manager::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stream_manager=debug")),
        )
        .init();

    let base_url = std::env::var("TRAFFIC_API_URL")
        .unwrap_or_else(|_| "http://localhost:8080/api/".to_string());
    println!("=== Traffic Dashboard ({base_url}) ===\n");

    let transport = SseTransport::from_config(SseClientConfig::new(base_url))?;
    let manager = StreamManager::new(transport, ManagerConfig::default())?;

    let panel = |name: &'static str| {
        Callbacks::new(move |envelope: &Envelope| {
            println!("[{name}] {} {}", envelope.event_type(), envelope.data());
        })
        .on_connect(move || println!("[{name}] connected"))
        .on_disconnect(move || println!("[{name}] disconnected"))
        .on_error(move |e: &StreamError| println!("[{name}] error: {e}"))
    };

    let handles = vec![
        manager.subscribe(
            "stream/incidents",
            Subscriber::new("incident-list", panel("incident-list")),
        ),
        manager.subscribe(
            "stream/incidents",
            Subscriber::new("incident-map", panel("incident-map")),
        ),
        manager.subscribe("stream/flow", Subscriber::new("flow", panel("flow"))),
    ];

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = ticker.tick() => println!("\n{}", manager.status()),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\nShutting down...");
    for handle in handles {
        handle.unsubscribe();
    }
    manager.shutdown().await?;
    Ok(())
}
