//! End-to-end tests over real HTTP server-sent events.
//!
//! A warp server plays the traffic backend; the manager talks to it through
//! [`SseTransport`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use stream_manager::{
    Callbacks, ConnectionState, ManagerConfig, SseClientConfig, SseTransport, StreamError,
    StreamManager, Subscriber, SubscriberEvent,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use warp::Filter;

async fn start_server() -> SocketAddr {
    let incidents = warp::path!("stream" / "incidents").map(|| {
        let events = vec![
            warp::sse::Event::default()
                .id("41")
                .data(r#"{"type":"incident","data":{"road":"A1","lanes_closed":2}}"#),
            warp::sse::Event::default().id("42").data("{truncated"),
        ];
        // Keep the stream open after the scripted events.
        let stream = futures::stream::iter(events.into_iter().map(Ok::<_, Infallible>))
            .chain(futures::stream::pending());
        warp::sse::reply(stream)
    });

    let down = warp::path!("stream" / "down").map(|| {
        warp::reply::with_status("maintenance", warp::http::StatusCode::SERVICE_UNAVAILABLE)
    });

    let routes = incidents.or(down);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn manager_for(addr: SocketAddr, config: ManagerConfig) -> StreamManager {
    let transport = SseTransport::from_config(SseClientConfig::new(format!("http://{addr}/")))
        .expect("Failed to build transport");
    StreamManager::new(transport, config).expect("Failed to build manager")
}

async fn next_event(rx: &mut UnboundedReceiver<SubscriberEvent>) -> SubscriberEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timeout waiting for subscriber event")
        .expect("Subscriber channel closed")
}

#[tokio::test]
async fn test_envelopes_flow_from_sse_server() {
    let addr = start_server().await;
    let manager = manager_for(addr, ManagerConfig::default());

    let (callbacks, mut rx) = Callbacks::channel();
    let _handle = manager.subscribe("stream/incidents", Subscriber::new("incident-panel", callbacks));

    assert_eq!(next_event(&mut rx).await, SubscriberEvent::Connected);

    match next_event(&mut rx).await {
        SubscriberEvent::Event(envelope) => {
            assert_eq!(envelope.event_type(), "incident");
            assert_eq!(envelope.data()["road"], "A1");
            assert_eq!(envelope.id.as_deref(), Some("41"));
        }
        other => panic!("Expected incident envelope, got {other:?}"),
    }

    match next_event(&mut rx).await {
        SubscriberEvent::Event(envelope) => {
            assert!(envelope.is_parse_error());
            assert_eq!(envelope.id.as_deref(), Some("42"));
        }
        other => panic!("Expected parse_error envelope, got {other:?}"),
    }

    let status = manager.status();
    assert_eq!(status.active_connections, 1);
    assert_eq!(status.connections[0].state, ConnectionState::Open);

    manager.shutdown().await.expect("Shutdown failed");
    assert_eq!(next_event(&mut rx).await, SubscriberEvent::Disconnected);
}

#[tokio::test]
async fn test_unavailable_endpoint_exhausts_retries() {
    let addr = start_server().await;
    let config = ManagerConfig::default()
        .with_reconnect_delay(Duration::from_millis(10), Duration::from_millis(40))
        .with_max_retries(2);
    let manager = manager_for(addr, config);

    let (callbacks, mut rx) = Callbacks::channel();
    let _handle = manager.subscribe("stream/down", Subscriber::new("s1", callbacks));

    let mut transport_errors = 0;
    loop {
        match next_event(&mut rx).await {
            SubscriberEvent::Error(StreamError::Transport(e)) => {
                assert!(e.to_string().contains("503"), "unexpected error: {e}");
                transport_errors += 1;
            }
            SubscriberEvent::Error(StreamError::RetriesExhausted { attempts, .. }) => {
                assert_eq!(attempts, 2);
            }
            SubscriberEvent::Disconnected => break,
            other => panic!("Unexpected event {other:?}"),
        }
    }

    assert_eq!(transport_errors, 2);
    assert_eq!(manager.status().active_connections, 0);
}
