#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Message bus delivery tests against a running consumer loop.

use foreman_channels::*;
use foreman_core::{BusConfig, ForemanError};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn bus() -> MessageBus {
    MessageBus::new(&BusConfig {
        history_limit: 50,
        poll_interval_ms: 10,
    })
}

async fn settled(bus: &MessageBus, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = bus.get_communication_stats();
            if stats.delivered_messages + stats.failed_messages >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("messages did not settle");
}

// ---------------------------------------------------------------------------
// 1. Every point-to-point message settles exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribed_and_unsubscribed_recipients_settle_once() {
    let bus = bus();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    bus.subscribe(
        "marketing",
        Arc::new(handler_fn(move |_msg| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })),
    );
    bus.start();

    assert!(bus.send("boss", "marketing", "campaign", json!({"id": 1})).await);
    assert!(bus.send("boss", "design", "logo", json!({"id": 2})).await);
    settled(&bus, 2).await;
    bus.stop().await.unwrap();

    let history = bus.get_message_history(10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, MessageStatus::Delivered);
    assert_eq!(history[1].status, MessageStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = bus.get_communication_stats();
    assert_eq!(stats.total_messages, 2);
    assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
}

// ---------------------------------------------------------------------------
// 2. Broadcast alongside queued traffic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_reaches_all_subscribers_despite_failures() {
    let bus = bus();
    let received = Arc::new(AtomicU32::new(0));
    for id in ["a", "b", "c"] {
        let received = Arc::clone(&received);
        let reject = id == "b";
        bus.subscribe(
            id,
            Arc::new(handler_fn(move |_msg| {
                let received = Arc::clone(&received);
                async move {
                    if reject {
                        return Err(ForemanError::Channel("b rejected".into()));
                    }
                    received.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })),
        );
    }

    assert!(bus.broadcast("boss", "shutdown_notice", json!({})).await);
    assert_eq!(received.load(Ordering::SeqCst), 2);

    let stats = bus.get_communication_stats();
    assert_eq!(stats.active_subscribers, 3);
    assert_eq!(stats.total_messages, 1);
    assert_eq!(stats.delivered_messages, 0);
}
