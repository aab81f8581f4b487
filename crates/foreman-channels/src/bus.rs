use crate::handler::MessageHandler;
use crate::message::{Message, MessageStatus, Tracked, BROADCAST};
use foreman_core::{panic_message, BusConfig, ForemanError, ForemanResult};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Queue = mpsc::UnboundedReceiver<Arc<Tracked>>;

/// Point-in-time bus statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationStats {
    /// Messages retained in history.
    pub total_messages: usize,
    /// Retained messages delivered.
    pub delivered_messages: usize,
    /// Retained messages whose delivery failed.
    pub failed_messages: usize,
    /// Delivered share of retained messages, 0-100.
    pub success_rate: f64,
    /// Current subscriber count.
    pub active_subscribers: usize,
    /// Messages waiting for the consumer loop.
    pub queue_depth: usize,
    /// Whether the consumer loop is running.
    pub running: bool,
}

struct Shared {
    sender: mpsc::UnboundedSender<Arc<Tracked>>,
    subscribers: RwLock<BTreeMap<String, Arc<dyn MessageHandler>>>,
    history: Mutex<VecDeque<Arc<Tracked>>>,
    history_limit: usize,
    queued: AtomicUsize,
    poll_interval: Duration,
}

impl Shared {
    fn subscriber(&self, id: &str) -> Option<Arc<dyn MessageHandler>> {
        self.subscribers.read().get(id).cloned()
    }

    fn subscribers(&self) -> Vec<(String, Arc<dyn MessageHandler>)> {
        self.subscribers
            .read()
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect()
    }

    fn record(&self, tracked: Arc<Tracked>) {
        let mut history = self.history.lock();
        history.push_back(tracked);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    async fn deliver(&self, tracked: &Tracked) {
        let message = tracked.snapshot();
        let Some(handler) = self.subscriber(&message.recipient) else {
            tracked.settle(MessageStatus::Failed);
            warn!(message_id = %message.id, recipient = %message.recipient, "Recipient not found");
            return;
        };

        match invoke(&message.recipient, handler.as_ref(), &message).await {
            Ok(()) => {
                tracked.settle(MessageStatus::Delivered);
                debug!(message_id = %message.id, recipient = %message.recipient, "Message delivered");
            }
            Err(e) => {
                tracked.settle(MessageStatus::Failed);
                error!(message_id = %message.id, recipient = %message.recipient, error = %e, "Message delivery failed");
            }
        }
    }
}

/// Run a subscriber callback, converting a panic into an error.
async fn invoke(subscriber: &str, handler: &dyn MessageHandler, message: &Message) -> ForemanResult<()> {
    match AssertUnwindSafe(handler.on_message(message)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ForemanError::Channel(format!(
            "subscriber '{subscriber}' panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

struct Consumer {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<Queue>,
}

/// In-process asynchronous message bus.
///
/// Point-to-point messages are queued and delivered in FIFO order by a single
/// consumer task; broadcasts are fanned out to every subscriber inline.
/// Delivery is best effort: failures are logged and reflected in the
/// message status, never returned to the sender.
pub struct MessageBus {
    shared: Arc<Shared>,
    queue: Mutex<Option<Queue>>,
    consumer: Mutex<Option<Consumer>>,
}

impl MessageBus {
    /// Bus with an empty queue; call [`start`](Self::start) to begin delivery.
    pub fn new(config: &BusConfig) -> Self {
        let (sender, queue) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                sender,
                subscribers: RwLock::new(BTreeMap::new()),
                history: Mutex::new(VecDeque::new()),
                history_limit: config.history_limit.max(1),
                queued: AtomicUsize::new(0),
                poll_interval: config.poll_interval(),
            }),
            queue: Mutex::new(Some(queue)),
            consumer: Mutex::new(None),
        }
    }

    /// Spawn the consumer loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut consumer = self.consumer.lock();
        if consumer.is_some() {
            return;
        }
        let Some(queue) = self.queue.lock().take() else {
            error!("Message queue unavailable; bus cannot start");
            return;
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(consume(Arc::clone(&self.shared), queue, shutdown_rx));
        *consumer = Some(Consumer { shutdown, join });
        info!("Message bus started");
    }

    /// Stop the consumer loop and wait for it to exit.
    ///
    /// Undelivered messages stay queued until the next [`start`](Self::start).
    pub async fn stop(&self) -> ForemanResult<()> {
        let consumer = self.consumer.lock().take();
        let Some(consumer) = consumer else {
            return Ok(());
        };
        // A send error means the loop already exited.
        let _ = consumer.shutdown.send(true);
        let queue = consumer
            .join
            .await
            .map_err(|e| ForemanError::Channel(format!("consumer task failed: {e}")))?;
        *self.queue.lock() = Some(queue);
        info!("Message bus stopped");
        Ok(())
    }

    /// Whether the consumer loop is running.
    pub fn is_running(&self) -> bool {
        self.consumer.lock().is_some()
    }

    /// Queue a message for `recipient`. Returns false only if it could not be enqueued.
    ///
    /// A message addressed to [`BROADCAST`] is broadcast instead.
    pub async fn send(&self, sender: &str, recipient: &str, message_type: &str, payload: Value) -> bool {
        if recipient == BROADCAST {
            return self.broadcast(sender, message_type, payload).await;
        }

        let tracked = Arc::new(Tracked::new(Message::new(sender, recipient, message_type, payload)));
        let message_id = tracked.message().id;
        self.shared.record(Arc::clone(&tracked));
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.shared.sender.send(Arc::clone(&tracked)).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            tracked.settle(MessageStatus::Failed);
            error!(%message_id, sender, recipient, "Failed to enqueue message");
            return false;
        }
        info!(%message_id, sender, recipient, message_type, "Message queued");
        true
    }

    /// Deliver a message to every current subscriber before returning.
    ///
    /// A failing subscriber is logged and skipped; the rest still receive it.
    pub async fn broadcast(&self, sender: &str, message_type: &str, payload: Value) -> bool {
        let mut message = Message::new(sender, BROADCAST, message_type, payload);
        message.status = MessageStatus::Broadcasting;

        let subscribers = self.shared.subscribers();
        let mut failures = 0usize;
        for (id, handler) in &subscribers {
            if let Err(e) = invoke(id, handler.as_ref(), &message).await {
                failures += 1;
                warn!(message_id = %message.id, subscriber = %id, error = %e, "Broadcast delivery failed");
            }
        }

        info!(
            message_id = %message.id,
            sender,
            message_type,
            subscribers = subscribers.len(),
            failures,
            "Broadcast sent"
        );
        self.shared.record(Arc::new(Tracked::new(message)));
        true
    }

    /// Register (or replace) the handler for `subscriber_id`.
    pub fn subscribe(&self, subscriber_id: impl Into<String>, handler: Arc<dyn MessageHandler>) -> bool {
        let subscriber_id = subscriber_id.into();
        info!(subscriber = %subscriber_id, "Subscriber added");
        self.shared.subscribers.write().insert(subscriber_id, handler);
        true
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        let removed = self.shared.subscribers.write().remove(subscriber_id).is_some();
        if removed {
            info!(subscriber = %subscriber_id, "Subscriber removed");
        }
        removed
    }

    /// The most recent `limit` messages, oldest first.
    pub fn get_message_history(&self, limit: usize) -> Vec<Message> {
        let history = self.shared.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).map(|t| t.snapshot()).collect()
    }

    /// Counters over the retained history plus live queue state.
    pub fn get_communication_stats(&self) -> CommunicationStats {
        let (total, delivered, failed) = {
            let history = self.shared.history.lock();
            let mut delivered = 0;
            let mut failed = 0;
            for tracked in history.iter() {
                match tracked.status() {
                    MessageStatus::Delivered => delivered += 1,
                    MessageStatus::Failed => failed += 1,
                    _ => {}
                }
            }
            (history.len(), delivered, failed)
        };
        let success_rate = if total == 0 {
            0.0
        } else {
            delivered as f64 / total as f64 * 100.0
        };
        CommunicationStats {
            total_messages: total,
            delivered_messages: delivered,
            failed_messages: failed,
            success_rate,
            active_subscribers: self.shared.subscribers.read().len(),
            queue_depth: self.shared.queued.load(Ordering::SeqCst),
            running: self.is_running(),
        }
    }
}

async fn consume(shared: Arc<Shared>, mut queue: Queue, mut shutdown: watch::Receiver<bool>) -> Queue {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            popped = tokio::time::timeout(shared.poll_interval, queue.recv()) => match popped {
                Ok(Some(tracked)) => {
                    shared.queued.fetch_sub(1, Ordering::SeqCst);
                    shared.deliver(&tracked).await;
                }
                Ok(None) => break,
                // Idle; wait again.
                Err(_) => continue,
            },
        }
    }
    queue
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.get_mut().take() {
            let _ = consumer.shutdown.send(true);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl MessageHandler for PanickingHandler {
        async fn on_message(&self, _message: &Message) -> ForemanResult<()> {
            panic!("subscriber crashed");
        }
    }

    fn test_bus() -> MessageBus {
        MessageBus::new(&BusConfig {
            history_limit: 100,
            poll_interval_ms: 20,
        })
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn counting_handler(counter: Arc<AtomicU32>) -> Arc<dyn MessageHandler> {
        Arc::new(handler_fn(move |_msg| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_send_to_subscriber_is_delivered() {
        let bus = test_bus();
        let hits = Arc::new(AtomicU32::new(0));
        bus.subscribe("finance", counting_handler(Arc::clone(&hits)));
        bus.start();

        assert!(bus.send("boss", "finance", "invoice", json!({"n": 1})).await);
        wait_until(|| bus.get_communication_stats().delivered_messages == 1).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let history = bus.get_message_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MessageStatus::Delivered);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_recipient_fails() {
        let bus = test_bus();
        bus.start();
        assert!(bus.send("boss", "nobody", "ping", json!({})).await);
        wait_until(|| bus.get_communication_stats().failed_messages == 1).await;
        let stats = bus.get_communication_stats();
        assert_eq!(stats.delivered_messages, 0);
        assert_eq!(stats.queue_depth, 0);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_marks_failed() {
        let bus = test_bus();
        bus.subscribe(
            "flaky",
            Arc::new(handler_fn(|_msg| async {
                Err(ForemanError::Channel("mailbox full".into()))
            })),
        );
        bus.start();
        bus.send("boss", "flaky", "ping", json!({})).await;
        wait_until(|| bus.get_communication_stats().failed_messages == 1).await;
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_per_recipient() {
        let bus = test_bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            "data",
            Arc::new(handler_fn(move |msg| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(msg.payload["n"].as_u64().unwrap_or_default());
                    Ok(())
                }
            })),
        );
        for n in 0..5 {
            bus.send("boss", "data", "row", json!({"n": n})).await;
        }
        bus.start();
        wait_until(|| seen.lock().len() == 5).await;
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failing_subscribers() {
        let bus = test_bus();
        let first = Arc::new(AtomicU32::new(0));
        let last = Arc::new(AtomicU32::new(0));
        bus.subscribe("a", counting_handler(Arc::clone(&first)));
        bus.subscribe(
            "b",
            Arc::new(handler_fn(|_msg| async {
                Err(ForemanError::Channel("boom".into()))
            })),
        );
        bus.subscribe("c", Arc::new(PanickingHandler));
        bus.subscribe("d", counting_handler(Arc::clone(&last)));

        assert!(bus.broadcast("boss", "announce", json!({})).await);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 1);

        let history = bus.get_message_history(1);
        assert_eq!(history[0].status, MessageStatus::Broadcasting);
        assert_eq!(history[0].recipient, BROADCAST);
    }

    #[tokio::test]
    async fn test_send_to_broadcast_address_fans_out() {
        let bus = test_bus();
        let hits = Arc::new(AtomicU32::new(0));
        bus.subscribe("a", counting_handler(Arc::clone(&hits)));
        assert!(bus.send("boss", BROADCAST, "announce", json!({})).await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.get_communication_stats().queue_depth, 0);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = test_bus();
        let hits = Arc::new(AtomicU32::new(0));
        assert!(bus.subscribe("a", counting_handler(Arc::clone(&hits))));
        assert!(bus.subscribe("a", counting_handler(hits)));
        assert_eq!(bus.get_communication_stats().active_subscribers, 1);
        assert!(bus.unsubscribe("a"));
        assert!(!bus.unsubscribe("a"));
        assert!(!bus.unsubscribe("never-subscribed"));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = MessageBus::new(&BusConfig {
            history_limit: 3,
            poll_interval_ms: 20,
        });
        for n in 0..5 {
            bus.send("boss", "data", "row", json!({"n": n})).await;
        }
        let history = bus.get_message_history(100);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].payload["n"], 2);
        assert_eq!(history[2].payload["n"], 4);
        assert_eq!(bus.get_message_history(1)[0].payload["n"], 4);
    }

    #[tokio::test]
    async fn test_stop_keeps_queue_for_restart() {
        let bus = test_bus();
        let hits = Arc::new(AtomicU32::new(0));
        bus.subscribe("a", counting_handler(Arc::clone(&hits)));

        bus.start();
        bus.start();
        assert!(bus.is_running());
        bus.stop().await.unwrap();
        assert!(!bus.is_running());

        bus.send("boss", "a", "ping", json!({})).await;
        let stats = bus.get_communication_stats();
        assert_eq!(stats.queue_depth, 1);
        assert_eq!(bus.get_message_history(1)[0].status, MessageStatus::Pending);

        bus.start();
        wait_until(|| hits.load(Ordering::SeqCst) == 1).await;
        bus.stop().await.unwrap();
    }

    #[test]
    fn test_empty_stats() {
        let stats = test_bus().get_communication_stats();
        assert_eq!(stats.total_messages, 0);
        assert!(stats.success_rate.abs() < f64::EPSILON);
        assert!(!stats.running);
    }
}
