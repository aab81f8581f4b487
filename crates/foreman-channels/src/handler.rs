use crate::message::Message;
use async_trait::async_trait;
use foreman_core::ForemanResult;
use std::future::Future;

/// Callback invoked for each message delivered to a subscriber.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one delivered message. An error marks the message failed.
    async fn on_message(&self, message: &Message) -> ForemanResult<()>;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`].
///
/// ```ignore
/// bus.subscribe("audit", Arc::new(handler_fn(|msg| async move {
///     tracing::info!(id = %msg.id, "seen");
///     Ok(())
/// })));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = ForemanResult<()>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = ForemanResult<()>> + Send,
{
    async fn on_message(&self, message: &Message) -> ForemanResult<()> {
        (self.f)(message.clone()).await
    }
}
