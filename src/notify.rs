//! Order-created notifications.
//!
//! Checkout only needs to say "order X exists"; delivery (email, retries,
//! at-least-once bookkeeping) belongs to whoever drains the queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::orders::OrderId;
use crate::transaction_aware::{HookResult, TransactionAware};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification queue is closed")]
    QueueClosed,
}

/// Message placed on the queue after an order commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderCreated {
    pub order_id: OrderId,
}

/// Fire-and-forget "order created" capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, order_id: OrderId) -> Result<(), NotifyError>;
}

/// [`Notifier`] that enqueues onto an in-process channel.
#[derive(Debug, Clone)]
pub struct QueueNotifier {
    sender: mpsc::UnboundedSender<OrderCreated>,
}

impl QueueNotifier {
    /// Notifier plus the receiving end for the background worker.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OrderCreated>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for QueueNotifier {
    async fn notify(&self, order_id: OrderId) -> Result<(), NotifyError> {
        self.sender
            .send(OrderCreated { order_id })
            .map_err(|_| NotifyError::QueueClosed)
    }
}

/// Commit hook that announces a freshly committed order.
pub struct OrderCreatedHook {
    order_id: OrderId,
    notifier: Arc<dyn Notifier>,
}

impl OrderCreatedHook {
    pub fn new(order_id: OrderId, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self { order_id, notifier })
    }
}

#[async_trait]
impl TransactionAware for OrderCreatedHook {
    async fn on_commit(&self) -> HookResult {
        self.notifier.notify(self.order_id).await?;
        tracing::debug!(order_id = %self.order_id, "order-created notification enqueued");
        Ok(())
    }

    async fn on_rollback(&self) -> HookResult {
        tracing::debug!(order_id = %self.order_id, "order rolled back, nothing to announce");
        Ok(())
    }
}
