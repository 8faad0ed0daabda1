use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use storefront_orders::{HookResult, Notifier, NotifyError, OrderId, TransactionAware};

/// Notifier that remembers every order it was told about.
#[derive(Default)]
pub struct RecordingNotifier {
    notified: RwLock<Vec<OrderId>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notified(&self) -> Vec<OrderId> {
        self.notified.read().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, order_id: OrderId) -> Result<(), NotifyError> {
        self.notified.write().push(order_id);
        Ok(())
    }
}

/// Notifier whose queue is always down.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _order_id: OrderId) -> Result<(), NotifyError> {
        Err(NotifyError::QueueClosed)
    }
}

/// Transaction-aware observer that tracks which callback fired.
pub struct TrackingObserver {
    committed: Arc<RwLock<bool>>,
    rolled_back: Arc<RwLock<bool>>,
}

impl TrackingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            committed: Arc::new(RwLock::new(false)),
            rolled_back: Arc::new(RwLock::new(false)),
        })
    }

    pub fn is_committed(&self) -> bool {
        *self.committed.read()
    }

    pub fn is_rolled_back(&self) -> bool {
        *self.rolled_back.read()
    }
}

#[async_trait]
impl TransactionAware for TrackingObserver {
    async fn on_commit(&self) -> HookResult {
        *self.committed.write() = true;
        Ok(())
    }

    async fn on_rollback(&self) -> HookResult {
        *self.rolled_back.write() = true;
        Ok(())
    }
}
