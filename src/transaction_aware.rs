use async_trait::async_trait;

use crate::notify::NotifyError;

/// Error raised by a commit or rollback hook.
///
/// Hooks run after the transaction has already finished, so these errors
/// are logged by the session and never undo the outcome.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),
}

/// Result type for transaction hooks.
pub type HookResult = Result<(), HookError>;

/// Trait for components that need to be notified of transaction lifecycle events.
///
/// Hooks registered on a [`UnitOfWorkSession`](crate::UnitOfWorkSession) run
/// strictly after the database has released the transaction's row locks.
/// This is the only place a checkout talks to the outside world, such as the
/// order-created notification queue.
#[async_trait]
pub trait TransactionAware: Send + Sync {
    /// Called after a successful transaction commit.
    async fn on_commit(&self) -> HookResult;

    /// Called after a transaction rollback.
    async fn on_rollback(&self) -> HookResult {
        Ok(())
    }
}
