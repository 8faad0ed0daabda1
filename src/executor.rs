use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};

/// Shared handle on the transaction of one unit of work.
///
/// Every repository taking part in a checkout holds a clone of the same
/// executor, so catalog reads, row locks and order inserts all run on the
/// same connection and commit or roll back together.
#[derive(Clone, Debug)]
pub struct Executor {
    tx: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

/// Exclusive access to the transaction slot, held for one statement.
///
/// The slot is `None` once the owning session has committed or rolled back.
pub type TransactionGuard<'a> = MutexGuard<'a, Option<Transaction<'static, Postgres>>>;

impl Executor {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Locks the transaction slot.
    ///
    /// Callers map an empty slot to [`StoreError::TransactionClosed`]:
    ///
    /// ```ignore
    /// let mut guard = executor.lock().await;
    /// let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
    /// ```
    pub async fn lock(&self) -> TransactionGuard<'_> {
        self.tx.lock().await
    }

    /// Takes ownership of the transaction, leaving None in its place.
    /// Only the session calls this, right before commit or rollback.
    pub(crate) async fn take_transaction(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.tx.lock().await.take().ok_or(StoreError::TransactionClosed)
    }
}
