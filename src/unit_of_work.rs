use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;

use crate::{Executor, StoreResult, TransactionAware};

/// Sets `lock_timeout` for the current transaction only.
const SET_LOCK_TIMEOUT_SQL: &str = "SELECT set_config('lock_timeout', $1, true)";

/// Unit of Work pattern for managing database transactions.
///
/// The checkout engine only sees this trait, so any store that can hand out
/// transactional sessions with row-level locking can back it.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Session: UnitOfWorkSession;

    /// Begin a new transaction session.
    async fn begin(&self) -> StoreResult<Self::Session>;
}

/// Represents a single database transaction session.
///
/// Row locks taken through the session's executor are held until
/// [`commit`](Self::commit) or [`rollback`](Self::rollback). Registered
/// hooks run after either one, once the locks are gone.
#[async_trait]
pub trait UnitOfWorkSession: Send + Sync {
    /// Get the executor for this session (provides access to the transaction).
    fn executor(&self) -> &Executor;

    /// Register a component that needs to be notified of transaction events.
    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>);

    /// Commit the transaction and notify all registered observers.
    async fn commit(self) -> StoreResult<()>;

    /// Rollback the transaction and notify all registered observers.
    async fn rollback(self) -> StoreResult<()>;
}

/// Default implementation of UnitOfWork for PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresUnitOfWork {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PostgresUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Bound how long a session waits on another transaction's row lock.
    ///
    /// Waits beyond this fail with SQLSTATE `55P03`, which checkout reports
    /// as retryable.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Session = PostgresUnitOfWorkSession;

    async fn begin(&self) -> StoreResult<Self::Session> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            sqlx::query(SET_LOCK_TIMEOUT_SQL)
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }

        Ok(PostgresUnitOfWorkSession::new(tx))
    }
}

/// Default implementation of UnitOfWorkSession for PostgreSQL.
pub struct PostgresUnitOfWorkSession {
    executor: Executor,
    observers: Arc<RwLock<Vec<Arc<dyn TransactionAware>>>>,
}

impl PostgresUnitOfWorkSession {
    /// Create a new session from a PostgreSQL transaction.
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            executor: Executor::new(tx),
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn observers(&self) -> Vec<Arc<dyn TransactionAware>> {
        self.observers.read().clone()
    }
}

#[async_trait]
impl UnitOfWorkSession for PostgresUnitOfWorkSession {
    fn executor(&self) -> &Executor {
        &self.executor
    }

    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    async fn commit(self) -> StoreResult<()> {
        let tx = self.executor.take_transaction().await?;
        tx.commit().await?;

        // The commit is durable at this point; a failing hook must not turn
        // it into an error for the caller.
        for observer in self.observers() {
            if let Err(error) = observer.on_commit().await {
                tracing::warn!(%error, "commit hook failed");
            }
        }
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        let tx = self.executor.take_transaction().await?;
        tx.rollback().await?;

        for observer in self.observers() {
            if let Err(error) = observer.on_rollback().await {
                tracing::warn!(%error, "rollback hook failed");
            }
        }
        Ok(())
    }
}
