//! Store configuration

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{CheckoutService, Notifier, PostgresUnitOfWork};

/// Database and checkout settings.
#[derive(Debug, Clone, Args)]
pub struct StoreConfig {
    /// `PostgreSQL` connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum pooled connections; each in-flight checkout holds one
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// How long a checkout waits on another checkout's row locks, in milliseconds
    #[arg(long, env = "DATABASE_LOCK_TIMEOUT_MS", default_value_t = 5_000)]
    pub lock_timeout_ms: u64,

    /// Attempts per checkout when the store reports a lock conflict
    #[arg(long, env = "CHECKOUT_ATTEMPTS", default_value_t = 3)]
    pub checkout_attempts: u32,
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Open the connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
    }

    /// Unit of work over `pool` with this config's lock timeout.
    pub fn unit_of_work(&self, pool: PgPool) -> PostgresUnitOfWork {
        PostgresUnitOfWork::new(pool).with_lock_timeout(self.lock_timeout())
    }

    /// Checkout engine with this config's lock timeout and retry budget.
    pub fn checkout_service(
        &self,
        pool: PgPool,
        notifier: Arc<dyn Notifier>,
    ) -> CheckoutService<PostgresUnitOfWork> {
        CheckoutService::new(self.unit_of_work(pool), notifier).with_attempts(self.checkout_attempts)
    }
}
