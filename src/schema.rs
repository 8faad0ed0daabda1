//! Relational schema for the catalog, promo codes and orders.

use sqlx::PgPool;

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

/// Create every table and index the store needs. Safe to run repeatedly.
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
pub async fn install(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    tracing::debug!("schema installed");
    Ok(())
}
