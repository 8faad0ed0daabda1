//! Catalog store: product records, price derivation and the locking read
//! used by checkout.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{postgres::PgRow, FromRow, Postgres, Row};
use uuid::Uuid;

use crate::error::{CartError, StoreError, StoreResult};
use crate::Executor;

const LOCK_PRODUCTS_SQL: &str = include_str!("sql/lock_products.sql");
const APPLY_STOCK_CHANGES_SQL: &str = include_str!("sql/apply_stock_changes.sql");

macro_rules! select_products {
    ($($tail:literal),*) => {
        concat!(
            "SELECT id, name, slug, base_price, discount_percent, final_price, stock, ",
            "purchase_count, available, created_at, updated_at FROM products ",
            $($tail),*
        )
    };
}

pub type ProductId = Uuid;

/// Price after applying a percentage discount, rounded to cents.
pub fn final_price(base_price: Decimal, discount_percent: u8) -> Decimal {
    let factor = Decimal::ONE - Decimal::from(discount_percent) / Decimal::ONE_HUNDRED;
    (base_price * factor).round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub base_price: Decimal,
    pub discount_percent: u8,
    pub final_price: Decimal,
    pub stock: u32,
    pub purchase_count: u32,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Base price to show struck through, if the product is discounted.
    pub fn old_price(&self) -> Option<Decimal> {
        (self.discount_percent > 0).then_some(self.base_price)
    }

    /// Advisory check for the add-to-cart surface.
    ///
    /// Uses whatever stock value this record was read with; checkout repeats
    /// the check against the locked row.
    pub fn ensure_stock_for(&self, requested: i64) -> Result<(), CartError> {
        if requested < 0 {
            return Err(CartError::InvalidQuantity);
        }
        if requested > i64::from(self.stock) {
            return Err(CartError::InsufficientStock {
                available: self.stock,
            });
        }
        Ok(())
    }
}

fn decode_u32(row: &PgRow, column: &str) -> sqlx::Result<u32> {
    let value: i32 = row.try_get(column)?;
    u32::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, PgRow> for Product {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let discount: i16 = row.try_get("discount_percent")?;
        let discount_percent = u8::try_from(discount).map_err(|e| sqlx::Error::ColumnDecode {
            index: "discount_percent".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            base_price: row.try_get("base_price")?,
            discount_percent,
            final_price: row.try_get("final_price")?,
            stock: decode_u32(row, "stock")?,
            purchase_count: decode_u32(row, "purchase_count")?,
            available: row.try_get("available")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Catalog entry to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    pub base_price: Decimal,
    pub discount_percent: u8,
    pub stock: u32,
    pub available: bool,
}

/// Quantity leaving stock for one product in a committed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Product queries and stock mutations within a unit of work.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    executor: Executor,
}

impl CatalogRepository {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    pub async fn insert(&self, product: &NewProduct) -> StoreResult<Product> {
        let stock = i32::try_from(product.stock).map_err(StoreError::invalid_value("stock"))?;

        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let created = sqlx::query_as::<Postgres, Product>(
            "INSERT INTO products (id, name, slug, base_price, discount_percent, final_price, stock, available) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, name, slug, base_price, discount_percent, final_price, stock, \
                       purchase_count, available, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(&product.name)
        .bind(&product.slug)
        .bind(product.base_price)
        .bind(i16::from(product.discount_percent))
        .bind(final_price(product.base_price, product.discount_percent))
        .bind(stock)
        .bind(product.available)
        .fetch_one(&mut **tx)
        .await?;

        Ok(created)
    }

    pub async fn find_by_id(&self, id: ProductId) -> StoreResult<Option<Product>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let product = sqlx::query_as::<Postgres, Product>(select_products!("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(product)
    }

    /// Plain read of several products, e.g. to render a cart.
    pub async fn find_by_ids(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let products =
            sqlx::query_as::<Postgres, Product>(select_products!("WHERE id = ANY($1) ORDER BY id"))
                .bind(ids)
                .fetch_all(&mut **tx)
                .await?;
        Ok(products)
    }

    /// Locking read: takes exclusive row locks on every listed product in
    /// one statement, held until the unit of work ends.
    ///
    /// Rows are locked in ascending id order so that concurrent checkouts
    /// over overlapping carts queue behind each other instead of
    /// deadlocking. Ids with no matching row are simply absent from the
    /// result.
    pub async fn lock_by_ids(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let products = sqlx::query_as::<Postgres, Product>(LOCK_PRODUCTS_SQL)
            .bind(&ids)
            .fetch_all(&mut **tx)
            .await?;

        tracing::debug!(requested = ids.len(), locked = products.len(), "locked product rows");
        Ok(products)
    }

    /// Decrement stock and bump purchase counts for every change in one
    /// statement. Returns the number of product rows updated.
    pub async fn apply_stock_changes(&self, changes: &[StockChange]) -> StoreResult<u64> {
        let ids: Vec<Uuid> = changes.iter().map(|change| change.product_id).collect();
        let quantities = changes
            .iter()
            .map(|change| i32::try_from(change.quantity))
            .collect::<Result<Vec<i32>, _>>()
            .map_err(StoreError::invalid_value("quantity"))?;

        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let updated = sqlx::query(APPLY_STOCK_CHANGES_SQL)
            .bind(&ids)
            .bind(&quantities)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        Ok(updated)
    }

    /// Change base price and discount; the final price is always derived
    /// from the two here, never written on its own.
    pub async fn set_pricing(
        &self,
        id: ProductId,
        base_price: Decimal,
        discount_percent: u8,
    ) -> StoreResult<Option<Product>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let product = sqlx::query_as::<Postgres, Product>(
            "UPDATE products SET base_price = $2, discount_percent = $3, final_price = $4, updated_at = now() \
             WHERE id = $1 \
             RETURNING id, name, slug, base_price, discount_percent, final_price, stock, \
                       purchase_count, available, created_at, updated_at",
        )
        .bind(id)
        .bind(base_price)
        .bind(i16::from(discount_percent))
        .bind(final_price(base_price, discount_percent))
        .fetch_optional(&mut **tx)
        .await?;
        Ok(product)
    }

    /// Products that can be bought right now, newest first.
    pub async fn available(&self) -> StoreResult<Vec<Product>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let products = sqlx::query_as::<Postgres, Product>(select_products!(
            "WHERE available AND stock > 0 ",
            "ORDER BY created_at DESC"
        ))
        .fetch_all(&mut **tx)
        .await?;
        Ok(products)
    }

    pub async fn on_sale(&self) -> StoreResult<Vec<Product>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let products = sqlx::query_as::<Postgres, Product>(select_products!(
            "WHERE available AND stock > 0 AND discount_percent > 0 ",
            "ORDER BY created_at DESC"
        ))
        .fetch_all(&mut **tx)
        .await?;
        Ok(products)
    }

    pub async fn new_arrivals(&self, since: DateTime<Utc>) -> StoreResult<Vec<Product>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let products = sqlx::query_as::<Postgres, Product>(select_products!(
            "WHERE available AND stock > 0 AND created_at >= $1 ",
            "ORDER BY created_at DESC"
        ))
        .bind(since)
        .fetch_all(&mut **tx)
        .await?;
        Ok(products)
    }
}
