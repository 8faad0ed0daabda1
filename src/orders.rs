//! Orders and their line items.
//!
//! An order is written once, together with its items, inside the checkout
//! transaction. Afterwards only the `paid` flag changes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, FromRow, Postgres, Row};
use uuid::Uuid;

use crate::catalog::ProductId;
use crate::error::{StoreError, StoreResult};
use crate::promo::PromoId;
use crate::Executor;

const ORDER_COLUMNS: &str = "id, user_id, first_name, last_name, email, address, postal_code, city, \
     promo_code_id, discount_amount, paid, created_at, updated_at";

pub type OrderId = Uuid;
pub type UserId = Uuid;

/// Contact and delivery details captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: String,
    pub postal_code: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: OrderId,
    pub product_id: ProductId,
    /// Unit price the customer saw when adding the product to the cart.
    pub price: Decimal,
    pub quantity: u32,
}

impl OrderItem {
    pub fn cost(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

impl<'r> FromRow<'r, PgRow> for OrderItem {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let quantity: i32 = row.try_get("quantity")?;

        Ok(Self {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            product_id: row.try_get("product_id")?,
            price: row.try_get("price")?,
            quantity: u32::try_from(quantity).map_err(|e| sqlx::Error::ColumnDecode {
                index: "quantity".to_string(),
                source: Box::new(e),
            })?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: Option<UserId>,
    pub customer: Customer,
    pub promo_code_id: Option<PromoId>,
    /// Fixed when the order is placed; never recomputed from the promo.
    pub discount_amount: Decimal,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Cost of all items before the promo discount.
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(OrderItem::cost).sum()
    }

    pub fn total(&self) -> Decimal {
        self.subtotal() - self.discount_amount
    }
}

impl<'r> FromRow<'r, PgRow> for Order {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            customer: Customer {
                first_name: row.try_get("first_name")?,
                last_name: row.try_get("last_name")?,
                email: row.try_get("email")?,
                address: row.try_get("address")?,
                postal_code: row.try_get("postal_code")?,
                city: row.try_get("city")?,
            },
            promo_code_id: row.try_get("promo_code_id")?,
            discount_amount: row.try_get("discount_amount")?,
            paid: row.try_get("paid")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            items: Vec::new(),
        })
    }
}

/// Order header to persist before its items.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: Option<UserId>,
    pub customer: Customer,
    pub promo_code_id: Option<PromoId>,
    pub discount_amount: Decimal,
}

impl NewOrder {
    pub fn new(customer: Customer, user_id: Option<UserId>) -> Self {
        Self {
            user_id,
            customer,
            promo_code_id: None,
            discount_amount: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRepository {
    executor: Executor,
}

impl OrderRepository {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Inserts the header and returns it with its new identity and no items.
    pub async fn insert_header(&self, order: &NewOrder) -> StoreResult<Order> {
        let sql = format!(
            "INSERT INTO orders (id, user_id, first_name, last_name, email, address, postal_code, city, \
             promo_code_id, discount_amount) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {ORDER_COLUMNS}"
        );
        let customer = &order.customer;

        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let created = sqlx::query_as::<Postgres, Order>(&sql)
            .bind(Uuid::new_v4())
            .bind(order.user_id)
            .bind(&customer.first_name)
            .bind(&customer.last_name)
            .bind(&customer.email)
            .bind(&customer.address)
            .bind(&customer.postal_code)
            .bind(&customer.city)
            .bind(order.promo_code_id)
            .bind(order.discount_amount)
            .fetch_one(&mut **tx)
            .await?;
        Ok(created)
    }

    pub async fn insert_item(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        price: Decimal,
        quantity: u32,
    ) -> StoreResult<OrderItem> {
        let quantity = i32::try_from(quantity).map_err(StoreError::invalid_value("quantity"))?;

        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let item = sqlx::query_as::<Postgres, OrderItem>(
            "INSERT INTO order_items (id, order_id, product_id, price, quantity) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, order_id, product_id, price, quantity",
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(product_id)
        .bind(price)
        .bind(quantity)
        .fetch_one(&mut **tx)
        .await?;
        Ok(item)
    }

    pub async fn find_by_id(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");

        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let order = sqlx::query_as::<Postgres, Order>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        // items_for takes the lock again
        drop(guard);

        let Some(mut order) = order else {
            return Ok(None);
        };
        order.items = self.items_for(&[order.id]).await?;
        Ok(Some(order))
    }

    /// A user's order history, newest first, with items.
    pub async fn list_for_user(&self, user_id: UserId) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id"
        );

        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let mut orders = sqlx::query_as::<Postgres, Order>(&sql)
            .bind(user_id)
            .fetch_all(&mut **tx)
            .await?;
        drop(guard);

        let ids: Vec<OrderId> = orders.iter().map(|order| order.id).collect();
        let mut items = self.items_for(&ids).await?;
        for order in &mut orders {
            let (own, rest): (Vec<OrderItem>, Vec<OrderItem>) =
                items.into_iter().partition(|item| item.order_id == order.id);
            order.items = own;
            items = rest;
        }
        Ok(orders)
    }

    /// Flags an order as paid. Returns whether the order exists.
    pub async fn mark_paid(&self, id: OrderId) -> StoreResult<bool> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let updated = sqlx::query("UPDATE orders SET paid = TRUE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn count(&self) -> StoreResult<i64> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let row = sqlx::query("SELECT COUNT(*) AS count FROM orders")
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.try_get("count")?)
    }

    async fn items_for(&self, order_ids: &[OrderId]) -> StoreResult<Vec<OrderItem>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let items = sqlx::query_as::<Postgres, OrderItem>(
            "SELECT id, order_id, product_id, price, quantity FROM order_items \
             WHERE order_id = ANY($1) ORDER BY product_id",
        )
        .bind(order_ids)
        .fetch_all(&mut **tx)
        .await?;
        Ok(items)
    }
}
