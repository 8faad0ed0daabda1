//! Order transaction engine: turns a cart into a committed order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn, Span};
use validator::{Validate, ValidationErrors};

use crate::cart::{percent_of, AppliedPromo, Cart, CartLine};
use crate::catalog::{CatalogRepository, Product, ProductId, StockChange};
use crate::error::CheckoutError;
use crate::notify::{Notifier, OrderCreatedHook};
use crate::orders::{Customer, NewOrder, Order, OrderRepository, UserId};
use crate::promo::PromoRepository;
use crate::{Executor, UnitOfWork, UnitOfWorkSession};

/// Customer fields submitted with a checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Validate)]
pub struct CheckoutForm {
    #[validate(length(min = 1, max = 50))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50))]
    pub last_name: String,
    #[validate(email, length(max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 250))]
    pub address: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
}

impl CheckoutForm {
    fn trimmed(&self) -> Self {
        Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            address: self.address.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            city: self.city.trim().to_string(),
        }
    }

    /// Trims every field, validates, and yields the customer record.
    pub fn to_customer(&self) -> Result<Customer, ValidationErrors> {
        let form = self.trimmed();
        form.validate()?;

        Ok(Customer {
            first_name: form.first_name,
            last_name: form.last_name,
            email: form.email,
            address: form.address,
            postal_code: form.postal_code,
            city: form.city,
        })
    }
}

/// Owned copy of everything checkout needs from the cart and form.
struct OrderRequest {
    header: NewOrder,
    lines: Vec<CartLine>,
    promo: Option<AppliedPromo>,
}

impl OrderRequest {
    fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::total_price).sum()
    }
}

/// Places orders atomically against the catalog's stock.
pub struct CheckoutService<U> {
    uow: U,
    notifier: Arc<dyn Notifier>,
    attempts: u32,
}

impl<U: UnitOfWork> CheckoutService<U> {
    pub fn new(uow: U, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            uow,
            notifier,
            attempts: 1,
        }
    }

    /// Attempts made by [`create_order_with_retry`](Self::create_order_with_retry).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Converts `cart` into a committed order.
    ///
    /// Stock is checked against product rows locked for the duration of the
    /// transaction, so concurrent checkouts can never oversell. Any failure
    /// rolls back the header, every item and every stock change. The cart is
    /// cleared only after a successful commit. On failure it is left as is,
    /// except that a promo which stopped being valid is removed and a promo
    /// whose percentage changed is refreshed to the current terms.
    #[tracing::instrument(
        skip_all,
        fields(
            lines = cart.len(),
            user_id = ?user,
            order_id = tracing::field::Empty
        )
    )]
    pub async fn create_order(
        &self,
        cart: &mut Cart,
        form: &CheckoutForm,
        user: Option<UserId>,
    ) -> Result<Order, CheckoutError> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let request = OrderRequest {
            header: NewOrder::new(form.to_customer()?, user),
            lines: cart.lines().cloned().collect(),
            promo: cart.promo().cloned(),
        };

        let result = self.submit(request).await;
        match &result {
            Ok(order) => {
                cart.clear();
                Span::current().record("order_id", tracing::field::display(order.id));
                info!(
                    order_id = %order.id,
                    items = order.items.len(),
                    discount = %order.discount_amount,
                    "order placed"
                );
            }
            Err(CheckoutError::PromoUnavailable { .. }) => {
                cart.remove_promo();
            }
            Err(CheckoutError::PromoChanged { promo }) => {
                cart.refresh_promo(promo.clone());
            }
            Err(_) => {}
        }
        result
    }

    /// [`create_order`](Self::create_order), re-run while the store reports
    /// lock conflicts and attempts remain.
    pub async fn create_order_with_retry(
        &self,
        cart: &mut Cart,
        form: &CheckoutForm,
        user: Option<UserId>,
    ) -> Result<Order, CheckoutError> {
        let mut attempt = 1;
        loop {
            match self.create_order(cart, form, user).await {
                Err(error) if error.is_retryable() && attempt < self.attempts => {
                    warn!(attempt, %error, "checkout conflicted, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Runs one order inside its own unit of work. Notification is
    /// registered only for an order that reached commit.
    async fn submit(&self, request: OrderRequest) -> Result<Order, CheckoutError> {
        let session = self.uow.begin().await?;

        match place_order(session.executor().clone(), request).await {
            Ok(order) => {
                session.register_transaction_aware(OrderCreatedHook::new(
                    order.id,
                    Arc::clone(&self.notifier),
                ));
                session.commit().await?;
                Ok(order)
            }
            Err(error) => {
                if let Err(rollback_error) = session.rollback().await {
                    warn!(%rollback_error, "rollback after failed checkout failed");
                }
                Err(error)
            }
        }
    }
}

async fn place_order(executor: Executor, request: OrderRequest) -> Result<Order, CheckoutError> {
    let catalog = CatalogRepository::new(executor.clone());
    let promos = PromoRepository::new(executor.clone());
    let orders = OrderRepository::new(executor);

    let subtotal = request.subtotal();
    let OrderRequest {
        mut header,
        lines,
        promo,
    } = request;

    if let Some(applied) = promo {
        let Some(current) = promos.get_valid_by_id(applied.id, Utc::now()).await? else {
            warn!(code = %applied.code, "applied promo expired before checkout");
            return Err(CheckoutError::PromoUnavailable { code: applied.code });
        };
        if current.discount_percent != applied.discount_percent {
            warn!(
                code = %applied.code,
                applied = applied.discount_percent,
                current = current.discount_percent,
                "promo percentage changed since it was applied"
            );
            return Err(CheckoutError::PromoChanged {
                promo: AppliedPromo::from(&current),
            });
        }
        header.promo_code_id = Some(current.id);
        header.discount_amount = percent_of(subtotal, applied.discount_percent);
    }

    let mut order = orders.insert_header(&header).await?;

    let ids: Vec<ProductId> = lines.iter().map(|line| line.product_id).collect();
    let locked: HashMap<ProductId, Product> = catalog
        .lock_by_ids(&ids)
        .await?
        .into_iter()
        .map(|product| (product.id, product))
        .collect();

    let mut changes = Vec::with_capacity(lines.len());
    for line in lines {
        let (available, name) = match locked.get(&line.product_id) {
            Some(product) => (product.stock, product.name.clone()),
            None => (0, line.name),
        };

        if available < line.quantity {
            warn!(
                product_id = %line.product_id,
                requested = line.quantity,
                available,
                "insufficient stock"
            );
            return Err(CheckoutError::InsufficientStock {
                product_id: line.product_id,
                product: name,
                requested: line.quantity,
                available,
            });
        }

        let item = orders
            .insert_item(order.id, line.product_id, line.unit_price, line.quantity)
            .await?;
        order.items.push(item);
        changes.push(StockChange {
            product_id: line.product_id,
            quantity: line.quantity,
        });
    }

    catalog.apply_stock_changes(&changes).await?;
    Ok(order)
}
