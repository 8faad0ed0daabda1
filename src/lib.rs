//! Storefront order core
//!
//! Turns a session-scoped shopping cart into a durable order on
//! PostgreSQL. Stock is decremented under row-level locks taken inside the
//! order's transaction, so concurrent checkouts never oversell. Catalog,
//! promo code and order storage hang off a shared unit-of-work
//! [`Executor`]; notification and cart clearing happen only after commit.

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod executor;
pub mod notify;
pub mod orders;
pub mod promo;
pub mod schema;
pub mod transaction_aware;
pub mod unit_of_work;

pub use cart::{AppliedPromo, Cart, CartLine, DisplayLine};
pub use catalog::{CatalogRepository, NewProduct, Product, ProductId, StockChange};
pub use checkout::{CheckoutForm, CheckoutService};
pub use config::StoreConfig;
pub use error::{CartError, CheckoutError, StoreError, StoreResult};
pub use executor::Executor;
pub use notify::{Notifier, NotifyError, OrderCreated, OrderCreatedHook, QueueNotifier};
pub use orders::{Customer, NewOrder, Order, OrderId, OrderItem, OrderRepository, UserId};
pub use promo::{InvalidPromo, NewPromoCode, PromoCode, PromoId, PromoRepository};
pub use transaction_aware::{HookError, HookResult, TransactionAware};
pub use unit_of_work::{
    PostgresUnitOfWork, PostgresUnitOfWorkSession, UnitOfWork, UnitOfWorkSession,
};
