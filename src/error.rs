//! Error types shared by the storage layer and the checkout engine.

use std::num::TryFromIntError;

use sqlx::error::DatabaseError;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::cart::AppliedPromo;

/// SQLSTATE codes Postgres raises when a transaction lost a lock race
/// rather than hit bad data.
const RETRYABLE_SQLSTATES: [&str; 4] = [
    // lock_not_available: lock_timeout expired while waiting on a row lock
    "55P03",
    // deadlock_detected
    "40P01",
    // serialization_failure
    "40001",
    // query_canceled: statement_timeout
    "57014",
];

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transaction already committed or rolled back")]
    TransactionClosed,

    #[error("value out of range for column `{column}`")]
    InvalidValue {
        column: &'static str,
        #[source]
        source: TryFromIntError,
    },
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub(crate) fn invalid_value(column: &'static str) -> impl FnOnce(TryFromIntError) -> Self {
        move |source| Self::InvalidValue { column, source }
    }

    /// Whether retrying the whole transaction may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(error) => is_transient(error),
            Self::TransactionClosed | Self::InvalidValue { .. } => false,
        }
    }
}

fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&&*code)),
        _ => false,
    }
}

fn sqlstate(error: &sqlx::Error) -> Option<String> {
    error
        .as_database_error()
        .and_then(DatabaseError::code)
        .map(|code| code.into_owned())
}

/// Everything that can stop a cart from becoming an order.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("the cart is empty")]
    EmptyCart,

    #[error("invalid checkout details: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("not enough '{product}' in stock: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        product: String,
        requested: u32,
        available: u32,
    },

    #[error("promo code '{code}' is no longer valid")]
    PromoUnavailable { code: String },

    /// The promo is still valid but its percentage changed after the
    /// customer applied it. Carries the current terms.
    #[error("promo code '{}' now gives {}% off", .promo.code, .promo.discount_percent)]
    PromoChanged { promo: AppliedPromo },

    #[error("checkout hit a transient storage conflict: {0}")]
    Retryable(#[source] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for CheckoutError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Database(source) if is_transient(&source) => {
                tracing::debug!(sqlstate = ?sqlstate(&source), "transient storage failure");
                Self::Retryable(source)
            }
            other => Self::Storage(other),
        }
    }
}

impl From<sqlx::Error> for CheckoutError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::from(error).into()
    }
}

impl CheckoutError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Message shown to the customer on the cart view.
    ///
    /// Transient and storage failures never leak details; they read as a
    /// generic "try again".
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyCart => "Your cart is empty.".to_string(),
            Self::Validation(errors) => {
                let mut fields: Vec<String> =
                    errors.field_errors().keys().map(|field| field.to_string()).collect();
                fields.sort();
                format!("Please check the following fields: {}.", fields.join(", "))
            }
            Self::InsufficientStock {
                product, available, ..
            } => format!("Not enough '{product}' in stock. Available: {available}."),
            Self::PromoUnavailable { code } => {
                format!("Promo code '{code}' has expired and was removed from your cart.")
            }
            Self::PromoChanged { promo } => format!(
                "Promo code '{}' now gives {}% off. Please review your new total.",
                promo.code, promo.discount_percent
            ),
            Self::Retryable(_) | Self::Storage(_) => {
                "We could not place your order right now. Please try again.".to_string()
            }
        }
    }
}

/// Rejections from the advisory add-to-cart stock check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("quantity cannot be negative")]
    InvalidQuantity,

    #[error("only {available} in stock")]
    InsufficientStock { available: u32 },
}
