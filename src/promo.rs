//! Promo codes and their validity check.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, Postgres, Row};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::Executor;

macro_rules! select_promos {
    ($tail:literal) => {
        concat!(
            "SELECT id, code, valid_from, valid_to, discount_percent, active FROM promo_codes ",
            $tail
        )
    };
}

pub type PromoId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoCode {
    pub id: PromoId,
    pub code: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub discount_percent: u8,
    pub active: bool,
}

impl PromoCode {
    /// Active and `valid_from <= now <= valid_to`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.valid_from <= now && now <= self.valid_to
    }
}

impl<'r> FromRow<'r, PgRow> for PromoCode {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let percent: i16 = row.try_get("discount_percent")?;
        let discount_percent = u8::try_from(percent).map_err(|e| sqlx::Error::ColumnDecode {
            index: "discount_percent".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            valid_from: row.try_get("valid_from")?,
            valid_to: row.try_get("valid_to")?,
            discount_percent,
            active: row.try_get("active")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPromo {
    #[error("promo code must not be blank")]
    BlankCode,

    #[error("validity window must start before it ends")]
    EmptyWindow,

    #[error("discount must be between 1 and 100 percent, got {0}")]
    Percent(u8),
}

/// Promo code to create. Construction enforces the same rules as the
/// table constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPromoCode {
    code: String,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    discount_percent: u8,
    active: bool,
}

impl NewPromoCode {
    pub fn new(
        code: impl Into<String>,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        discount_percent: u8,
    ) -> Result<Self, InvalidPromo> {
        let code = code.into().trim().to_string();
        if code.is_empty() {
            return Err(InvalidPromo::BlankCode);
        }
        if valid_from >= valid_to {
            return Err(InvalidPromo::EmptyWindow);
        }
        if !(1..=100).contains(&discount_percent) {
            return Err(InvalidPromo::Percent(discount_percent));
        }

        Ok(Self {
            code,
            valid_from,
            valid_to,
            discount_percent,
            active: true,
        })
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PromoRepository {
    executor: Executor,
}

impl PromoRepository {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    pub async fn insert(&self, promo: &NewPromoCode) -> StoreResult<PromoCode> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let created = sqlx::query_as::<Postgres, PromoCode>(
            "INSERT INTO promo_codes (id, code, valid_from, valid_to, discount_percent, active) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, code, valid_from, valid_to, discount_percent, active",
        )
        .bind(Uuid::new_v4())
        .bind(&promo.code)
        .bind(promo.valid_from)
        .bind(promo.valid_to)
        .bind(i16::from(promo.discount_percent))
        .bind(promo.active)
        .fetch_one(&mut **tx)
        .await?;
        Ok(created)
    }

    pub async fn find_by_id(&self, id: PromoId) -> StoreResult<Option<PromoCode>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let promo = sqlx::query_as::<Postgres, PromoCode>(select_promos!("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(promo)
    }

    /// The promo matching `code` case-insensitively, if it is usable at
    /// `now`. Has no side effects.
    pub async fn get_valid_promo(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PromoCode>> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let promo = sqlx::query_as::<Postgres, PromoCode>(select_promos!(
            "WHERE lower(code) = lower($1) AND active AND valid_from <= $2 AND valid_to >= $2"
        ))
        .bind(code.trim())
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(promo)
    }

    /// Re-reads an applied promo by id and keeps it only if still usable.
    pub async fn get_valid_by_id(
        &self,
        id: PromoId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PromoCode>> {
        Ok(self
            .find_by_id(id)
            .await?
            .filter(|promo| promo.is_valid_at(now)))
    }

    /// Returns whether a promo with this id existed.
    pub async fn set_active(&self, id: PromoId, active: bool) -> StoreResult<bool> {
        let mut guard = self.executor.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let updated = sqlx::query("UPDATE promo_codes SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }
}
