//! Session-scoped shopping cart.
//!
//! A [`Cart`] is a plain value owned by one customer session. The web layer
//! stores it between requests as an opaque blob ([`Cart::to_blob`]) and
//! hands it to checkout by `&mut` reference. Unit prices are snapshotted
//! when a product is added, so later catalog price edits never change what
//! the customer was shown.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::catalog::{Product, ProductId};
use crate::promo::{PromoCode, PromoId};

/// `subtotal * percent / 100`, rounded to cents with banker's rounding.
pub fn percent_of(subtotal: Decimal, percent: u8) -> Decimal {
    (subtotal * Decimal::from(percent) / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    /// Product name when the line was added; used in messages if the
    /// product later disappears from the catalog.
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl CartLine {
    pub fn total_price(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Promo code attached to a cart after passing validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPromo {
    pub id: PromoId,
    pub code: String,
    pub discount_percent: u8,
}

impl From<&PromoCode> for AppliedPromo {
    fn from(promo: &PromoCode) -> Self {
        Self {
            id: promo.id,
            code: promo.code.clone(),
            discount_percent: promo.discount_percent,
        }
    }
}

/// A cart line joined with the product's current catalog record.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayLine<'a> {
    pub product: &'a Product,
    pub quantity: u32,
    /// Stored snapshot, not `product.final_price`.
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    lines: BTreeMap<ProductId, CartLine>,
    promo: Option<AppliedPromo>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `quantity` of `product`, merging into an existing line.
    ///
    /// A new line snapshots the product's current final price; an existing
    /// line keeps the price it was first added at.
    pub fn add(&mut self, product: &Product, quantity: u32) {
        if quantity == 0 {
            return;
        }

        let line = self.lines.entry(product.id).or_insert_with(|| CartLine {
            product_id: product.id,
            name: product.name.clone(),
            quantity: 0,
            unit_price: product.final_price,
        });
        line.quantity = line.quantity.saturating_add(quantity);
    }

    /// Sets a line's quantity. Zero or less removes the line; products not
    /// in the cart are ignored.
    pub fn update(&mut self, product_id: ProductId, quantity: i64) {
        if quantity <= 0 {
            self.remove(product_id);
            return;
        }

        if let Some(line) = self.lines.get_mut(&product_id) {
            line.quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        }
    }

    pub fn remove(&mut self, product_id: ProductId) -> Option<CartLine> {
        self.lines.remove(&product_id)
    }

    /// Empties the cart and drops any applied promo.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.promo = None;
    }

    /// Number of distinct products.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.get(&product_id)
    }

    /// Lines in ascending product id order.
    pub fn lines(&self) -> impl Iterator<Item = &CartLine> {
        self.lines.values()
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        self.lines.keys().copied().collect()
    }

    pub fn total_quantity(&self) -> u64 {
        self.lines.values().map(|line| u64::from(line.quantity)).sum()
    }

    /// Sum of snapshot price times quantity.
    pub fn subtotal(&self) -> Decimal {
        self.lines.values().map(CartLine::total_price).sum()
    }

    pub fn promo(&self) -> Option<&AppliedPromo> {
        self.promo.as_ref()
    }

    pub fn apply_promo(&mut self, promo: &PromoCode) {
        self.promo = Some(AppliedPromo::from(promo));
    }

    /// Replaces the applied promo with the terms checkout found in the store.
    pub(crate) fn refresh_promo(&mut self, promo: AppliedPromo) {
        self.promo = Some(promo);
    }

    pub fn remove_promo(&mut self) -> Option<AppliedPromo> {
        self.promo.take()
    }

    /// Applies the outcome of a promo lookup.
    ///
    /// `None` (unknown, inactive or expired code) clears whatever promo was
    /// applied before. Returns whether a promo is now applied.
    pub fn apply_lookup(&mut self, lookup: Option<&PromoCode>) -> bool {
        match lookup {
            Some(promo) => {
                self.apply_promo(promo);
                true
            }
            None => {
                self.promo = None;
                false
            }
        }
    }

    pub fn discount(&self) -> Decimal {
        self.promo
            .as_ref()
            .map_or(Decimal::ZERO, |promo| percent_of(self.subtotal(), promo.discount_percent))
    }

    pub fn total_after_discount(&self) -> Decimal {
        self.subtotal() - self.discount()
    }

    /// Joins lines with current product records for rendering.
    ///
    /// Lines whose product is not in `products` are skipped.
    pub fn display_lines<'a>(&self, products: &'a [Product]) -> Vec<DisplayLine<'a>> {
        self.lines
            .values()
            .filter_map(|line| {
                let product = products.iter().find(|product| product.id == line.product_id)?;
                Some(DisplayLine {
                    product,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    total_price: line.total_price(),
                })
            })
            .collect()
    }

    pub fn to_blob(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restores a cart stored by [`to_blob`](Self::to_blob).
    ///
    /// Lines with a zero quantity can only come from a stale or edited blob
    /// and are dropped.
    pub fn from_blob(blob: &str) -> serde_json::Result<Self> {
        let mut cart: Self = serde_json::from_str(blob)?;
        cart.lines.retain(|_, line| line.quantity > 0);
        Ok(cart)
    }
}
