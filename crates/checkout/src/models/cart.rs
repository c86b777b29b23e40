//! Cart line items.

use arcilla_core::{Money, ProductId};
use serde::{Deserialize, Serialize};

/// A line item in the cart.
///
/// Unique by `id` within a cart; adding the same product again merges
/// quantities. The unit price is the price at the time the item was added;
/// the snapshot that matters for billing is taken again at order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub slug: String,
}

impl CartItem {
    /// Line total (unit price times quantity).
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}
