//! Orders and order items.

use arcilla_core::{DiscountCodeId, Email, Money, OrderId, OrderStatus, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Address, AppliedDiscount, CartItem};

/// Computed order totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
}

impl OrderTotals {
    /// Compute totals from a subtotal and an optional applied discount.
    ///
    /// `total = max(0, subtotal - discount)`.
    #[must_use]
    pub fn compute(subtotal: Money, discount: Option<&AppliedDiscount>) -> Self {
        let discount = discount.map_or_else(Money::zero, |d| d.amount);
        Self {
            subtotal,
            discount,
            total: subtotal.saturating_sub(discount),
        }
    }
}

/// An order to be created, in `pending` status.
///
/// Both addresses are snapshotted structurally at submission time; a
/// billing address marked "same as shipping" is copied, not referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub email: Email,
    pub status: OrderStatus,
    pub totals: OrderTotals,
    pub discount_code_id: Option<DiscountCodeId>,
    pub shipping: Address,
    pub billing: Address,
}

/// A persisted order row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub email: Email,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub totals: OrderTotals,
    pub discount_code_id: Option<DiscountCodeId>,
    pub shipping: Address,
    pub billing: Address,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub email_sent: bool,
}

/// A line item of an order: a snapshot of price at purchase time,
/// decoupled from the live product price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl NewOrderItem {
    /// Snapshot the current cart contents as items of `order_id`.
    #[must_use]
    pub fn from_cart(order_id: OrderId, items: &[CartItem]) -> Vec<Self> {
        items
            .iter()
            .map(|item| Self {
                order_id,
                product_id: item.id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use arcilla_core::DiscountType;
    use uuid::Uuid;

    fn eur(s: &str) -> Money {
        Money::eur(s.parse().unwrap())
    }

    fn applied(amount: &str) -> AppliedDiscount {
        AppliedDiscount {
            code_id: DiscountCodeId::new(Uuid::new_v4()),
            code: "VERANO10".to_owned(),
            discount_type: DiscountType::Fixed,
            discount_value: amount.parse().unwrap(),
            amount: eur(amount),
        }
    }

    #[test]
    fn test_totals_without_discount() {
        let totals = OrderTotals::compute(eur("100.00"), None);
        assert_eq!(totals.subtotal, eur("100.00"));
        assert_eq!(totals.discount, Money::zero());
        assert_eq!(totals.total, eur("100.00"));
    }

    #[test]
    fn test_totals_with_discount() {
        let totals = OrderTotals::compute(eur("100.00"), Some(&applied("10.00")));
        assert_eq!(totals.total, eur("90.00"));
    }

    #[test]
    fn test_total_floors_at_zero() {
        let totals = OrderTotals::compute(eur("100.00"), Some(&applied("100.00")));
        assert_eq!(totals.total, eur("0.00"));
    }

    #[test]
    fn test_order_items_snapshot_cart() {
        let order_id = OrderId::new(Uuid::new_v4());
        let items = vec![CartItem {
            id: ProductId::new(Uuid::new_v4()),
            name: "Collar de arcilla".to_owned(),
            unit_price: eur("24.00"),
            quantity: 2,
            image: None,
            slug: "collar-de-arcilla".to_owned(),
        }];

        let rows = NewOrderItem::from_cart(order_id, &items);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.first().unwrap().order_id, order_id);
        assert_eq!(rows.first().unwrap().quantity, 2);
        assert_eq!(rows.first().unwrap().unit_price, eur("24.00"));
    }
}
