//! Discount codes and their application to a subtotal.

use arcilla_core::{DiscountCodeId, DiscountType, Money};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A server-owned discount code.
///
/// Read-only from the storefront except for usage recording. The `code`
/// is stored in canonical uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountCode {
    pub id: DiscountCodeId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub single_use_per_user: bool,
    pub is_active: bool,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub times_used: u32,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl DiscountCode {
    /// Whether the code has expired relative to `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| until < now)
    }

    /// Whether the code has hit its usage cap.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.times_used >= max)
    }
}

/// A discount applied to one checkout session.
///
/// Derived and ephemeral: discarded when the buyer removes it or abandons
/// the checkout. The computed amount never exceeds the subtotal it was
/// computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub code_id: DiscountCodeId,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub amount: Money,
}

impl AppliedDiscount {
    /// Compute the concrete discount amount for a subtotal.
    ///
    /// Percentage codes take `value`% of the subtotal, rounded to cents;
    /// fixed codes take `value` euros. Either way the result is clamped to
    /// `0 <= amount <= subtotal`.
    #[must_use]
    pub fn compute(code: &DiscountCode, subtotal: Money) -> Self {
        let raw = match code.discount_type {
            DiscountType::Percentage => Money::eur(
                subtotal.amount() * code.discount_value / Decimal::from(100),
            )
            .rounded_to_cents(),
            DiscountType::Fixed => Money::eur(code.discount_value),
        };
        // saturating_sub of zero clamps a negative value at zero
        let amount = raw.min(subtotal).saturating_sub(Money::zero());

        Self {
            code_id: code.id,
            code: code.code.clone(),
            discount_type: code.discount_type,
            discount_value: code.discount_value,
            amount,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn code(discount_type: DiscountType, value: &str) -> DiscountCode {
        DiscountCode {
            id: DiscountCodeId::new(Uuid::new_v4()),
            code: "VERANO10".to_owned(),
            discount_type,
            discount_value: value.parse().unwrap(),
            single_use_per_user: false,
            is_active: true,
            max_uses: None,
            times_used: 0,
            valid_until: None,
        }
    }

    fn eur(s: &str) -> Money {
        Money::eur(s.parse().unwrap())
    }

    #[test]
    fn test_percentage_of_subtotal() {
        let applied = AppliedDiscount::compute(&code(DiscountType::Percentage, "10"), eur("100.00"));
        assert_eq!(applied.amount, eur("10.00"));
    }

    #[test]
    fn test_percentage_rounds_to_cents() {
        let applied = AppliedDiscount::compute(&code(DiscountType::Percentage, "15"), eur("33.33"));
        // 33.33 * 0.15 = 4.9995 -> 5.00
        assert_eq!(applied.amount, eur("5.00"));
    }

    #[test]
    fn test_fixed_capped_at_subtotal() {
        let applied = AppliedDiscount::compute(&code(DiscountType::Fixed, "150.00"), eur("100.00"));
        assert_eq!(applied.amount, eur("100.00"));
    }

    #[test]
    fn test_fixed_below_subtotal() {
        let applied = AppliedDiscount::compute(&code(DiscountType::Fixed, "5.00"), eur("100.00"));
        assert_eq!(applied.amount, eur("5.00"));
    }

    #[test]
    fn test_amount_never_negative() {
        let applied = AppliedDiscount::compute(&code(DiscountType::Fixed, "-5.00"), eur("100.00"));
        assert_eq!(applied.amount, Money::zero());
    }

    #[test]
    fn test_expiry_and_exhaustion() {
        let mut c = code(DiscountType::Fixed, "5.00");
        assert!(!c.is_expired(Utc::now()));
        c.valid_until = Some(Utc::now() - chrono::Duration::days(1));
        assert!(c.is_expired(Utc::now()));

        c.max_uses = Some(3);
        c.times_used = 2;
        assert!(!c.is_exhausted());
        c.times_used = 3;
        assert!(c.is_exhausted());
    }
}
