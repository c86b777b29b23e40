//! Shipping and billing addresses.

use serde::{Deserialize, Serialize};

/// A postal address within the shipping allow-list.
///
/// Construction goes through checkout-form validation, so an `Address`
/// held by an order has already passed the country/province/postal-code
/// checks in [`crate::geo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
}

impl Address {
    /// Full name for display and gateway billing details.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
