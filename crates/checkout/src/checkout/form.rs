//! Shipping/billing form data and its synchronous validation.
//!
//! Validation runs in full on every submission attempt and issues no
//! network calls; the orchestrator only proceeds to order creation once a
//! form validates cleanly.

use std::collections::BTreeMap;

use arcilla_core::Email;
use serde::{Deserialize, Serialize};

use crate::geo;
use crate::models::Address;

/// Per-field validation errors, keyed by field path
/// (e.g. `shipping.postal_code`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    /// The message for a field, if it failed validation.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(field, message)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

/// Raw address fields as entered by the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressForm {
    pub first_name: String,
    pub last_name: String,
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
}

impl Default for AddressForm {
    fn default() -> Self {
        Self {
            first_name: String::new(),
            last_name: String::new(),
            line1: String::new(),
            line2: String::new(),
            city: String::new(),
            province: String::new(),
            postal_code: String::new(),
            // The country selector is fixed to the only shipping destination
            country: geo::SHIPPING_COUNTRY.to_owned(),
            phone: String::new(),
        }
    }
}

impl AddressForm {
    fn to_address(&self) -> Address {
        Address {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            line1: self.line1.clone(),
            line2: (!self.line2.is_empty()).then(|| self.line2.clone()),
            city: self.city.clone(),
            province: self.province.clone(),
            postal_code: self.postal_code.clone(),
            country: self.country.clone(),
            phone: self.phone.clone(),
        }
    }
}

/// The complete checkout form: shipping address, billing address (or "same
/// as shipping"), and contact email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutForm {
    pub shipping: AddressForm,
    pub same_as_shipping: bool,
    pub billing: AddressForm,
    pub email: String,
}

/// A form that passed full validation, with the billing address resolved
/// to a structural copy when "same as shipping" was set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCheckout {
    pub shipping: Address,
    pub billing: Address,
    pub email: Email,
}

impl CheckoutForm {
    /// Run the full validation: required fields, country/province/postal
    /// allow-lists, email structure. Billing is validated only when it is
    /// not a copy of shipping.
    ///
    /// # Errors
    ///
    /// Returns every failing field with its message.
    pub fn validate(&self) -> Result<ValidatedCheckout, FieldErrors> {
        let mut errors = FieldErrors::default();

        let email = match Email::parse(self.email.trim()) {
            Ok(email) => Some(email),
            Err(_) => {
                errors.insert("email", "A valid email is required");
                None
            }
        };

        validate_address(&self.shipping, "shipping", &mut errors);
        if !self.same_as_shipping {
            validate_address(&self.billing, "billing", &mut errors);
        }

        let (Some(email), true) = (email, errors.is_empty()) else {
            return Err(errors);
        };

        let shipping = self.shipping.to_address();
        // Structural copy at submission time, not a live reference
        let billing = if self.same_as_shipping {
            shipping.clone()
        } else {
            self.billing.to_address()
        };

        Ok(ValidatedCheckout {
            shipping,
            billing,
            email,
        })
    }
}

fn validate_address(form: &AddressForm, prefix: &str, errors: &mut FieldErrors) {
    let required = [
        ("first_name", &form.first_name, "First name is required"),
        ("last_name", &form.last_name, "Last name is required"),
        ("line1", &form.line1, "Address is required"),
        ("city", &form.city, "City is required"),
        ("province", &form.province, "Province is required"),
        ("postal_code", &form.postal_code, "Postal code is required"),
        ("phone", &form.phone, "Phone is required"),
    ];
    for (field, value, message) in required {
        if value.trim().is_empty() {
            errors.insert(format!("{prefix}.{field}"), message);
        }
    }

    if form.country != geo::SHIPPING_COUNTRY {
        errors.insert(
            format!("{prefix}.country"),
            "We only ship to mainland Spain and the Balearic Islands",
        );
    }

    if !form.province.trim().is_empty() && !geo::is_allowed_province(&form.province) {
        errors.insert(
            format!("{prefix}.province"),
            "Province not eligible for shipping",
        );
    }

    if !form.postal_code.trim().is_empty() && !geo::is_allowed_postal_code(&form.postal_code) {
        errors.insert(
            format!("{prefix}.postal_code"),
            "We do not ship to this postal code",
        );
    }
}
