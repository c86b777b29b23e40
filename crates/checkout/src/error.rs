//! Unified error type for the checkout flow.
//!
//! The taxonomy mirrors how errors are surfaced: validation errors carry
//! per-field messages and never touch the network; discount errors are
//! inline and non-blocking; order/payment errors block progress and keep
//! the buyer on the shipping step. Post-payment fulfillment errors do not
//! appear here at all, they are logged and absorbed.

use thiserror::Error;

use crate::checkout::form::FieldErrors;
use crate::discount::DiscountError;
use crate::services::{AuthError, DataStoreError, PaymentError};
use arcilla_core::MoneyError;

/// Errors surfaced to the buyer before payment confirmation.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The form failed validation; per-field messages attached.
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    /// The action requires a signed-in buyer.
    #[error("not signed in")]
    NotAuthenticated,

    /// Checkout needs at least one cart item.
    #[error("the cart is empty")]
    EmptyCart,

    /// The action is not valid at the current step.
    #[error("{action} is not available at this step")]
    WrongStep { action: &'static str },

    /// Discount code rejection or validation outage.
    #[error(transparent)]
    Discount(#[from] DiscountError),

    /// Sign-in or registration failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Order or order-item creation failed; the buyer may retry, which
    /// creates a new order.
    #[error("could not create the order: {0}")]
    OrderCreation(DataStoreError),

    /// The payment gateway refused to open a payment intent.
    #[error("could not initialize the payment: {0}")]
    PaymentIntent(#[from] PaymentError),

    /// The order total cannot be expressed in gateway minor units.
    #[error(transparent)]
    Amount(#[from] MoneyError),
}

/// Result type alias for [`CheckoutError`].
pub type Result<T> = std::result::Result<T, CheckoutError>;
