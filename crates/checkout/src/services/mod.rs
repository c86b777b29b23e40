//! External collaborator interfaces.
//!
//! The checkout core talks to the outside world through these traits: the
//! hosted data store, the payment gateway, the email dispatcher, and the
//! auth provider. [`platform::PlatformClient`] implements all four against
//! the hosted backend; tests substitute mocks or fakes.

pub mod platform;

use arcilla_core::{CurrencyCode, DiscountCodeId, Email, OrderId, ProductId, UserId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Buyer, DiscountCode, NewOrder, NewOrderItem, Order};

/// Errors from the data store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DataStoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// A server-side procedure is not deployed.
    ///
    /// Distinguished from [`DataStoreError::Api`] so the discount
    /// evaluator can fall back to its client-side re-check.
    #[error("server-side procedure not available: {0}")]
    ProcedureMissing(String),

    /// Failed to parse a response body.
    #[error("parse error: {0}")]
    Parse(String),

    /// An insert that should return the created row returned nothing.
    #[error("no row returned for {0}")]
    MissingRow(&'static str),
}

/// Errors from the payment gateway collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway rejected the request.
    #[error("payment gateway error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a response body.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Errors from the email dispatcher collaborator.
#[derive(Debug, thiserror::Error)]
pub enum EmailSendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The dispatcher returned an error response.
    #[error("email dispatcher error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The dispatcher reported a delivery failure.
    #[error("email send failed: {0}")]
    Failed(String),
}

/// Errors from the auth collaborator.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Wrong email or password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// An account with this email already exists.
    #[error("user already exists")]
    UserAlreadyExists,

    /// The auth service returned an error response.
    #[error("auth error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a response body.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result of the server-side `validate_discount_code` procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountValidation {
    pub valid: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of the server-side `register_discount_code_usage` procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRegistration {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Metadata attached to a payment intent for later reconciliation by the
/// gateway webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub order_id: OrderId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_code_id: Option<DiscountCodeId>,
    pub discount_amount: Decimal,
}

/// A request to open a payment intent with the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentIntentRequest {
    /// Amount in integer minor units (cents).
    pub amount: i64,
    pub currency: CurrencyCode,
    pub description: String,
    pub metadata: PaymentMetadata,
}

/// A gateway-side object representing an in-progress charge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub payment_intent_id: String,
    /// Secret handed to the hosted payment element.
    pub client_secret: String,
}

/// Row-level access to the hosted data store plus its two server-side
/// discount procedures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Create an order row and return it with its server-assigned id.
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, DataStoreError>;

    /// Create the order's line items.
    async fn insert_order_items(&self, items: &[NewOrderItem]) -> Result<(), DataStoreError>;

    /// Current stock of a product, or `None` if the product is gone.
    async fn product_stock(&self, product_id: ProductId) -> Result<Option<i64>, DataStoreError>;

    /// Overwrite a product's stock level.
    async fn set_product_stock(
        &self,
        product_id: ProductId,
        stock: i64,
    ) -> Result<(), DataStoreError>;

    /// Look up an active discount code by canonical (uppercase) code.
    async fn fetch_discount_code(
        &self,
        code: &str,
    ) -> Result<Option<DiscountCode>, DataStoreError>;

    /// Server-side discount validation (authoritative tier).
    async fn validate_discount_code(
        &self,
        code: &str,
        order_total: Decimal,
    ) -> Result<DiscountValidation, DataStoreError>;

    /// Record a discount code's usage against an order.
    async fn register_discount_usage(
        &self,
        code_id: DiscountCodeId,
        order_id: OrderId,
        amount: Decimal,
    ) -> Result<UsageRegistration, DataStoreError>;

    /// The buyer's stored profile name, for form prefill.
    async fn fetch_profile_full_name(
        &self,
        user_id: UserId,
    ) -> Result<Option<String>, DataStoreError>;
}

/// The payment gateway, consumed abstractly: this core only opens intents;
/// confirmation happens in the gateway-hosted payment element and,
/// authoritatively, in its webhook.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a payment intent and return its client secret.
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentError>;
}

/// The order-confirmation email dispatcher.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send the order confirmation for `order_id` to `recipient`.
    async fn send_order_confirmation(
        &self,
        order_id: OrderId,
        recipient: &Email,
    ) -> Result<(), EmailSendError>;
}

/// The external auth collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Sign an existing buyer in.
    async fn sign_in(&self, email: &Email, password: &str) -> Result<Buyer, AuthError>;

    /// Register a new buyer account.
    async fn sign_up(&self, email: &Email, password: &str) -> Result<Buyer, AuthError>;
}
