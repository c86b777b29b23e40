//! End-to-end checkout flow tests.
//!
//! The tests drive a real [`arcilla_checkout::CheckoutFlow`] against an
//! in-memory fake of the hosted platform that records every call, so a
//! whole checkout can be asserted on: the orders created, the line items
//! written, the payment intents opened, the discount usages registered,
//! and the confirmation emails sent.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p arcilla-integration-tests
//! ```

// Test support: unwraps on the fake's internal locks are fine here.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use arcilla_checkout::models::{Buyer, DiscountCode, NewOrder, NewOrderItem, Order};
use arcilla_checkout::services::{
    AuthError, AuthProvider, DataStore, DataStoreError, DiscountValidation, EmailSendError,
    EmailSender, PaymentError, PaymentGateway, PaymentIntent, PaymentIntentRequest,
    UsageRegistration,
};
use arcilla_core::{DiscountCodeId, Email, OrderId, ProductId, UserId};

/// Install the tracing subscriber once for the whole test binary.
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A recorded discount usage registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUsage {
    pub code_id: DiscountCodeId,
    pub order_id: OrderId,
    pub amount: Decimal,
}

/// In-memory fake of the hosted platform, implementing all four
/// collaborator traits. Every call is recorded; failure modes are opted
/// into per test.
#[derive(Default)]
pub struct FakePlatform {
    pub orders: Mutex<Vec<Order>>,
    pub order_items: Mutex<Vec<NewOrderItem>>,
    pub intents: Mutex<Vec<PaymentIntentRequest>>,
    pub usages: Mutex<Vec<RecordedUsage>>,
    pub emails: Mutex<Vec<(OrderId, String)>>,
    pub stock: Mutex<HashMap<ProductId, i64>>,
    pub discount_codes: Mutex<Vec<DiscountCode>>,
    pub profiles: Mutex<HashMap<UserId, String>>,
    /// Registered `(email, password)` pairs accepted by `sign_in`.
    pub accounts: Mutex<Vec<(String, String)>>,
    /// Fail this many payment-intent creations before succeeding.
    pub fail_intents: Mutex<u32>,
    /// Whether confirmation emails fail.
    pub fail_email: Mutex<bool>,
    /// Pretend the validation procedure is not deployed.
    pub procedure_missing: Mutex<bool>,
}

impl FakePlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_account(&self, email: &str, password: &str) {
        self.accounts
            .lock()
            .unwrap()
            .push((email.to_owned(), password.to_owned()));
    }

    pub fn seed_stock(&self, product_id: ProductId, stock: i64) {
        self.stock.lock().unwrap().insert(product_id, stock);
    }

    pub fn seed_discount_code(&self, code: DiscountCode) {
        self.discount_codes.lock().unwrap().push(code);
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl DataStore for FakePlatform {
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, DataStoreError> {
        let row = Order {
            id: OrderId::new(Uuid::new_v4()),
            user_id: order.user_id,
            email: order.email.clone(),
            created_at: Utc::now(),
            status: order.status,
            totals: order.totals,
            discount_code_id: order.discount_code_id,
            shipping: order.shipping.clone(),
            billing: order.billing.clone(),
            payment_intent_id: None,
            email_sent: false,
        };
        self.orders.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn insert_order_items(&self, items: &[NewOrderItem]) -> Result<(), DataStoreError> {
        self.order_items.lock().unwrap().extend_from_slice(items);
        Ok(())
    }

    async fn product_stock(&self, product_id: ProductId) -> Result<Option<i64>, DataStoreError> {
        Ok(self.stock.lock().unwrap().get(&product_id).copied())
    }

    async fn set_product_stock(
        &self,
        product_id: ProductId,
        stock: i64,
    ) -> Result<(), DataStoreError> {
        self.stock.lock().unwrap().insert(product_id, stock);
        Ok(())
    }

    async fn fetch_discount_code(
        &self,
        code: &str,
    ) -> Result<Option<DiscountCode>, DataStoreError> {
        Ok(self
            .discount_codes
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.code == code && c.is_active)
            .cloned())
    }

    async fn validate_discount_code(
        &self,
        code: &str,
        _order_total: Decimal,
    ) -> Result<DiscountValidation, DataStoreError> {
        if *self.procedure_missing.lock().unwrap() {
            return Err(DataStoreError::ProcedureMissing(
                "validate_discount_code".to_owned(),
            ));
        }
        let codes = self.discount_codes.lock().unwrap();
        let found = codes.iter().find(|c| c.code == code && c.is_active);
        match found {
            Some(c) if !c.is_expired(Utc::now()) && !c.is_exhausted() => Ok(DiscountValidation {
                valid: true,
                message: None,
            }),
            Some(_) => Ok(DiscountValidation {
                valid: false,
                message: Some("This discount code has expired".to_owned()),
            }),
            None => Ok(DiscountValidation {
                valid: false,
                message: Some("Invalid discount code".to_owned()),
            }),
        }
    }

    async fn register_discount_usage(
        &self,
        code_id: DiscountCodeId,
        order_id: OrderId,
        amount: Decimal,
    ) -> Result<UsageRegistration, DataStoreError> {
        self.usages.lock().unwrap().push(RecordedUsage {
            code_id,
            order_id,
            amount,
        });
        Ok(UsageRegistration {
            success: true,
            message: None,
        })
    }

    async fn fetch_profile_full_name(
        &self,
        user_id: UserId,
    ) -> Result<Option<String>, DataStoreError> {
        Ok(self.profiles.lock().unwrap().get(&user_id).cloned())
    }
}

#[async_trait]
impl PaymentGateway for FakePlatform {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        {
            let mut remaining = self.fail_intents.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PaymentError::Api {
                    status: 502,
                    message: "gateway unavailable".to_owned(),
                });
            }
        }
        self.intents.lock().unwrap().push(request.clone());
        Ok(PaymentIntent {
            payment_intent_id: format!("pi_{}", request.metadata.order_id),
            client_secret: format!("pi_{}_secret", request.metadata.order_id),
        })
    }
}

#[async_trait]
impl EmailSender for FakePlatform {
    async fn send_order_confirmation(
        &self,
        order_id: OrderId,
        recipient: &Email,
    ) -> Result<(), EmailSendError> {
        if *self.fail_email.lock().unwrap() {
            return Err(EmailSendError::Failed("mailbox unavailable".to_owned()));
        }
        self.emails
            .lock()
            .unwrap()
            .push((order_id, recipient.as_str().to_owned()));
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for FakePlatform {
    async fn sign_in(&self, email: &Email, password: &str) -> Result<Buyer, AuthError> {
        let known = self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .any(|(e, p)| e == email.as_str() && p == password);
        if !known {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Buyer {
            id: UserId::new(Uuid::new_v4()),
            email: email.clone(),
        })
    }

    async fn sign_up(&self, email: &Email, password: &str) -> Result<Buyer, AuthError> {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.iter().any(|(e, _)| e == email.as_str()) {
            return Err(AuthError::UserAlreadyExists);
        }
        accounts.push((email.as_str().to_owned(), password.to_owned()));
        Ok(Buyer {
            id: UserId::new(Uuid::new_v4()),
            email: email.clone(),
        })
    }
}
