//! HTTP client for the hosted backend platform.
//!
//! One client implements all four collaborator traits against the same
//! project: row access and stored procedures over the REST surface, buyer
//! auth over the auth surface, and the payment-intent and order-email
//! edge functions.
//!
//! # Authentication
//!
//! Every request carries the public `apikey`. The `Authorization` bearer
//! is the buyer's access token once signed in, the anon key before that.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use arcilla_core::{DiscountCodeId, Email, Money, OrderId, OrderStatus, ProductId, UserId};
use chrono::{DateTime, Utc};

use super::{
    AuthError, AuthProvider, DataStore, DataStoreError, DiscountValidation, EmailSendError,
    EmailSender, PaymentError, PaymentGateway, PaymentIntent, PaymentIntentRequest,
    UsageRegistration,
};
use crate::config::CheckoutConfig;
use crate::models::{Address, Buyer, DiscountCode, NewOrder, NewOrderItem, Order};

/// Error code the REST layer returns for a missing stored procedure.
const PROCEDURE_MISSING_CODE: &str = "PGRST202";

/// Client for the hosted backend, cheap to clone.
#[derive(Clone)]
pub struct PlatformClient {
    inner: Arc<PlatformClientInner>,
}

struct PlatformClientInner {
    client: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    /// Access token of the signed-in buyer, if any.
    session: RwLock<Option<String>>,
}

/// Error body shape shared by the REST and auth surfaces.
#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, alias = "msg", alias = "error_description")]
    message: Option<String>,
}

impl ErrorBody {
    fn message_or(&self, fallback: &str) -> String {
        self.message.clone().unwrap_or_else(|| fallback.to_owned())
    }
}

impl PlatformClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build or the anon key
    /// is not a valid header value.
    pub fn new(config: &CheckoutConfig) -> Result<Self, DataStoreError> {
        let mut headers = HeaderMap::new();
        let mut apikey = HeaderValue::from_str(config.anon_key.expose_secret())
            .map_err(|e| DataStoreError::Parse(format!("invalid anon key: {e}")))?;
        apikey.set_sensitive(true);
        headers.insert("apikey", apikey);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner: Arc::new(PlatformClientInner {
                client,
                base_url: config.platform_url.clone(),
                anon_key: config.anon_key.clone(),
                session: RwLock::new(None),
            }),
        })
    }

    /// Whether a buyer access token is held.
    pub async fn has_session(&self) -> bool {
        self.inner.session.read().await.is_some()
    }

    /// Drop the buyer access token; subsequent requests use the anon key.
    pub async fn sign_out(&self) {
        *self.inner.session.write().await = None;
    }

    fn endpoint(&self, path: &str) -> Result<Url, DataStoreError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| DataStoreError::Parse(format!("bad endpoint {path}: {e}")))
    }

    async fn bearer(&self) -> String {
        match self.inner.session.read().await.as_ref() {
            Some(token) => format!("Bearer {token}"),
            None => format!("Bearer {}", self.inner.anon_key.expose_secret()),
        }
    }

    async fn request<B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        prefer: Option<&'static str>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .inner
            .client
            .request(method, url)
            .header("Authorization", self.bearer().await);
        if let Some(prefer) = prefer {
            request = request.header("Prefer", prefer);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await
    }

    /// Issue a REST request and decode the JSON response.
    async fn rest<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        prefer: Option<&'static str>,
    ) -> Result<T, DataStoreError> {
        let url = self.endpoint(path)?;
        let response = self.request(method, url, body, prefer).await?;
        let status = response.status();
        let payload = response.text().await?;

        if !status.is_success() {
            return Err(rest_error(status, &payload));
        }
        serde_json::from_str(&payload)
            .map_err(|e| DataStoreError::Parse(format!("{path}: {e}")))
    }

    /// REST request where the response body is ignored.
    async fn rest_no_content<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), DataStoreError> {
        let url = self.endpoint(path)?;
        let response = self
            .request(method, url, body, Some("return=minimal"))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let payload = response.text().await?;
            return Err(rest_error(status, &payload));
        }
        Ok(())
    }

    /// Call a stored procedure on the REST surface.
    async fn rpc<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        name: &str,
        args: &B,
    ) -> Result<T, DataStoreError> {
        let url = self.endpoint(&format!("rest/v1/rpc/{name}"))?;
        let response = self.request(Method::POST, url, Some(args), None).await?;
        let status = response.status();
        let payload = response.text().await?;

        if !status.is_success() {
            let error: ErrorBody = serde_json::from_str(&payload).unwrap_or_default();
            if is_procedure_missing(status, &error) {
                return Err(DataStoreError::ProcedureMissing(name.to_owned()));
            }
            return Err(DataStoreError::Api {
                status: status.as_u16(),
                message: error.message_or(&payload),
            });
        }
        serde_json::from_str(&payload).map_err(|e| DataStoreError::Parse(format!("{name}: {e}")))
    }

    /// Call an edge function, returning the raw status and payload.
    async fn edge_function<B: Serialize + Sync>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<(StatusCode, String), reqwest::Error> {
        let response = self.request(Method::POST, url, Some(body), None).await?;
        let status = response.status();
        let payload = response.text().await?;
        Ok((status, payload))
    }

    async fn auth_request<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(StatusCode, Result<T, String>), AuthError> {
        let url = self
            .endpoint(path)
            .map_err(|e| AuthError::Parse(e.to_string()))?;
        let response = self.request(Method::POST, url, Some(body), None).await?;
        let status = response.status();
        let payload = response.text().await?;

        if status.is_success() {
            let parsed = serde_json::from_str(&payload)
                .map_err(|e| AuthError::Parse(format!("{path}: {e}")))?;
            Ok((status, Ok(parsed)))
        } else {
            let error: ErrorBody = serde_json::from_str(&payload).unwrap_or_default();
            Ok((status, Err(error.message_or(&payload))))
        }
    }

    async fn store_session(&self, session: &AuthSession) {
        *self.inner.session.write().await = Some(session.access_token.clone());
    }
}

fn rest_error(status: StatusCode, payload: &str) -> DataStoreError {
    let error: ErrorBody = serde_json::from_str(payload).unwrap_or_default();
    DataStoreError::Api {
        status: status.as_u16(),
        message: error.message_or(payload),
    }
}

/// Whether an error response means the stored procedure is not deployed.
fn is_procedure_missing(status: StatusCode, error: &ErrorBody) -> bool {
    if error.code.as_deref() == Some(PROCEDURE_MISSING_CODE) {
        return true;
    }
    status == StatusCode::NOT_FOUND
        && error
            .message
            .as_deref()
            .is_some_and(|m| m.contains("Could not find the function"))
}

// =============================================================================
// Wire rows
// =============================================================================

/// An order row as stored: addresses flattened into prefixed columns,
/// amounts as plain numerics.
#[derive(Debug, Serialize, Deserialize)]
struct OrderRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<OrderId>,
    user_id: UserId,
    email: Email,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    status: OrderStatus,
    subtotal: Decimal,
    discount: Decimal,
    total: Decimal,
    #[serde(default)]
    discount_code_id: Option<DiscountCodeId>,
    #[serde(flatten)]
    shipping: ShippingColumns,
    #[serde(flatten)]
    billing: BillingColumns,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_intent_id: Option<String>,
    #[serde(default)]
    email_sent: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ShippingColumns {
    shipping_first_name: String,
    shipping_last_name: String,
    shipping_address: String,
    #[serde(default)]
    shipping_address_line2: Option<String>,
    shipping_city: String,
    shipping_province: String,
    shipping_postal_code: String,
    shipping_country: String,
    shipping_phone: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BillingColumns {
    billing_first_name: String,
    billing_last_name: String,
    billing_address: String,
    #[serde(default)]
    billing_address_line2: Option<String>,
    billing_city: String,
    billing_province: String,
    billing_postal_code: String,
    billing_country: String,
    billing_phone: String,
}

impl From<&Address> for ShippingColumns {
    fn from(a: &Address) -> Self {
        Self {
            shipping_first_name: a.first_name.clone(),
            shipping_last_name: a.last_name.clone(),
            shipping_address: a.line1.clone(),
            shipping_address_line2: a.line2.clone(),
            shipping_city: a.city.clone(),
            shipping_province: a.province.clone(),
            shipping_postal_code: a.postal_code.clone(),
            shipping_country: a.country.clone(),
            shipping_phone: a.phone.clone(),
        }
    }
}

impl From<ShippingColumns> for Address {
    fn from(c: ShippingColumns) -> Self {
        Self {
            first_name: c.shipping_first_name,
            last_name: c.shipping_last_name,
            line1: c.shipping_address,
            line2: c.shipping_address_line2,
            city: c.shipping_city,
            province: c.shipping_province,
            postal_code: c.shipping_postal_code,
            country: c.shipping_country,
            phone: c.shipping_phone,
        }
    }
}

impl From<&Address> for BillingColumns {
    fn from(a: &Address) -> Self {
        Self {
            billing_first_name: a.first_name.clone(),
            billing_last_name: a.last_name.clone(),
            billing_address: a.line1.clone(),
            billing_address_line2: a.line2.clone(),
            billing_city: a.city.clone(),
            billing_province: a.province.clone(),
            billing_postal_code: a.postal_code.clone(),
            billing_country: a.country.clone(),
            billing_phone: a.phone.clone(),
        }
    }
}

impl From<BillingColumns> for Address {
    fn from(c: BillingColumns) -> Self {
        Self {
            first_name: c.billing_first_name,
            last_name: c.billing_last_name,
            line1: c.billing_address,
            line2: c.billing_address_line2,
            city: c.billing_city,
            province: c.billing_province,
            postal_code: c.billing_postal_code,
            country: c.billing_country,
            phone: c.billing_phone,
        }
    }
}

impl OrderRow {
    fn from_new(order: &NewOrder) -> Self {
        Self {
            id: None,
            user_id: order.user_id,
            email: order.email.clone(),
            created_at: None,
            status: order.status,
            subtotal: order.totals.subtotal.amount(),
            discount: order.totals.discount.amount(),
            total: order.totals.total.amount(),
            discount_code_id: order.discount_code_id,
            shipping: (&order.shipping).into(),
            billing: (&order.billing).into(),
            payment_intent_id: None,
            email_sent: false,
        }
    }

    fn into_order(self) -> Result<Order, DataStoreError> {
        let (Some(id), Some(created_at)) = (self.id, self.created_at) else {
            return Err(DataStoreError::Parse(
                "order row missing id or created_at".to_owned(),
            ));
        };
        Ok(Order {
            id,
            user_id: self.user_id,
            email: self.email,
            created_at,
            status: self.status,
            totals: crate::models::OrderTotals {
                subtotal: Money::eur(self.subtotal),
                discount: Money::eur(self.discount),
                total: Money::eur(self.total),
            },
            discount_code_id: self.discount_code_id,
            shipping: self.shipping.into(),
            billing: self.billing.into(),
            payment_intent_id: self.payment_intent_id,
            email_sent: self.email_sent,
        })
    }
}

#[derive(Debug, Serialize)]
struct OrderItemRow {
    order_id: OrderId,
    product_id: ProductId,
    quantity: u32,
    unit_price: Decimal,
}

impl OrderItemRow {
    fn from_new(item: &NewOrderItem) -> Self {
        Self {
            order_id: item.order_id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price.amount(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StockRow {
    stock: i64,
}

#[derive(Debug, Serialize)]
struct StockPatch {
    stock: i64,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidateDiscountArgs<'a> {
    p_code: &'a str,
    p_order_total: Decimal,
}

#[derive(Debug, Serialize)]
struct RegisterUsageArgs {
    p_code_id: DiscountCodeId,
    p_order_id: OrderId,
    p_discount_amount: Decimal,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthSession {
    access_token: String,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: UserId,
    email: Email,
}

#[derive(Debug, Serialize)]
struct OrderEmailRequest<'a> {
    order_id: OrderId,
    recipient: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderEmailResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl DataStore for PlatformClient {
    #[tracing::instrument(skip_all)]
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, DataStoreError> {
        let rows: Vec<OrderRow> = self
            .rest(
                Method::POST,
                "rest/v1/orders",
                Some(&[OrderRow::from_new(order)]),
                Some("return=representation"),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or(DataStoreError::MissingRow("orders"))?
            .into_order()
    }

    #[tracing::instrument(skip_all, fields(count = items.len()))]
    async fn insert_order_items(&self, items: &[NewOrderItem]) -> Result<(), DataStoreError> {
        let rows: Vec<OrderItemRow> = items.iter().map(OrderItemRow::from_new).collect();
        self.rest_no_content(Method::POST, "rest/v1/order_items", Some(&rows))
            .await
    }

    async fn product_stock(&self, product_id: ProductId) -> Result<Option<i64>, DataStoreError> {
        let rows: Vec<StockRow> = self
            .rest::<_, ()>(
                Method::GET,
                &format!("rest/v1/products?id=eq.{product_id}&select=stock"),
                None,
                None,
            )
            .await?;
        Ok(rows.into_iter().next().map(|row| row.stock))
    }

    async fn set_product_stock(
        &self,
        product_id: ProductId,
        stock: i64,
    ) -> Result<(), DataStoreError> {
        self.rest_no_content(
            Method::PATCH,
            &format!("rest/v1/products?id=eq.{product_id}"),
            Some(&StockPatch { stock }),
        )
        .await
    }

    async fn fetch_discount_code(
        &self,
        code: &str,
    ) -> Result<Option<DiscountCode>, DataStoreError> {
        let encoded = urlencoding::encode(code);
        let rows: Vec<DiscountCode> = self
            .rest::<_, ()>(
                Method::GET,
                &format!("rest/v1/discount_codes?code=eq.{encoded}&select=*"),
                None,
                None,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    #[tracing::instrument(skip_all)]
    async fn validate_discount_code(
        &self,
        code: &str,
        order_total: Decimal,
    ) -> Result<DiscountValidation, DataStoreError> {
        self.rpc(
            "validate_discount_code",
            &ValidateDiscountArgs {
                p_code: code,
                p_order_total: order_total,
            },
        )
        .await
    }

    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    async fn register_discount_usage(
        &self,
        code_id: DiscountCodeId,
        order_id: OrderId,
        amount: Decimal,
    ) -> Result<UsageRegistration, DataStoreError> {
        self.rpc(
            "register_discount_code_usage",
            &RegisterUsageArgs {
                p_code_id: code_id,
                p_order_id: order_id,
                p_discount_amount: amount,
            },
        )
        .await
    }

    async fn fetch_profile_full_name(
        &self,
        user_id: UserId,
    ) -> Result<Option<String>, DataStoreError> {
        let rows: Vec<ProfileRow> = self
            .rest::<_, ()>(
                Method::GET,
                &format!("rest/v1/profiles?id=eq.{user_id}&select=full_name"),
                None,
                None,
            )
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.full_name))
    }
}

#[async_trait]
impl PaymentGateway for PlatformClient {
    #[tracing::instrument(skip_all, fields(order_id = %request.metadata.order_id))]
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        let url = self
            .endpoint("functions/v1/create-payment-intent")
            .map_err(|e| PaymentError::Parse(e.to_string()))?;
        let (status, payload) = self.edge_function(url, request).await?;

        if !status.is_success() {
            let error: ErrorBody = serde_json::from_str(&payload).unwrap_or_default();
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message: error.message_or(&payload),
            });
        }
        serde_json::from_str(&payload)
            .map_err(|e| PaymentError::Parse(format!("create-payment-intent: {e}")))
    }
}

#[async_trait]
impl EmailSender for PlatformClient {
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    async fn send_order_confirmation(
        &self,
        order_id: OrderId,
        recipient: &Email,
    ) -> Result<(), EmailSendError> {
        let url = self
            .endpoint("functions/v1/send-order-email")
            .map_err(|e| EmailSendError::Failed(e.to_string()))?;
        let (status, payload) = self
            .edge_function(
                url,
                &OrderEmailRequest {
                    order_id,
                    recipient: recipient.as_str(),
                },
            )
            .await?;

        if !status.is_success() {
            let error: ErrorBody = serde_json::from_str(&payload).unwrap_or_default();
            return Err(EmailSendError::Api {
                status: status.as_u16(),
                message: error.message_or(&payload),
            });
        }

        let body: OrderEmailResponse = serde_json::from_str(&payload).unwrap_or(OrderEmailResponse {
            success: true,
            error: None,
        });
        if body.success {
            Ok(())
        } else {
            Err(EmailSendError::Failed(
                body.error.unwrap_or_else(|| "unknown".to_owned()),
            ))
        }
    }
}

#[async_trait]
impl AuthProvider for PlatformClient {
    #[tracing::instrument(skip_all)]
    async fn sign_in(&self, email: &Email, password: &str) -> Result<Buyer, AuthError> {
        let (status, result) = self
            .auth_request::<AuthSession, _>(
                "auth/v1/token?grant_type=password",
                &Credentials {
                    email: email.as_str(),
                    password,
                },
            )
            .await?;

        match result {
            Ok(session) => {
                self.store_session(&session).await;
                Ok(Buyer {
                    id: session.user.id,
                    email: session.user.email,
                })
            }
            Err(_) if status == StatusCode::BAD_REQUEST => Err(AuthError::InvalidCredentials),
            Err(message) => Err(AuthError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn sign_up(&self, email: &Email, password: &str) -> Result<Buyer, AuthError> {
        let (status, result) = self
            .auth_request::<AuthSession, _>(
                "auth/v1/signup",
                &Credentials {
                    email: email.as_str(),
                    password,
                },
            )
            .await?;

        match result {
            Ok(session) => {
                self.store_session(&session).await;
                Ok(Buyer {
                    id: session.user.id,
                    email: session.user.email,
                })
            }
            Err(message) if message.to_lowercase().contains("already registered") => {
                Err(AuthError::UserAlreadyExists)
            }
            Err(message) => Err(AuthError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }
}
