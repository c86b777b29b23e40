//! The effectful checkout driver.
//!
//! [`CheckoutFlow`] owns the buyer's progress through a single checkout:
//! it holds the current step, the form being filled in, the applied
//! discount, and (once an order is placed) the pending order plus the
//! gateway client secret. All sequencing decisions go through the pure
//! [`fsm::transition`] function; this module contributes the I/O.
//!
//! Order creation is deliberately not transactional: a payment failure or
//! an abandoned checkout leaves a `pending` order behind, and retrying
//! creates a fresh order. Reconciliation of the debris is a back-office
//! concern, not this flow's.

use std::sync::Arc;

use arcilla_core::{Email, OrderId, OrderStatus};

use super::form::CheckoutForm;
use super::fsm::{self, CheckoutEvent, CheckoutStep};
use crate::cart::CartStore;
use crate::discount::DiscountEvaluator;
use crate::error::{CheckoutError, Result};
use crate::fulfillment::{self, FulfillmentReport};
use crate::models::{AppliedDiscount, Buyer, CartItem, NewOrder, NewOrderItem, Order, OrderTotals};
use crate::services::{
    AuthProvider, DataStore, EmailSender, PaymentGateway, PaymentIntentRequest, PaymentMetadata,
};

/// One buyer's checkout, from cart to payment confirmation.
pub struct CheckoutFlow {
    step: CheckoutStep,
    cart: CartStore,
    store: Arc<dyn DataStore>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn EmailSender>,
    auth: Arc<dyn AuthProvider>,
    buyer: Option<Buyer>,
    /// The in-progress form; mutated freely by the caller between steps.
    pub form: CheckoutForm,
    discount: Option<AppliedDiscount>,
    pending: Option<PendingPayment>,
    client_secret: Option<String>,
}

/// What was actually purchased, captured when the order is placed.
///
/// Fulfillment runs from this snapshot, not from whatever the cart or
/// applied discount hold by the time the gateway reports back; the cart
/// stays mutable on the `Payment` step without diverging from the order.
struct PendingPayment {
    order: Order,
    items: Vec<CartItem>,
    discount: Option<AppliedDiscount>,
}

impl CheckoutFlow {
    #[must_use]
    pub fn new(
        cart: CartStore,
        store: Arc<dyn DataStore>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn EmailSender>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            step: CheckoutStep::default(),
            cart,
            store,
            gateway,
            mailer,
            auth,
            buyer: None,
            form: CheckoutForm::default(),
            discount: None,
            pending: None,
            client_secret: None,
        }
    }

    #[must_use]
    pub const fn step(&self) -> CheckoutStep {
        self.step
    }

    #[must_use]
    pub const fn cart(&self) -> &CartStore {
        &self.cart
    }

    pub const fn cart_mut(&mut self) -> &mut CartStore {
        &mut self.cart
    }

    #[must_use]
    pub const fn buyer(&self) -> Option<&Buyer> {
        self.buyer.as_ref()
    }

    #[must_use]
    pub const fn discount(&self) -> Option<&AppliedDiscount> {
        self.discount.as_ref()
    }

    /// The gateway client secret for the hosted payment element, present
    /// only on the `Payment` step.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    /// The order awaiting payment, if one has been placed.
    #[must_use]
    pub fn pending_order_id(&self) -> Option<OrderId> {
        self.pending.as_ref().map(|p| p.order.id)
    }

    /// Current totals for display: subtotal, applied discount, payable total.
    #[must_use]
    pub fn totals(&self) -> OrderTotals {
        OrderTotals::compute(
            self.cart.total_price().rounded_to_cents(),
            self.discount.as_ref(),
        )
    }

    /// Open the checkout. Authenticated buyers land directly on the
    /// shipping step, with the form prefilled from their profile.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::EmptyCart`] when there is nothing to buy.
    #[tracing::instrument(skip(self))]
    pub async fn open(&mut self) -> Result<CheckoutStep> {
        // A completed checkout starts over on re-entry
        if self.step == CheckoutStep::Success {
            self.apply(CheckoutEvent::Reset);
        }
        if self.cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let authenticated = self.buyer.is_some();
        self.apply(CheckoutEvent::Opened { authenticated });
        if authenticated {
            self.prefill_from_profile().await;
        }
        Ok(self.step)
    }

    /// Close the checkout without rolling anything back. Any pending order
    /// stays `pending`; the cart and form survive for a later re-open.
    pub fn close(&mut self) {
        self.apply(CheckoutEvent::Reset);
        self.pending = None;
        self.client_secret = None;
    }

    pub fn choose_login(&mut self) {
        self.apply(CheckoutEvent::ChoseLogin);
    }

    pub fn choose_register(&mut self) {
        self.apply(CheckoutEvent::ChoseRegister);
    }

    pub fn back_to_auth_choice(&mut self) {
        self.apply(CheckoutEvent::BackToAuthChoice);
    }

    /// Sign an existing buyer in and advance to the shipping step.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::services::AuthError`] from the auth provider.
    #[tracing::instrument(skip_all)]
    pub async fn sign_in(&mut self, email: &Email, password: &str) -> Result<()> {
        let buyer = self.auth.sign_in(email, password).await?;
        self.authenticated(buyer).await;
        Ok(())
    }

    /// Register a new buyer account and advance to the shipping step.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::services::AuthError`] from the auth provider.
    #[tracing::instrument(skip_all)]
    pub async fn sign_up(&mut self, email: &Email, password: &str) -> Result<()> {
        let buyer = self.auth.sign_up(email, password).await?;
        self.authenticated(buyer).await;
        Ok(())
    }

    async fn authenticated(&mut self, buyer: Buyer) {
        if self.form.email.trim().is_empty() {
            self.form.email = buyer.email.as_str().to_owned();
        }
        self.buyer = Some(buyer);
        self.apply(CheckoutEvent::Authenticated);
        self.prefill_from_profile().await;
    }

    /// Prefill the shipping name from the buyer's stored profile. Best
    /// effort: lookup failures are logged, never surfaced.
    async fn prefill_from_profile(&mut self) {
        let Some(buyer) = &self.buyer else { return };
        if !self.form.shipping.first_name.trim().is_empty() {
            return;
        }

        match self.store.fetch_profile_full_name(buyer.id).await {
            Ok(Some(full_name)) => {
                let mut parts = full_name.split_whitespace();
                if let Some(first) = parts.next() {
                    self.form.shipping.first_name = first.to_owned();
                    self.form.shipping.last_name =
                        parts.collect::<Vec<_>>().join(" ");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "profile prefill failed");
            }
        }
    }

    /// Validate and apply a discount code against the current subtotal.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Discount`] for rejections and validation
    /// outages; the previously applied discount, if any, is kept.
    #[tracing::instrument(skip(self))]
    pub async fn apply_discount(&mut self, raw_code: &str) -> Result<&AppliedDiscount> {
        let subtotal = self.cart.total_price().rounded_to_cents();
        let evaluator = DiscountEvaluator::new(Arc::clone(&self.store));
        let applied = evaluator.apply(raw_code, subtotal).await?;

        tracing::info!(code = %applied.code, amount = %applied.amount, "discount applied");
        Ok(self.discount.insert(applied))
    }

    /// Drop the applied discount. Purely local; usage is only recorded
    /// after a successful payment.
    pub fn remove_discount(&mut self) {
        self.discount = None;
    }

    /// Submit the shipping step: validate the form, create the pending
    /// order with its line items, and open a payment intent. On success
    /// the flow advances to `Payment` and the client secret is available.
    ///
    /// Any failure leaves the flow on `Shipping` with the form intact. A
    /// failure after the order row was created leaves that row behind;
    /// resubmission creates a new order.
    ///
    /// # Errors
    ///
    /// [`CheckoutError::Validation`] with per-field messages,
    /// [`CheckoutError::OrderCreation`], or [`CheckoutError::PaymentIntent`].
    #[tracing::instrument(skip(self))]
    pub async fn submit_shipping(&mut self) -> Result<&str> {
        if self.step != CheckoutStep::Shipping {
            return Err(CheckoutError::WrongStep {
                action: "submit_shipping",
            });
        }
        let Some(buyer) = self.buyer.clone() else {
            return Err(CheckoutError::NotAuthenticated);
        };
        if self.cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let validated = self.form.validate().map_err(CheckoutError::Validation)?;
        let totals = self.totals();

        let order = self
            .store
            .insert_order(&NewOrder {
                user_id: buyer.id,
                email: validated.email.clone(),
                status: OrderStatus::Pending,
                totals,
                discount_code_id: self.discount.as_ref().map(|d| d.code_id),
                shipping: validated.shipping,
                billing: validated.billing,
            })
            .await
            .map_err(CheckoutError::OrderCreation)?;

        self.store
            .insert_order_items(&NewOrderItem::from_cart(order.id, self.cart.items()))
            .await
            .map_err(CheckoutError::OrderCreation)?;

        let intent = self
            .gateway
            .create_payment_intent(&PaymentIntentRequest {
                amount: totals.total.to_minor_units()?,
                currency: totals.total.currency(),
                description: format!("Pedido #{}", order.id),
                metadata: PaymentMetadata {
                    order_id: order.id,
                    user_id: buyer.id,
                    discount_code_id: self.discount.as_ref().map(|d| d.code_id),
                    discount_amount: totals.discount.amount(),
                },
            })
            .await?;

        tracing::info!(order_id = %order.id, total = %totals.total, "order placed, awaiting payment");
        self.pending = Some(PendingPayment {
            order,
            items: self.cart.items().to_vec(),
            discount: self.discount.clone(),
        });
        self.client_secret = Some(intent.client_secret);
        self.apply(CheckoutEvent::OrderPlaced);

        Ok(self.client_secret.as_deref().unwrap_or_default())
    }

    /// The gateway reported a payment error. The flow returns to the
    /// shipping step; the pending order is abandoned and resubmission
    /// creates a fresh one.
    pub fn payment_failed(&mut self) {
        if let Some(pending) = &self.pending {
            tracing::warn!(order_id = %pending.order.id, "payment failed, returning to shipping");
        }
        self.pending = None;
        self.client_secret = None;
        self.apply(CheckoutEvent::PaymentFailed);
    }

    /// The gateway reported payment success. Runs fulfillment (discount
    /// usage, stock decrements, confirmation email), clears the cart, and
    /// enters `Success`. Fulfillment failures never block completion; the
    /// returned report says what went through.
    ///
    /// # Errors
    ///
    /// [`CheckoutError::WrongStep`] if no payment is in progress.
    #[tracing::instrument(skip(self))]
    pub async fn payment_succeeded(&mut self) -> Result<FulfillmentReport> {
        if self.step != CheckoutStep::Payment {
            return Err(CheckoutError::WrongStep {
                action: "payment_succeeded",
            });
        }
        let Some(pending) = self.pending.take() else {
            return Err(CheckoutError::WrongStep {
                action: "payment_succeeded",
            });
        };

        // Fulfill from the snapshot: the charge covered these items and
        // this discount, regardless of cart edits made since
        let report = fulfillment::run(
            self.store.as_ref(),
            self.mailer.as_ref(),
            pending.order.id,
            &pending.order.email,
            &pending.items,
            pending.discount.as_ref(),
        )
        .await;

        self.cart.clear();
        self.discount = None;
        self.client_secret = None;
        self.apply(CheckoutEvent::PaymentSucceeded);

        tracing::info!(order_id = %pending.order.id, ?report, "checkout complete");
        Ok(report)
    }

    fn apply(&mut self, event: CheckoutEvent) {
        let next = fsm::transition(self.step, event);
        if next != self.step {
            tracing::debug!(from = ?self.step, to = ?next, event = ?event, "checkout step change");
            self.step = next;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cart::MemoryStorage;
    use crate::models::CartItem;
    use crate::services::{
        DataStoreError, EmailSendError, MockAuthProvider, MockDataStore, MockEmailSender,
        MockPaymentGateway, PaymentError, PaymentIntent, UsageRegistration,
    };
    use arcilla_core::{DiscountCodeId, DiscountType, Money, ProductId, UserId};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn eur(s: &str) -> Money {
        Money::eur(s.parse().unwrap())
    }

    fn cart_with(price: &str, quantity: u32) -> CartStore {
        let mut cart = CartStore::new(Box::new(MemoryStorage::default()));
        cart.add_item(CartItem {
            id: ProductId::new(Uuid::new_v4()),
            name: "Jarrón ondulado".to_owned(),
            unit_price: eur(price),
            quantity,
            image: None,
            slug: "jarron-ondulado".to_owned(),
        });
        cart
    }

    fn buyer() -> Buyer {
        Buyer {
            id: UserId::new(Uuid::new_v4()),
            email: "lucia@example.com".parse().unwrap(),
        }
    }

    fn order_row(new: &NewOrder) -> Order {
        Order {
            id: OrderId::new(Uuid::new_v4()),
            user_id: new.user_id,
            email: new.email.clone(),
            created_at: Utc::now(),
            status: new.status,
            totals: new.totals,
            discount_code_id: new.discount_code_id,
            shipping: new.shipping.clone(),
            billing: new.billing.clone(),
            payment_intent_id: None,
            email_sent: false,
        }
    }

    fn fill_form(flow: &mut CheckoutFlow) {
        flow.form.email = "lucia@example.com".to_owned();
        flow.form.same_as_shipping = true;
        flow.form.shipping.first_name = "Lucía".to_owned();
        flow.form.shipping.last_name = "Romero".to_owned();
        flow.form.shipping.line1 = "Calle del Olmo 12".to_owned();
        flow.form.shipping.city = "Madrid".to_owned();
        flow.form.shipping.province = "Madrid".to_owned();
        flow.form.shipping.postal_code = "28001".to_owned();
        flow.form.shipping.phone = "+34 600 000 000".to_owned();
    }

    struct Mocks {
        store: MockDataStore,
        gateway: MockPaymentGateway,
        mailer: MockEmailSender,
        auth: MockAuthProvider,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                store: MockDataStore::new(),
                gateway: MockPaymentGateway::new(),
                mailer: MockEmailSender::new(),
                auth: MockAuthProvider::new(),
            }
        }

        fn into_flow(self, cart: CartStore) -> CheckoutFlow {
            CheckoutFlow::new(
                cart,
                Arc::new(self.store),
                Arc::new(self.gateway),
                Arc::new(self.mailer),
                Arc::new(self.auth),
            )
        }
    }

    fn expect_happy_order(store: &mut MockDataStore) {
        store
            .expect_insert_order()
            .returning(|new| Ok(order_row(new)));
        store.expect_insert_order_items().returning(|_| Ok(()));
    }

    fn expect_happy_intent(gateway: &mut MockPaymentGateway) {
        gateway.expect_create_payment_intent().returning(|_| {
            Ok(PaymentIntent {
                payment_intent_id: "pi_test".to_owned(),
                client_secret: "pi_test_secret".to_owned(),
            })
        });
    }

    #[tokio::test]
    async fn test_open_with_empty_cart_fails() {
        let mut flow = Mocks::new().into_flow(CartStore::new(Box::new(MemoryStorage::default())));
        let err = flow.open().await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
        assert_eq!(flow.step(), CheckoutStep::AuthChoice);
    }

    #[tokio::test]
    async fn test_open_unauthenticated_lands_on_auth_choice() {
        let mut flow = Mocks::new().into_flow(cart_with("20.00", 1));
        assert_eq!(flow.open().await.unwrap(), CheckoutStep::AuthChoice);
    }

    #[tokio::test]
    async fn test_sign_in_advances_and_prefills() {
        let mut mocks = Mocks::new();
        mocks
            .auth
            .expect_sign_in()
            .returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(Some("Lucía Romero García".to_owned())));

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();

        assert_eq!(flow.step(), CheckoutStep::Shipping);
        assert_eq!(flow.form.shipping.first_name, "Lucía");
        assert_eq!(flow.form.shipping.last_name, "Romero García");
        assert_eq!(flow.form.email, "lucia@example.com");
    }

    #[tokio::test]
    async fn test_prefill_failure_is_swallowed() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| {
                Err(DataStoreError::Api {
                    status: 500,
                    message: "boom".to_owned(),
                })
            });

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();

        assert_eq!(flow.step(), CheckoutStep::Shipping);
        assert!(flow.form.shipping.first_name.is_empty());
    }

    #[tokio::test]
    async fn test_prefill_keeps_user_entered_name() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .times(0)
            .returning(|_| Ok(None));

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.form.shipping.first_name = "Carmen".to_owned();
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();

        assert_eq!(flow.form.shipping.first_name, "Carmen");
    }

    #[tokio::test]
    async fn test_submit_requires_shipping_step() {
        let mut flow = Mocks::new().into_flow(cart_with("20.00", 1));
        let err = flow.submit_shipping().await.unwrap_err();
        assert!(matches!(err, CheckoutError::WrongStep { .. }));
    }

    #[tokio::test]
    async fn test_submit_creates_order_and_intent() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        mocks
            .store
            .expect_insert_order()
            .withf(|new| {
                new.status == OrderStatus::Pending && new.totals.total == eur("40.00")
            })
            .returning(|new| Ok(order_row(new)));
        mocks
            .store
            .expect_insert_order_items()
            .withf(|items| items.len() == 1 && items[0].quantity == 2)
            .returning(|_| Ok(()));
        mocks
            .gateway
            .expect_create_payment_intent()
            .withf(|req| {
                req.amount == 4000
                    && req.description.starts_with("Pedido #")
                    && req.metadata.discount_code_id.is_none()
                    && req.metadata.discount_amount == Decimal::ZERO
            })
            .returning(|_| {
                Ok(PaymentIntent {
                    payment_intent_id: "pi_test".to_owned(),
                    client_secret: "pi_test_secret".to_owned(),
                })
            });

        let mut flow = mocks.into_flow(cart_with("20.00", 2));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);

        let secret = flow.submit_shipping().await.unwrap().to_owned();
        assert_eq!(secret, "pi_test_secret");
        assert_eq!(flow.step(), CheckoutStep::Payment);
        assert!(flow.pending_order_id().is_some());
    }

    #[tokio::test]
    async fn test_submit_validation_failure_stays_on_shipping() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        mocks.store.expect_insert_order().times(0);

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);
        flow.form.shipping.postal_code = "35001".to_owned();

        let err = flow.submit_shipping().await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
        assert_eq!(flow.step(), CheckoutStep::Shipping);
        assert!(flow.client_secret().is_none());
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_order_behind_and_retry_creates_new_one() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        // Two submissions mean two distinct order rows, no updates
        mocks
            .store
            .expect_insert_order()
            .times(2)
            .returning(|new| Ok(order_row(new)));
        mocks
            .store
            .expect_insert_order_items()
            .times(2)
            .returning(|_| Ok(()));

        let mut fail_first = true;
        mocks
            .gateway
            .expect_create_payment_intent()
            .returning(move |_| {
                if std::mem::take(&mut fail_first) {
                    Err(PaymentError::Api {
                        status: 502,
                        message: "gateway unavailable".to_owned(),
                    })
                } else {
                    Ok(PaymentIntent {
                        payment_intent_id: "pi_retry".to_owned(),
                        client_secret: "pi_retry_secret".to_owned(),
                    })
                }
            });

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);

        let err = flow.submit_shipping().await.unwrap_err();
        assert!(matches!(err, CheckoutError::PaymentIntent(_)));
        assert_eq!(flow.step(), CheckoutStep::Shipping);
        assert!(flow.client_secret().is_none());

        flow.submit_shipping().await.unwrap();
        assert_eq!(flow.step(), CheckoutStep::Payment);
    }

    #[tokio::test]
    async fn test_payment_failed_returns_to_shipping() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        expect_happy_order(&mut mocks.store);
        expect_happy_intent(&mut mocks.gateway);

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);
        flow.submit_shipping().await.unwrap();

        flow.payment_failed();
        assert_eq!(flow.step(), CheckoutStep::Shipping);
        assert!(flow.pending_order_id().is_none());
        // Cart survives a failed payment
        assert!(!flow.cart().is_empty());
    }

    #[tokio::test]
    async fn test_payment_success_runs_fulfillment_and_clears_cart() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        expect_happy_order(&mut mocks.store);
        expect_happy_intent(&mut mocks.gateway);
        mocks.store.expect_product_stock().returning(|_| Ok(Some(9)));
        mocks
            .store
            .expect_set_product_stock()
            .withf(|_, stock| *stock == 8)
            .returning(|_, _| Ok(()));
        mocks
            .mailer
            .expect_send_order_confirmation()
            .returning(|_, _| Ok(()));

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);
        flow.submit_shipping().await.unwrap();

        let report = flow.payment_succeeded().await.unwrap();
        assert_eq!(flow.step(), CheckoutStep::Success);
        assert!(flow.cart().is_empty());
        assert!(report.stock_updated);
        assert!(report.email_sent);
        assert_eq!(report.discount_registered, None);
    }

    #[tokio::test]
    async fn test_email_failure_still_completes_checkout() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        expect_happy_order(&mut mocks.store);
        expect_happy_intent(&mut mocks.gateway);
        mocks.store.expect_product_stock().returning(|_| Ok(Some(5)));
        mocks
            .store
            .expect_set_product_stock()
            .returning(|_, _| Ok(()));
        mocks
            .mailer
            .expect_send_order_confirmation()
            .returning(|_, _| Err(EmailSendError::Failed("smtp down".to_owned())));

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);
        flow.submit_shipping().await.unwrap();

        let report = flow.payment_succeeded().await.unwrap();
        assert_eq!(flow.step(), CheckoutStep::Success);
        assert!(flow.cart().is_empty());
        assert!(!report.email_sent);
    }

    #[tokio::test]
    async fn test_discount_flows_into_order_intent_and_usage() {
        let code_id = DiscountCodeId::new(Uuid::new_v4());

        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        mocks
            .store
            .expect_validate_discount_code()
            .returning(|_, _| {
                Ok(crate::services::DiscountValidation {
                    valid: true,
                    message: None,
                })
            });
        mocks
            .store
            .expect_fetch_discount_code()
            .returning(move |_| {
                Ok(Some(crate::models::DiscountCode {
                    id: code_id,
                    code: "VERANO10".to_owned(),
                    discount_type: DiscountType::Percentage,
                    discount_value: "10".parse().unwrap(),
                    single_use_per_user: false,
                    is_active: true,
                    max_uses: None,
                    times_used: 0,
                    valid_until: None,
                }))
            });
        mocks
            .store
            .expect_insert_order()
            .withf(move |new| {
                new.discount_code_id == Some(code_id) && new.totals.total == eur("18.00")
            })
            .returning(|new| Ok(order_row(new)));
        mocks.store.expect_insert_order_items().returning(|_| Ok(()));
        mocks
            .gateway
            .expect_create_payment_intent()
            .withf(move |req| {
                req.amount == 1800
                    && req.metadata.discount_code_id == Some(code_id)
                    && req.metadata.discount_amount == "2".parse().unwrap()
            })
            .returning(|_| {
                Ok(PaymentIntent {
                    payment_intent_id: "pi_disc".to_owned(),
                    client_secret: "pi_disc_secret".to_owned(),
                })
            });
        mocks
            .store
            .expect_register_discount_usage()
            .withf(move |id, _, amount| *id == code_id && *amount == "2".parse().unwrap())
            .times(1)
            .returning(|_, _, _| {
                Ok(UsageRegistration {
                    success: true,
                    message: None,
                })
            });
        mocks.store.expect_product_stock().returning(|_| Ok(Some(3)));
        mocks
            .store
            .expect_set_product_stock()
            .returning(|_, _| Ok(()));
        mocks
            .mailer
            .expect_send_order_confirmation()
            .returning(|_, _| Ok(()));

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);

        let applied = flow.apply_discount("verano10").await.unwrap();
        assert_eq!(applied.amount, eur("2.00"));
        assert_eq!(flow.totals().total, eur("18.00"));

        flow.submit_shipping().await.unwrap();
        let report = flow.payment_succeeded().await.unwrap();
        assert_eq!(report.discount_registered, Some(true));
        assert!(flow.discount().is_none());
    }

    #[tokio::test]
    async fn test_fulfillment_uses_order_snapshot_not_live_cart() {
        let product = ProductId::new(Uuid::new_v4());
        let code_id = DiscountCodeId::new(Uuid::new_v4());

        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        mocks
            .store
            .expect_validate_discount_code()
            .returning(|_, _| {
                Ok(crate::services::DiscountValidation {
                    valid: true,
                    message: None,
                })
            });
        mocks
            .store
            .expect_fetch_discount_code()
            .returning(move |_| {
                Ok(Some(crate::models::DiscountCode {
                    id: code_id,
                    code: "VERANO10".to_owned(),
                    discount_type: DiscountType::Percentage,
                    discount_value: "10".parse().unwrap(),
                    single_use_per_user: false,
                    is_active: true,
                    max_uses: None,
                    times_used: 0,
                    valid_until: None,
                }))
            });
        expect_happy_order(&mut mocks.store);
        expect_happy_intent(&mut mocks.gateway);
        mocks
            .store
            .expect_product_stock()
            .returning(|_| Ok(Some(10)));
        // One unit was ordered; the post-submission cart edit must not
        // change the decrement
        mocks
            .store
            .expect_set_product_stock()
            .withf(move |id, stock| *id == product && *stock == 9)
            .times(1)
            .returning(|_, _| Ok(()));
        // The charge included the discount, so usage is still registered
        mocks
            .store
            .expect_register_discount_usage()
            .withf(move |id, _, _| *id == code_id)
            .times(1)
            .returning(|_, _, _| {
                Ok(UsageRegistration {
                    success: true,
                    message: None,
                })
            });
        mocks
            .mailer
            .expect_send_order_confirmation()
            .returning(|_, _| Ok(()));

        let mut cart = CartStore::new(Box::new(MemoryStorage::default()));
        cart.add_item(CartItem {
            id: product,
            name: "Jarrón ondulado".to_owned(),
            unit_price: eur("20.00"),
            quantity: 1,
            image: None,
            slug: "jarron-ondulado".to_owned(),
        });

        let mut flow = mocks.into_flow(cart);
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);
        flow.apply_discount("VERANO10").await.unwrap();
        flow.submit_shipping().await.unwrap();

        // Cart and discount drift while the payment element is open
        flow.cart_mut().update_quantity(product, 5);
        flow.remove_discount();

        let report = flow.payment_succeeded().await.unwrap();
        assert!(report.stock_updated);
        assert_eq!(report.discount_registered, Some(true));
        assert!(flow.cart().is_empty());
    }

    #[tokio::test]
    async fn test_payment_succeeded_requires_payment_step() {
        let mut flow = Mocks::new().into_flow(cart_with("20.00", 1));
        let err = flow.payment_succeeded().await.unwrap_err();
        assert!(matches!(err, CheckoutError::WrongStep { .. }));
    }

    #[tokio::test]
    async fn test_reopen_after_success_starts_over() {
        let mut mocks = Mocks::new();
        mocks.auth.expect_sign_in().returning(|_, _| Ok(buyer()));
        mocks
            .store
            .expect_fetch_profile_full_name()
            .returning(|_| Ok(None));
        expect_happy_order(&mut mocks.store);
        expect_happy_intent(&mut mocks.gateway);
        mocks.store.expect_product_stock().returning(|_| Ok(Some(5)));
        mocks
            .store
            .expect_set_product_stock()
            .returning(|_, _| Ok(()));
        mocks
            .mailer
            .expect_send_order_confirmation()
            .returning(|_, _| Ok(()));

        let mut flow = mocks.into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.sign_in(&"lucia@example.com".parse().unwrap(), "hunter2")
            .await
            .unwrap();
        fill_form(&mut flow);
        flow.submit_shipping().await.unwrap();
        flow.payment_succeeded().await.unwrap();

        // The cart was cleared, so re-entry resets and then rejects
        let err = flow.open().await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
        assert_eq!(flow.step(), CheckoutStep::AuthChoice);
    }

    #[tokio::test]
    async fn test_close_resets_step_but_keeps_cart() {
        let mut flow = Mocks::new().into_flow(cart_with("20.00", 1));
        flow.open().await.unwrap();
        flow.choose_login();
        flow.close();

        assert_eq!(flow.step(), CheckoutStep::AuthChoice);
        assert!(!flow.cart().is_empty());
    }
}
