//! Post-payment fulfillment side effects.
//!
//! Runs exactly once, after the gateway reports payment success and before
//! the checkout enters `Success`. The three effects are independent and
//! fault-isolated: each failure is logged and swallowed, because payment
//! success is the only hard gate for order completion. There is no retry;
//! effects are one-shot, best-effort.

use arcilla_core::{Email, OrderId};

use crate::models::{AppliedDiscount, CartItem};
use crate::services::{DataStore, EmailSender};

/// What actually happened during fulfillment. Informational only; the
/// orchestrator enters `Success` regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FulfillmentReport {
    /// `None` when no discount was applied.
    pub discount_registered: Option<bool>,
    /// Whether every purchased product's stock was decremented.
    pub stock_updated: bool,
    pub email_sent: bool,
}

/// Run all fulfillment effects concurrently.
#[tracing::instrument(skip_all, fields(order_id = %order_id))]
pub async fn run(
    store: &dyn DataStore,
    mailer: &dyn EmailSender,
    order_id: OrderId,
    recipient: &Email,
    items: &[CartItem],
    discount: Option<&AppliedDiscount>,
) -> FulfillmentReport {
    let (discount_registered, stock_updated, email_sent) = tokio::join!(
        register_discount_usage(store, order_id, discount),
        decrement_stock(store, items),
        send_confirmation(mailer, order_id, recipient),
    );

    FulfillmentReport {
        discount_registered,
        stock_updated,
        email_sent,
    }
}

/// Record the discount usage against the order, if one was applied.
async fn register_discount_usage(
    store: &dyn DataStore,
    order_id: OrderId,
    discount: Option<&AppliedDiscount>,
) -> Option<bool> {
    let discount = discount?;

    match store
        .register_discount_usage(discount.code_id, order_id, discount.amount.amount())
        .await
    {
        Ok(result) if result.success => Some(true),
        Ok(result) => {
            tracing::warn!(
                code = %discount.code,
                message = result.message.as_deref().unwrap_or("unknown"),
                "discount usage registration declined"
            );
            Some(false)
        }
        Err(e) => {
            tracing::warn!(code = %discount.code, error = %e, "failed to register discount usage");
            Some(false)
        }
    }
}

/// Decrement each product's stock by the purchased quantity.
///
/// This is a read-then-write without locking; concurrent purchases of the
/// same product can race. Products that no longer exist are skipped.
async fn decrement_stock(store: &dyn DataStore, items: &[CartItem]) -> bool {
    let mut all_ok = true;

    for item in items {
        let stock = match store.product_stock(item.id).await {
            Ok(Some(stock)) => stock,
            Ok(None) => {
                tracing::warn!(product_id = %item.id, "product gone, skipping stock update");
                continue;
            }
            Err(e) => {
                tracing::warn!(product_id = %item.id, error = %e, "failed to read stock");
                all_ok = false;
                continue;
            }
        };

        if let Err(e) = store
            .set_product_stock(item.id, stock - i64::from(item.quantity))
            .await
        {
            tracing::warn!(product_id = %item.id, error = %e, "failed to update stock");
            all_ok = false;
        }
    }

    all_ok
}

async fn send_confirmation(mailer: &dyn EmailSender, order_id: OrderId, recipient: &Email) -> bool {
    match mailer.send_order_confirmation(order_id, recipient).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "failed to send order confirmation email");
            false
        }
    }
}
