//! The checkout finite state machine.
//!
//! A single pure transition function over explicit steps and events. The
//! effectful driver in [`super::flow`] emits events; nothing here performs
//! I/O, which keeps the sequencing independently testable.

use serde::{Deserialize, Serialize};

/// Where the buyer is in the checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    /// Entry state for unauthenticated buyers.
    #[default]
    AuthChoice,
    Login,
    Register,
    /// Shipping/billing address and contact email collection.
    Shipping,
    /// The gateway-hosted payment element is showing.
    Payment,
    /// Terminal: the payment succeeded and fulfillment ran.
    Success,
}

/// Something that happened to the checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutEvent {
    /// The checkout was opened. Authenticated buyers skip `AuthChoice`.
    Opened { authenticated: bool },
    ChoseLogin,
    ChoseRegister,
    BackToAuthChoice,
    /// Login or registration completed.
    Authenticated,
    /// The pending order and payment intent were created.
    OrderPlaced,
    /// The gateway reported a payment error.
    PaymentFailed,
    /// The gateway reported success and fulfillment ran.
    PaymentSucceeded,
    /// The checkout was closed or re-entered after `Success`.
    Reset,
}

/// The transition function. Unknown (step, event) combinations leave the
/// step unchanged.
#[must_use]
pub const fn transition(step: CheckoutStep, event: CheckoutEvent) -> CheckoutStep {
    use CheckoutEvent as E;
    use CheckoutStep as S;

    match (step, event) {
        (_, E::Reset) => S::AuthChoice,
        (S::AuthChoice | S::Login | S::Register, E::Opened { authenticated: true }) => S::Shipping,
        (S::AuthChoice, E::ChoseLogin) => S::Login,
        (S::AuthChoice, E::ChoseRegister) => S::Register,
        (S::Login, E::ChoseRegister) => S::Register,
        (S::Register, E::ChoseLogin) => S::Login,
        (S::Login | S::Register, E::BackToAuthChoice) => S::AuthChoice,
        (S::Login | S::Register, E::Authenticated) => S::Shipping,
        (S::Shipping, E::OrderPlaced) => S::Payment,
        (S::Payment, E::PaymentFailed) => S::Shipping,
        (S::Payment, E::PaymentSucceeded) => S::Success,
        _ => step,
    }
}
