//! The checkout: a pure step machine, the address/contact form, and the
//! effectful flow driver that ties them to the collaborators.

pub mod flow;
pub mod form;
pub mod fsm;

pub use flow::CheckoutFlow;
pub use form::{AddressForm, CheckoutForm, FieldErrors, ValidatedCheckout};
pub use fsm::{transition, CheckoutEvent, CheckoutStep};
