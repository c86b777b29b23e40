//! Domain models for the checkout core.

pub mod address;
pub mod buyer;
pub mod cart;
pub mod discount;
pub mod order;

pub use address::Address;
pub use buyer::Buyer;
pub use cart::CartItem;
pub use discount::{AppliedDiscount, DiscountCode};
pub use order::{NewOrder, NewOrderItem, Order, OrderTotals};
