//! Arcilla Checkout - cart, discounts, and checkout orchestration.
//!
//! This crate is the transactional core of the Arcilla storefront, a
//! handmade-jewelry shop backed by a hosted database/auth/storage platform
//! and a third-party payment processor. The surrounding UI (pages, forms,
//! admin) lives elsewhere; this crate owns the parts with real sequencing
//! and failure-handling concerns:
//!
//! - [`cart`] - client-local cart with durable persistence
//! - [`discount`] - two-tier discount-code validation and amount computation
//! - [`checkout`] - the checkout state machine and its effectful driver
//! - [`fulfillment`] - post-payment side effects (stock, usage, email)
//!
//! External collaborators (data store, payment gateway, email dispatcher,
//! auth) are consumed through the traits in [`services`]; a single
//! [`services::platform::PlatformClient`] implements all of them against
//! the hosted backend.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod checkout;
pub mod config;
pub mod discount;
pub mod error;
pub mod fulfillment;
pub mod geo;
pub mod models;
pub mod services;
