//! Two-tier discount-code evaluation.
//!
//! The server-side `validate_discount_code` procedure is the authoritative
//! tier. When that procedure is not deployed, the evaluator degrades to a
//! client-side re-check of the same fixed rules (active, not expired,
//! under the usage cap). Degraded-mode validation is logged; a failure of
//! both tiers is a hard rejection, never a silent success.

use std::sync::Arc;

use arcilla_core::Money;
use chrono::Utc;

use crate::models::AppliedDiscount;
use crate::services::{DataStore, DataStoreError};

/// Why a code could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum DiscountError {
    /// The code was rejected with a user-facing message.
    #[error("{0}")]
    Rejected(String),

    /// The data store could not be reached or answered unexpectedly.
    #[error("discount validation unavailable: {0}")]
    Unavailable(#[from] DataStoreError),
}

/// Translates a user-entered code string into an [`AppliedDiscount`] or a
/// rejection reason. Stateless; removal of an applied discount is a local
/// concern of the caller.
pub struct DiscountEvaluator {
    store: Arc<dyn DataStore>,
}

impl DiscountEvaluator {
    #[must_use]
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Validate `raw_code` against `subtotal` and compute the discount.
    ///
    /// The code is normalized (trimmed, uppercased) before validation.
    ///
    /// # Errors
    ///
    /// Returns [`DiscountError::Rejected`] for invalid, expired, or
    /// exhausted codes, and [`DiscountError::Unavailable`] when both
    /// validation tiers are unreachable.
    #[tracing::instrument(skip(self, raw_code), fields(subtotal = %subtotal))]
    pub async fn apply(
        &self,
        raw_code: &str,
        subtotal: Money,
    ) -> Result<AppliedDiscount, DiscountError> {
        let code = raw_code.trim().to_uppercase();
        if code.is_empty() {
            return Err(DiscountError::Rejected(
                "Enter a discount code".to_owned(),
            ));
        }

        match self
            .store
            .validate_discount_code(&code, subtotal.amount())
            .await
        {
            Ok(validation) if validation.valid => self.apply_validated(&code, subtotal).await,
            Ok(validation) => Err(DiscountError::Rejected(
                validation
                    .message
                    .unwrap_or_else(|| "Invalid discount code".to_owned()),
            )),
            Err(DataStoreError::ProcedureMissing(proc)) => {
                tracing::warn!(procedure = %proc, "discount validation degraded to client-side re-check");
                self.apply_fallback(&code, subtotal).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the details of a code the server already validated.
    async fn apply_validated(
        &self,
        code: &str,
        subtotal: Money,
    ) -> Result<AppliedDiscount, DiscountError> {
        let row = self
            .store
            .fetch_discount_code(code)
            .await?
            .ok_or_else(|| DiscountError::Rejected("Invalid discount code".to_owned()))?;

        Ok(AppliedDiscount::compute(&row, subtotal))
    }

    /// Degraded tier: re-apply the server's fixed rules locally.
    async fn apply_fallback(
        &self,
        code: &str,
        subtotal: Money,
    ) -> Result<AppliedDiscount, DiscountError> {
        let row = self
            .store
            .fetch_discount_code(code)
            .await?
            .ok_or_else(|| DiscountError::Rejected("Invalid discount code".to_owned()))?;

        if !row.is_active {
            return Err(DiscountError::Rejected("Invalid discount code".to_owned()));
        }
        if row.is_expired(Utc::now()) {
            return Err(DiscountError::Rejected(
                "This discount code has expired".to_owned(),
            ));
        }
        if row.is_exhausted() {
            return Err(DiscountError::Rejected(
                "This discount code is no longer available".to_owned(),
            ));
        }

        Ok(AppliedDiscount::compute(&row, subtotal))
    }
}
