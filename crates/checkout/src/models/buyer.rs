//! The authenticated buyer.

use arcilla_core::{Email, UserId};
use serde::{Deserialize, Serialize};

/// An authenticated buyer, as returned by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: UserId,
    pub email: Email,
}
