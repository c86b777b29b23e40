//! Client-local cart with durable persistence.
//!
//! The cart is the source of truth for "what is being purchased". Every
//! mutation persists the full item list through a [`CartStorage`]; on
//! construction the store restores from that storage, tolerating corrupt
//! or missing data (log and start empty).

use std::path::PathBuf;
use std::sync::Mutex;

use arcilla_core::{Money, ProductId};

use crate::models::CartItem;

/// Errors from the cart persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum CartStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage poisoned")]
    Poisoned,
}

/// Durable local storage for the serialized cart.
#[cfg_attr(test, mockall::automock)]
pub trait CartStorage: Send + Sync {
    /// Load the persisted payload, if any.
    fn load(&self) -> Result<Option<String>, CartStorageError>;

    /// Persist the payload, replacing any previous one.
    fn save(&self, payload: &str) -> Result<(), CartStorageError>;
}

/// Cart persistence backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Create storage at the given path. The file is created on first save.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CartStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<String>, CartStorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, payload: &str) -> Result<(), CartStorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, payload)?;
        Ok(())
    }
}

/// In-memory cart storage, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    cell: Mutex<Option<String>>,
}

impl CartStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, CartStorageError> {
        Ok(self
            .cell
            .lock()
            .map_err(|_| CartStorageError::Poisoned)?
            .clone())
    }

    fn save(&self, payload: &str) -> Result<(), CartStorageError> {
        *self.cell.lock().map_err(|_| CartStorageError::Poisoned)? = Some(payload.to_owned());
        Ok(())
    }
}

/// The cart: line items keyed by product id, with derived totals.
pub struct CartStore {
    items: Vec<CartItem>,
    storage: Box<dyn CartStorage>,
}

impl CartStore {
    /// Create a cart, restoring any persisted items.
    ///
    /// Malformed persisted data is logged and discarded; the cart starts
    /// empty rather than failing.
    #[must_use]
    pub fn new(storage: Box<dyn CartStorage>) -> Self {
        let items = match storage.load() {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(error = %e, "discarding corrupt persisted cart");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load persisted cart, starting empty");
                Vec::new()
            }
        };

        Self { items, storage }
    }

    /// Add an item; if the product is already in the cart, its quantity is
    /// incremented by `item.quantity`.
    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.id == item.id) {
            existing.quantity += item.quantity;
        } else {
            self.items.push(item);
        }
        self.persist();
    }

    /// Remove a product's line item. No-op if absent.
    pub fn remove_item(&mut self, product_id: ProductId) {
        self.items.retain(|i| i.id != product_id);
        self.persist();
    }

    /// Set a line item's quantity; zero removes the item entirely.
    pub fn update_quantity(&mut self, product_id: ProductId, quantity: u32) {
        if quantity == 0 {
            self.remove_item(product_id);
            return;
        }
        if let Some(item) = self.items.iter_mut().find(|i| i.id == product_id) {
            item.quantity = quantity;
        }
        self.persist();
    }

    /// Empty the cart. Called after a confirmed order or explicit user action.
    pub fn clear(&mut self) {
        self.items.clear();
        self.persist();
    }

    /// Whether the product has a line item.
    #[must_use]
    pub fn is_in_cart(&self, product_id: ProductId) -> bool {
        self.items.iter().any(|i| i.id == product_id)
    }

    /// Current line items.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Whether the cart has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total unit count across all line items.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Sum of line totals.
    #[must_use]
    pub fn total_price(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Persist the full item list. Save failures are logged and swallowed;
    /// the in-memory cart stays usable.
    fn persist(&self) {
        let payload = match serde_json::to_string(&self.items) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize cart");
                return;
            }
        };
        if let Err(e) = self.storage.save(&payload) {
            tracing::warn!(error = %e, "failed to persist cart");
        }
    }
}
