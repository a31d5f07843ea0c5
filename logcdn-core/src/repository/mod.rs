//! Registry persistence contracts
//!
//! The item registry and the item/unit membership table live behind two traits:
//! [`RegistryStore`] for reads that need no isolation, and [`RegistryTx`] for
//! every mutation. A transaction that is dropped without [`RegistryTx::commit`]
//! is rolled back, so `?` on any step leaves no partial state behind.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{DeleteSelector, Item, ItemId, ItemStatus, ItemType, ItemUnit, StorageUnit, UnitId, UnitRole},
    Result,
};

pub use memory::MemoryRegistryStore;
pub use postgres::PgRegistryStore;

/// Read side of the registry plus the transaction factory
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Open a scoped transaction
    async fn begin(&self) -> Result<Box<dyn RegistryTx>>;

    /// Register (or re-register after restart) a storage unit by name
    async fn register_unit(&self, name: &str, role: UnitRole) -> Result<StorageUnit>;

    async fn get_item(&self, id: &ItemId) -> Result<Option<Item>>;

    /// Look up the live (not flagged for deletion) item for a reference
    async fn get_item_by_ref(&self, item_type: ItemType, api_ref_hash: &str) -> Result<Option<Item>>;

    /// Up to `limit` ids flagged `to_delete`, ordered by id
    async fn load_item_ids_to_delete(&self, limit: usize) -> Result<Vec<ItemId>>;

    async fn list_item_units(&self, item_id: &ItemId) -> Result<Vec<ItemUnit>>;

    /// Memberships whose item has `status` and whose last write is older than `older_than`
    async fn load_old_item_units_by_status(
        &self,
        status: ItemStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ItemUnit>>;

    /// Completed, live items held by `source` whose copy in `target` is
    /// missing or older than the one in `source`
    async fn load_items_to_replicate(
        &self,
        source: &UnitId,
        target: &UnitId,
        limit: usize,
    ) -> Result<Vec<ItemId>>;
}

/// Mutations, always scoped to one transaction
#[async_trait]
pub trait RegistryTx: Send {
    /// Compare-and-create on `(item_type, api_ref_hash)` among live items.
    ///
    /// Returns the stored item, which is the existing one when another
    /// writer won the race.
    async fn insert_item(&mut self, item: &Item) -> Result<Item>;

    /// `Incoming -> Completed`. Returns `false` when nothing changed.
    async fn complete_item(&mut self, id: &ItemId) -> Result<bool>;

    /// Flag every live item matched by `selector`. Returns how many were flagged.
    async fn mark_to_delete(&mut self, selector: DeleteSelector) -> Result<u64>;

    /// Hard-delete items together with their memberships
    async fn delete_items(&mut self, ids: &[ItemId]) -> Result<u64>;

    /// Record membership, refreshing `last_modified` when it already exists
    async fn upsert_item_unit(&mut self, item_unit: &ItemUnit) -> Result<()>;

    /// Items held by `buffer` whose copy in every unit of `required` is at
    /// least as recent as the buffered one.
    ///
    /// An empty `required` set yields nothing.
    async fn list_buffered_and_replicated(
        &mut self,
        buffer: &UnitId,
        required: &[UnitId],
    ) -> Result<Vec<ItemId>>;

    async fn delete_item_units(&mut self, unit_id: &UnitId, ids: &[ItemId]) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
