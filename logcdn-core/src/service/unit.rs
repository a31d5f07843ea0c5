use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    models::{ItemId, ItemStatus, ItemUnit, UnitId},
    repository::{RegistryStore, RegistryTx},
    storage::StorageUnits,
    Error, Result,
};

/// Storage unit manager: which unit holds which item
#[derive(Clone)]
pub struct UnitManager {
    store: Arc<dyn RegistryStore>,
    units: Arc<StorageUnits>,
}

impl UnitManager {
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, units: Arc<StorageUnits>) -> Self {
        Self { store, units }
    }

    #[must_use]
    pub fn units(&self) -> &Arc<StorageUnits> {
        &self.units
    }

    /// Items in the buffer that every non-legacy permanent unit also holds.
    ///
    /// Runs inside the caller's transaction so the answer is current at the
    /// moment the caller acts on it. Without any non-legacy permanent unit
    /// nothing qualifies.
    pub async fn list_buffered_and_replicated_except_legacy(
        &self,
        tx: &mut dyn RegistryTx,
    ) -> Result<Vec<ItemId>> {
        let required = self.units.required_for_eviction();
        tx.list_buffered_and_replicated(self.units.buffer_id(), &required).await
    }

    /// Remove membership rows for `ids` in `unit_id`, within the caller's transaction
    pub async fn delete_from_unit(
        &self,
        tx: &mut dyn RegistryTx,
        unit_id: &UnitId,
        ids: &[ItemId],
    ) -> Result<u64> {
        tx.delete_item_units(unit_id, ids).await
    }

    /// Record (or refresh) that `unit_id` holds `item_id`
    pub async fn record_membership(
        &self,
        tx: &mut dyn RegistryTx,
        item_id: &ItemId,
        unit_id: &UnitId,
    ) -> Result<()> {
        tx.upsert_item_unit(&ItemUnit::new(item_id.clone(), unit_id.clone())).await
    }

    /// Memberships whose item is in `status` and whose last write is older than `max_age`
    pub async fn load_stale_incoming(&self, status: ItemStatus, max_age: Duration) -> Result<Vec<ItemUnit>> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::InvalidInput(format!("Invalid max age: {e}")))?;
        self.store
            .load_old_item_units_by_status(status, Utc::now() - max_age)
            .await
    }

    pub async fn list_item_units(&self, item_id: &ItemId) -> Result<Vec<ItemUnit>> {
        self.store.list_item_units(item_id).await
    }
}
