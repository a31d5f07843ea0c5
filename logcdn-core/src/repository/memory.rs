//! In-memory registry store
//!
//! Transactions take the single state lock for their whole lifetime and keep a
//! snapshot to restore on rollback, which gives serializable semantics. Used by
//! tests and by single-node development setups (`database.url = "memory://"`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{RegistryStore, RegistryTx};
use crate::{
    models::{DeleteSelector, Item, ItemId, ItemStatus, ItemType, ItemUnit, StorageUnit, UnitId, UnitRole},
    Error, Result,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    units: BTreeMap<UnitId, StorageUnit>,
    items: BTreeMap<ItemId, Item>,
    item_units: BTreeMap<(ItemId, UnitId), ItemUnit>,
    /// Items whose completion fails, to exercise rollback paths
    failing_completions: HashSet<ItemId>,
}

impl MemoryState {
    fn live_item_by_ref(&self, item_type: ItemType, api_ref_hash: &str) -> Option<&Item> {
        self.items
            .values()
            .find(|item| item.item_type == item_type && item.api_ref_hash == api_ref_hash && !item.to_delete)
    }

    fn has_unit(&self, item_id: &ItemId, unit_id: &UnitId) -> bool {
        self.item_units.contains_key(&(item_id.clone(), unit_id.clone()))
    }

    fn modified_at(&self, item_id: &ItemId, unit_id: &UnitId) -> Option<DateTime<Utc>> {
        self.item_units
            .get(&(item_id.clone(), unit_id.clone()))
            .map(|iu| iu.last_modified)
    }

    /// `target` holds a copy at least as recent as the one in `source`
    fn is_current(&self, item_id: &ItemId, source: &UnitId, target: &UnitId) -> bool {
        match (self.modified_at(item_id, source), self.modified_at(item_id, target)) {
            (Some(src), Some(dst)) => dst >= src,
            _ => false,
        }
    }
}

/// Registry store kept entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryRegistryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRegistryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items currently stored, flagged or not
    pub async fn item_count(&self) -> usize {
        self.state.lock().await.items.len()
    }

    #[cfg(test)]
    pub(crate) async fn fail_completion_of(&self, id: &ItemId) {
        self.state.lock().await.failing_completions.insert(id.clone());
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn begin(&self) -> Result<Box<dyn RegistryTx>> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn register_unit(&self, name: &str, role: UnitRole) -> Result<StorageUnit> {
        let mut state = self.state.lock().await;
        if let Some(unit) = state.units.values_mut().find(|unit| unit.name == name) {
            unit.role = role;
            return Ok(unit.clone());
        }

        let unit = StorageUnit {
            id: UnitId::new(),
            name: name.to_string(),
            role,
            created_at: Utc::now(),
        };
        state.units.insert(unit.id.clone(), unit.clone());
        Ok(unit)
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        Ok(self.state.lock().await.items.get(id).cloned())
    }

    async fn get_item_by_ref(&self, item_type: ItemType, api_ref_hash: &str) -> Result<Option<Item>> {
        let state = self.state.lock().await;
        Ok(state.live_item_by_ref(item_type, api_ref_hash).cloned())
    }

    async fn load_item_ids_to_delete(&self, limit: usize) -> Result<Vec<ItemId>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|item| item.to_delete)
            .map(|item| item.id.clone())
            .take(limit)
            .collect())
    }

    async fn list_item_units(&self, item_id: &ItemId) -> Result<Vec<ItemUnit>> {
        let state = self.state.lock().await;
        Ok(state
            .item_units
            .values()
            .filter(|iu| &iu.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn load_old_item_units_by_status(
        &self,
        status: ItemStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ItemUnit>> {
        let state = self.state.lock().await;
        let mut units: Vec<ItemUnit> = state
            .item_units
            .values()
            .filter(|iu| iu.last_modified < older_than)
            .filter(|iu| {
                state
                    .items
                    .get(&iu.item_id)
                    .is_some_and(|item| item.status == status)
            })
            .cloned()
            .collect();
        units.sort_by_key(|iu| iu.last_modified);
        Ok(units)
    }

    async fn load_items_to_replicate(
        &self,
        source: &UnitId,
        target: &UnitId,
        limit: usize,
    ) -> Result<Vec<ItemId>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|item| item.is_completed() && !item.to_delete)
            .filter(|item| state.has_unit(&item.id, source) && !state.is_current(&item.id, source, target))
            .map(|item| item.id.clone())
            .take(limit)
            .collect())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    /// State before the transaction began; `None` once committed
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl RegistryTx for MemoryTx {
    async fn insert_item(&mut self, item: &Item) -> Result<Item> {
        if let Some(existing) = self.guard.live_item_by_ref(item.item_type, &item.api_ref_hash) {
            return Ok(existing.clone());
        }
        if self.guard.items.contains_key(&item.id) {
            return Err(Error::AlreadyExists(format!("Item {} already exists", item.id)));
        }
        self.guard.items.insert(item.id.clone(), item.clone());
        Ok(item.clone())
    }

    async fn complete_item(&mut self, id: &ItemId) -> Result<bool> {
        if self.guard.failing_completions.contains(id) {
            return Err(Error::Internal(format!("Injected completion failure for item {id}")));
        }
        match self.guard.items.get_mut(id) {
            Some(item) if item.status == ItemStatus::Incoming => {
                item.status = ItemStatus::Completed;
                item.last_modified = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_to_delete(&mut self, selector: DeleteSelector) -> Result<u64> {
        let now = Utc::now();
        let mut flagged = 0;
        for item in self.guard.items.values_mut() {
            if !item.to_delete && selector.matches(&item.api_ref) {
                item.to_delete = true;
                item.last_modified = now;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn delete_items(&mut self, ids: &[ItemId]) -> Result<u64> {
        let ids: HashSet<&ItemId> = ids.iter().collect();
        let state = &mut *self.guard;
        let before = state.items.len();
        state.items.retain(|id, _| !ids.contains(id));
        state.item_units.retain(|(item_id, _), _| !ids.contains(item_id));
        Ok((before - state.items.len()) as u64)
    }

    async fn upsert_item_unit(&mut self, item_unit: &ItemUnit) -> Result<()> {
        if !self.guard.items.contains_key(&item_unit.item_id) {
            return Err(Error::NotFound(format!("Item {} not found", item_unit.item_id)));
        }
        if !self.guard.units.contains_key(&item_unit.unit_id) {
            return Err(Error::NotFound(format!("Storage unit {} not found", item_unit.unit_id)));
        }
        self.guard.item_units.insert(
            (item_unit.item_id.clone(), item_unit.unit_id.clone()),
            item_unit.clone(),
        );
        Ok(())
    }

    async fn list_buffered_and_replicated(
        &mut self,
        buffer: &UnitId,
        required: &[UnitId],
    ) -> Result<Vec<ItemId>> {
        if required.is_empty() {
            return Ok(Vec::new());
        }
        let state = &*self.guard;
        Ok(state
            .item_units
            .keys()
            .filter(|(_, unit_id)| unit_id == buffer)
            .filter(|(item_id, _)| required.iter().all(|unit_id| state.is_current(item_id, buffer, unit_id)))
            .map(|(item_id, _)| item_id.clone())
            .collect())
    }

    async fn delete_item_units(&mut self, unit_id: &UnitId, ids: &[ItemId]) -> Result<u64> {
        let ids: HashSet<&ItemId> = ids.iter().collect();
        let before = self.guard.item_units.len();
        self.guard
            .item_units
            .retain(|(item_id, unit), _| !(unit == unit_id && ids.contains(item_id)));
        Ok((before - self.guard.item_units.len()) as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Drop restores the snapshot
        Ok(())
    }
}
