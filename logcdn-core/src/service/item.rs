use std::sync::Arc;

use crate::{
    models::{ApiRef, DeleteSelector, Item, ItemId, ItemType},
    repository::RegistryStore,
    Result,
};

/// Item registry: identity, lifecycle status and deletion flags
#[derive(Clone)]
pub struct ItemService {
    store: Arc<dyn RegistryStore>,
}

impl ItemService {
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    /// Return the live item for `(item_type, api_ref)`, creating it if needed.
    ///
    /// Concurrent callers for the same reference all get the same item.
    pub async fn create_or_get_item(&self, item_type: ItemType, api_ref: ApiRef) -> Result<Item> {
        let candidate = Item::new(item_type, api_ref)?;

        if let Some(existing) = self.store.get_item_by_ref(item_type, &candidate.api_ref_hash).await? {
            return Ok(existing);
        }

        let mut tx = self.store.begin().await?;
        let item = tx.insert_item(&candidate).await?;
        tx.commit().await?;

        if item.id == candidate.id {
            tracing::debug!(item_id = %item.id, item_type = %item_type, "Created item");
        }
        Ok(item)
    }

    /// Flag every live item matching `selector`. Content is left untouched.
    pub async fn mark_to_delete(&self, selector: DeleteSelector) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let flagged = tx.mark_to_delete(selector).await?;
        tx.commit().await?;

        tracing::info!(?selector, count = flagged, "Marked items for deletion");
        Ok(flagged)
    }

    /// `Incoming -> Completed`; a no-op returning `false` when already completed
    pub async fn complete_item(&self, id: &ItemId) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let changed = tx.complete_item(id).await?;
        tx.commit().await?;

        if changed {
            tracing::debug!(item_id = %id, "Completed item");
        }
        Ok(changed)
    }

    pub async fn load_ids_to_delete(&self, limit: usize) -> Result<Vec<ItemId>> {
        self.store.load_item_ids_to_delete(limit).await
    }

    /// Hard-delete items; memberships go with them
    pub async fn delete_by_ids(&self, ids: &[ItemId]) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let deleted = tx.delete_items(ids).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    pub async fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        self.store.get_item(id).await
    }

    pub async fn get_item_by_ref(&self, item_type: ItemType, api_ref_hash: &str) -> Result<Option<Item>> {
        self.store.get_item_by_ref(item_type, api_ref_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemStatus, MarkDeleteRequest};
    use crate::repository::MemoryRegistryStore;

    fn api_ref(run_id: i64, workflow_id: i64) -> ApiRef {
        ApiRef {
            project_key: "PROJ".to_string(),
            workflow_name: "build".to_string(),
            workflow_id,
            run_id,
            job_name: "compile".to_string(),
            step_name: "script".to_string(),
            ..Default::default()
        }
    }

    fn service() -> (ItemService, MemoryRegistryStore) {
        let store = MemoryRegistryStore::new();
        (ItemService::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_create_or_get_is_idempotent_on_ref() {
        let (items, store) = service();

        let first = items.create_or_get_item(ItemType::StepLog, api_ref(1, 1)).await.unwrap();
        let again = items.create_or_get_item(ItemType::StepLog, api_ref(1, 1)).await.unwrap();
        let service_log = items.create_or_get_item(ItemType::ServiceLog, api_ref(1, 1)).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, service_log.id);
        assert_eq!(store.item_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_one_item() {
        let (items, store) = service();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let items = items.clone();
                tokio::spawn(async move {
                    items.create_or_get_item(ItemType::StepLog, api_ref(5, 5)).await.unwrap()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.item_count().await, 1);
    }

    #[tokio::test]
    async fn test_flagged_item_no_longer_blocks_new_one() {
        let (items, _) = service();

        let first = items.create_or_get_item(ItemType::StepLog, api_ref(9, 9)).await.unwrap();
        items.mark_to_delete(DeleteSelector::Run(9)).await.unwrap();
        let second = items.create_or_get_item(ItemType::StepLog, api_ref(9, 9)).await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(items.get_item(&first.id).await.unwrap().unwrap().to_delete);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let (items, _) = service();
        let item = items.create_or_get_item(ItemType::StepLog, api_ref(1, 1)).await.unwrap();

        assert!(items.complete_item(&item.id).await.unwrap());
        assert!(!items.complete_item(&item.id).await.unwrap());

        let item = items.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
    }

    #[tokio::test]
    async fn test_mark_to_delete_by_run_then_workflow() {
        let (items, _) = service();
        let a = items.create_or_get_item(ItemType::StepLog, api_ref(1, 1)).await.unwrap();
        let b = items.create_or_get_item(ItemType::StepLog, api_ref(2, 2)).await.unwrap();
        let c = items.create_or_get_item(ItemType::StepLog, api_ref(3, 2)).await.unwrap();

        let by_run = DeleteSelector::try_from(MarkDeleteRequest { run_id: Some(2), workflow_id: None }).unwrap();
        assert_eq!(items.mark_to_delete(by_run).await.unwrap(), 1);

        let flags = |items: ItemService, ids: Vec<ItemId>| async move {
            let mut flags = Vec::new();
            for id in ids {
                flags.push(items.get_item(&id).await.unwrap().unwrap().to_delete);
            }
            flags
        };
        let ids = vec![a.id.clone(), b.id.clone(), c.id.clone()];
        assert_eq!(flags(items.clone(), ids.clone()).await, vec![false, true, false]);

        let by_workflow = DeleteSelector::try_from(MarkDeleteRequest { run_id: None, workflow_id: Some(1) }).unwrap();
        assert_eq!(items.mark_to_delete(by_workflow).await.unwrap(), 1);
        assert_eq!(flags(items.clone(), ids).await, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_delete_by_ids_removes_rows() {
        let (items, store) = service();
        let a = items.create_or_get_item(ItemType::StepLog, api_ref(1, 1)).await.unwrap();
        items.create_or_get_item(ItemType::StepLog, api_ref(2, 1)).await.unwrap();

        assert_eq!(items.delete_by_ids(&[a.id.clone()]).await.unwrap(), 1);
        assert!(items.get_item(&a.id).await.unwrap().is_none());
        assert_eq!(store.item_count().await, 1);
    }
}
