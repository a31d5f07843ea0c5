//! Garbage collection
//!
//! Three independent loops, each on its own timer:
//! - purge: hard-delete items flagged `to_delete`, content first, rows second
//! - buffer: retire buffer copies once every non-legacy permanent unit holds an
//!   up-to-date copy of the item
//! - waiting: complete incoming items whose producer went quiet

use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{spawn_periodic, ItemService, UnitManager};
use crate::{
    config::GcConfig,
    metrics,
    models::{ItemId, ItemStatus},
    repository::RegistryStore,
    storage::decode_lines,
    Error, Result,
};

/// Summary of one stale-completion pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitingReport {
    pub completed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct GarbageCollector {
    store: Arc<dyn RegistryStore>,
    items: ItemService,
    units: UnitManager,
    config: GcConfig,
}

impl GarbageCollector {
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, items: ItemService, units: UnitManager, config: GcConfig) -> Self {
        Self {
            store,
            items,
            units,
            config,
        }
    }

    /// Start the three loops. They stop when `cancel` fires.
    #[must_use]
    pub fn start(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let purge = self.clone();
        let buffer = self.clone();
        let waiting = self.clone();

        vec![
            spawn_periodic("purge", self.config.purge_interval(), cancel.clone(), move || {
                let gc = purge.clone();
                async move { gc.clean_item_to_delete().await.map(|_| ()) }
            }),
            spawn_periodic("buffer", self.config.buffer_interval(), cancel.clone(), move || {
                let gc = buffer.clone();
                async move { gc.clean_buffer().await.map(|_| ()) }
            }),
            spawn_periodic("waiting", self.config.waiting_interval(), cancel.clone(), move || {
                let gc = waiting.clone();
                async move { gc.clean_waiting_item().await.map(|_| ()) }
            }),
        ]
    }

    /// Drain the `to_delete` backlog in fixed-size batches.
    ///
    /// Returns the number of items removed. A failure stops the pass; the
    /// remaining items stay flagged for the next one.
    pub async fn clean_item_to_delete(&self) -> Result<usize> {
        let mut total = 0;

        loop {
            let ids = self.items.load_ids_to_delete(self.config.delete_batch_size).await?;
            if ids.is_empty() {
                break;
            }

            self.purge_content(&ids).await?;
            let deleted = self.items.delete_by_ids(&ids).await?;

            metrics::gc::ITEMS_DELETED.inc_by(deleted);
            total += ids.len();
            debug!(count = ids.len(), "Deleted batch of items");
        }

        if total > 0 {
            info!(count = total, "Hard-deleted items");
        }
        Ok(total)
    }

    async fn purge_content(&self, ids: &[ItemId]) -> Result<()> {
        let units = self.units.units();
        for id in ids {
            units.lines().delete(id).await?;
            for permanent in units.permanents() {
                permanent.backend.delete(id).await?;
            }
        }
        Ok(())
    }

    /// Remove buffer memberships of items durable everywhere it matters.
    ///
    /// The replication check and the delete share one transaction. Buffered
    /// lines are then dropped only up to the last line the permanent copy
    /// holds, so a line that lands during eviction stays readable.
    pub async fn clean_buffer(&self) -> Result<usize> {
        let units = self.units.units();
        if units.durable_non_legacy().next().is_none() {
            debug!("No non-legacy permanent unit, skipping buffer eviction");
            return Ok(0);
        }

        let mut tx = self.store.begin().await?;
        let candidates = self.units.list_buffered_and_replicated_except_legacy(tx.as_mut()).await?;

        let mut evicted = Vec::with_capacity(candidates.len());
        for id in candidates {
            match self.last_replicated_line(&id).await {
                Ok(last) => evicted.push((id, last)),
                Err(e) => warn!(item_id = %id, error = %e, "Cannot read permanent copy, keeping item buffered"),
            }
        }
        if evicted.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        let ids: Vec<ItemId> = evicted.iter().map(|(id, _)| id.clone()).collect();
        let removed = self.units.delete_from_unit(tx.as_mut(), units.buffer_id(), &ids).await?;
        tx.commit().await?;

        for (id, last) in &evicted {
            if let Err(e) = units.lines().delete_through(id, *last).await {
                warn!(item_id = %id, error = %e, "Failed to drop evicted buffer content");
            }
        }

        metrics::gc::BUFFER_EVICTIONS.inc_by(removed);
        info!(count = removed, "Evicted items from buffer");
        Ok(ids.len())
    }

    /// Highest line number in the first non-legacy permanent copy; -1 when empty
    async fn last_replicated_line(&self, id: &ItemId) -> Result<i64> {
        let units = self.units.units();
        let Some(unit) = units.durable_non_legacy().next() else {
            return Err(Error::Configuration("No non-legacy permanent unit".to_string()));
        };
        let data = unit
            .backend
            .read(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Item {id} has no content in unit {}", unit.unit.name)))?;

        Ok(decode_lines(&data)?.last().map_or(-1, |line| line.number))
    }

    /// Force-complete incoming items idle longer than the configured age.
    ///
    /// Each item commits on its own; a failure is logged and skipped.
    pub async fn clean_waiting_item(&self) -> Result<WaitingReport> {
        let stale = self
            .units
            .load_stale_incoming(ItemStatus::Incoming, self.config.incoming_max_age())
            .await?;

        let mut report = WaitingReport::default();
        let mut seen = HashSet::new();

        for item_unit in stale {
            if !seen.insert(item_unit.item_id.clone()) {
                continue;
            }

            match self.items.complete_item(&item_unit.item_id).await {
                Ok(true) => {
                    metrics::gc::ITEMS_COMPLETED.inc();
                    report.completed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    metrics::gc::ERRORS.with_label_values(&["waiting"]).inc();
                    error!(item_id = %item_unit.item_id, error = %e, "Failed to complete stale item");
                }
            }
        }

        if report.completed > 0 || report.failed > 0 {
            info!(completed = report.completed, failed = report.failed, "Completed stale incoming items");
        }
        Ok(report)
    }
}
