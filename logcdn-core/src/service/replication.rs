use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{spawn_periodic, ContentReader};
use crate::{
    config::ReplicationConfig,
    metrics,
    models::{ItemId, ItemUnit},
    repository::RegistryStore,
    storage::{encode_lines, PermanentUnit, StorageUnits},
    Result,
};

/// Copies completed items from the buffer into every non-legacy permanent unit.
///
/// A copy is stamped with the buffer membership's `last_modified` as seen
/// before reading, so any line buffered afterwards marks it stale and the
/// item is copied again. Legacy units are filled out-of-band and never
/// written here.
#[derive(Clone)]
pub struct ReplicationWorker {
    store: Arc<dyn RegistryStore>,
    units: Arc<StorageUnits>,
    reader: ContentReader,
    config: ReplicationConfig,
}

impl ReplicationWorker {
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, units: Arc<StorageUnits>, config: ReplicationConfig) -> Self {
        let reader = ContentReader::new(store.clone(), units.clone());
        Self {
            store,
            units,
            reader,
            config,
        }
    }

    #[must_use]
    pub fn start(&self, cancel: &CancellationToken) -> JoinHandle<()> {
        let worker = self.clone();
        spawn_periodic(
            "replication",
            Duration::from_secs(self.config.interval_seconds),
            cancel.clone(),
            move || {
                let worker = worker.clone();
                async move { worker.replicate_once().await.map(|_| ()) }
            },
        )
    }

    /// One pass over every target unit. Returns the number of copies made.
    pub async fn replicate_once(&self) -> Result<usize> {
        let mut copied = 0;

        for target in self.units.durable_non_legacy() {
            let pending = self
                .store
                .load_items_to_replicate(self.units.buffer_id(), &target.unit.id, self.config.batch_size)
                .await?;

            for item_id in pending {
                match self.copy(&item_id, target).await {
                    Ok(false) => {}
                    Ok(true) => {
                        copied += 1;
                        metrics::content::ITEMS_REPLICATED.inc();
                        debug!(item_id = %item_id, unit = %target.unit.name, "Replicated item");
                    }
                    Err(e) => {
                        metrics::gc::ERRORS.with_label_values(&["replication"]).inc();
                        error!(item_id = %item_id, unit = %target.unit.name, error = %e, "Replication failed");
                    }
                }
            }
        }

        if copied > 0 {
            info!(count = copied, "Replicated items to permanent units");
        }
        Ok(copied)
    }

    async fn copy(&self, item_id: &ItemId, target: &PermanentUnit) -> Result<bool> {
        let buffered_at = self
            .store
            .list_item_units(item_id)
            .await?
            .into_iter()
            .find(|iu| &iu.unit_id == self.units.buffer_id())
            .map(|iu| iu.last_modified);
        let Some(buffered_at) = buffered_at else {
            // Evicted since it was listed
            return Ok(false);
        };

        // Merges any earlier permanent copy with the buffered lines
        let lines = self.reader.read_lines(item_id, 0, None).await?;
        target.backend.write(item_id, encode_lines(&lines)?).await?;

        let mut tx = self.store.begin().await?;
        tx.upsert_item_unit(&ItemUnit {
            last_modified: buffered_at,
            ..ItemUnit::new(item_id.clone(), target.unit.id.clone())
        })
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}
