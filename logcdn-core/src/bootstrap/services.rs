//! Service initialization and dependency injection

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use crate::{
    repository::{MemoryRegistryStore, PgRegistryStore, RegistryStore},
    service::{ContentReader, GarbageCollector, ItemService, LogIngestor, ReplicationWorker, StreamHub, UnitManager},
    storage::StorageUnits,
    Config,
};

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    /// Registry store shared by every service
    pub store: Arc<dyn RegistryStore>,
    /// Registered storage units
    pub units: Arc<StorageUnits>,
    /// Item lifecycle
    pub items: ItemService,
    /// Item/unit membership
    pub unit_manager: UnitManager,
    /// Content lookup across units
    pub reader: ContentReader,
    /// Live line fan-out
    pub hub: StreamHub,
    /// Worker message ingestion
    pub ingestor: LogIngestor,
    /// Background collectors
    pub gc: GarbageCollector,
    /// Buffer to permanent copier
    pub replication: ReplicationWorker,
}

/// Initialize all core services.
///
/// `pool` is `None` when the registry runs in memory.
pub async fn init_services(pool: Option<PgPool>, config: &Config) -> anyhow::Result<Services> {
    info!("Initializing services...");

    let store: Arc<dyn RegistryStore> = if let Some(pool) = pool {
        info!("Registry backed by PostgreSQL");
        Arc::new(PgRegistryStore::new(pool))
    } else {
        warn!("Registry is in memory; items are lost on restart");
        Arc::new(MemoryRegistryStore::new())
    };

    let units = Arc::new(StorageUnits::from_config(store.as_ref(), &config.units).await?);
    info!(
        buffer = %units.buffer().unit.name,
        permanents = units.permanents().len(),
        "Storage units registered"
    );

    let items = ItemService::new(store.clone());
    let unit_manager = UnitManager::new(store.clone(), units.clone());
    let reader = ContentReader::new(store.clone(), units.clone());
    let hub = StreamHub::new(reader.clone(), &config.stream);
    let ingestor = LogIngestor::new(store.clone(), items.clone(), unit_manager.clone(), hub.clone());
    let gc = GarbageCollector::new(store.clone(), items.clone(), unit_manager.clone(), config.gc.clone());
    let replication = ReplicationWorker::new(store.clone(), units.clone(), config.replication.clone());

    info!("Services initialized");

    Ok(Services {
        store,
        units,
        items,
        unit_manager,
        reader,
        hub,
        ingestor,
        gc,
        replication,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, UnitConfig};

    #[tokio::test]
    async fn test_memory_services_from_config() {
        let mut config = Config::default();
        config.units.permanents.push(UnitConfig {
            name: "fs".to_string(),
            legacy: false,
            backend: BackendConfig::Memory,
        });

        let services = init_services(None, &config).await.unwrap();
        assert_eq!(services.units.permanents().len(), 1);
        assert_eq!(services.unit_manager.units().required_for_eviction().len(), 1);
    }
}
