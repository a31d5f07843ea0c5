//! Storage unit registry
//!
//! Built once at startup: every configured unit is registered in the registry
//! store and bound to its backend. Roles are resolved here so the rest of the
//! code never looks units up by name or re-checks flags.

use std::collections::HashSet;
use std::sync::Arc;

use super::{FileStorage, LineBuffer, MemoryLineBuffer, MemoryStorage, RedisLineBuffer, StorageBackend};
use crate::{
    config::{BackendConfig, UnitConfig, UnitsConfig},
    models::{StorageUnit, UnitId, UnitRole},
    repository::RegistryStore,
    Error, Result,
};

/// The buffer unit and its line store
#[derive(Clone)]
pub struct BufferUnit {
    pub unit: StorageUnit,
    pub lines: Arc<dyn LineBuffer>,
}

/// A durable unit and its content store
#[derive(Clone)]
pub struct PermanentUnit {
    pub unit: StorageUnit,
    pub backend: Arc<dyn StorageBackend>,
}

impl PermanentUnit {
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.unit.role == UnitRole::PermanentLegacy
    }
}

/// Immutable set of storage units known to this process
#[derive(Clone)]
pub struct StorageUnits {
    buffer: BufferUnit,
    permanents: Vec<PermanentUnit>,
}

impl StorageUnits {
    #[must_use]
    pub fn builder() -> StorageUnitsBuilder {
        StorageUnitsBuilder::default()
    }

    /// Build every configured backend and register the units
    pub async fn from_config(store: &dyn RegistryStore, config: &UnitsConfig) -> Result<Self> {
        let mut builder = Self::builder().buffer(&config.buffer.name, build_line_buffer(&config.buffer).await?);

        for unit in &config.permanents {
            let backend = build_backend(unit).await?;
            builder = if unit.legacy {
                builder.legacy(&unit.name, backend)
            } else {
                builder.permanent(&unit.name, backend)
            };
        }

        builder.register(store).await
    }

    #[must_use]
    pub const fn buffer(&self) -> &BufferUnit {
        &self.buffer
    }

    #[must_use]
    pub fn buffer_id(&self) -> &UnitId {
        &self.buffer.unit.id
    }

    #[must_use]
    pub fn lines(&self) -> &Arc<dyn LineBuffer> {
        &self.buffer.lines
    }

    /// Every durable unit, legacy included
    #[must_use]
    pub fn permanents(&self) -> &[PermanentUnit] {
        &self.permanents
    }

    #[must_use]
    pub fn legacy(&self) -> Option<&PermanentUnit> {
        self.permanents.iter().find(|p| p.is_legacy())
    }

    /// Durable units that gate buffer eviction
    pub fn durable_non_legacy(&self) -> impl Iterator<Item = &PermanentUnit> {
        self.permanents.iter().filter(|p| !p.is_legacy())
    }

    /// Ids of the units an item must be held by before it may leave the buffer
    #[must_use]
    pub fn required_for_eviction(&self) -> Vec<UnitId> {
        self.durable_non_legacy().map(|p| p.unit.id.clone()).collect()
    }
}

/// Collects unit definitions, then registers them all at once
#[derive(Default)]
pub struct StorageUnitsBuilder {
    buffer: Option<(String, Arc<dyn LineBuffer>)>,
    permanents: Vec<(String, UnitRole, Arc<dyn StorageBackend>)>,
}

impl StorageUnitsBuilder {
    #[must_use]
    pub fn buffer(mut self, name: &str, lines: Arc<dyn LineBuffer>) -> Self {
        self.buffer = Some((name.to_string(), lines));
        self
    }

    #[must_use]
    pub fn permanent(mut self, name: &str, backend: Arc<dyn StorageBackend>) -> Self {
        self.permanents.push((name.to_string(), UnitRole::Permanent, backend));
        self
    }

    #[must_use]
    pub fn legacy(mut self, name: &str, backend: Arc<dyn StorageBackend>) -> Self {
        self.permanents.push((name.to_string(), UnitRole::PermanentLegacy, backend));
        self
    }

    pub async fn register(self, store: &dyn RegistryStore) -> Result<StorageUnits> {
        let (buffer_name, lines) = self
            .buffer
            .ok_or_else(|| Error::Configuration("A buffer unit is required".to_string()))?;

        let legacy_count = self
            .permanents
            .iter()
            .filter(|(_, role, _)| *role == UnitRole::PermanentLegacy)
            .count();
        if legacy_count > 1 {
            return Err(Error::Configuration(format!(
                "At most one legacy unit is allowed, found {legacy_count}"
            )));
        }

        let mut names = HashSet::new();
        for name in std::iter::once(&buffer_name).chain(self.permanents.iter().map(|(name, _, _)| name)) {
            if !names.insert(name.as_str()) {
                return Err(Error::Configuration(format!("Duplicate storage unit name '{name}'")));
            }
        }

        let buffer = BufferUnit {
            unit: store.register_unit(&buffer_name, UnitRole::Buffer).await?,
            lines,
        };
        tracing::info!(unit = %buffer.unit.name, unit_id = %buffer.unit.id, "Registered buffer unit");

        let mut permanents = Vec::with_capacity(self.permanents.len());
        for (name, role, backend) in self.permanents {
            let unit = store.register_unit(&name, role).await?;
            tracing::info!(
                unit = %unit.name,
                unit_id = %unit.id,
                role = %role,
                backend = backend.kind(),
                "Registered permanent unit"
            );
            permanents.push(PermanentUnit { unit, backend });
        }

        if permanents.iter().all(PermanentUnit::is_legacy) {
            tracing::warn!("No non-legacy permanent unit configured, buffer content will never be evicted");
        }

        Ok(StorageUnits { buffer, permanents })
    }
}

async fn build_line_buffer(config: &UnitConfig) -> Result<Arc<dyn LineBuffer>> {
    match &config.backend {
        BackendConfig::Memory => Ok(Arc::new(MemoryLineBuffer::new())),
        BackendConfig::Redis { url, key_prefix } => {
            Ok(Arc::new(RedisLineBuffer::connect(url, key_prefix.clone()).await?))
        }
        _ => Err(Error::Configuration(format!(
            "Unit '{}' cannot be used as a line buffer",
            config.name
        ))),
    }
}

async fn build_backend(config: &UnitConfig) -> Result<Arc<dyn StorageBackend>> {
    match &config.backend {
        BackendConfig::Memory => Ok(Arc::new(MemoryStorage::new())),
        BackendConfig::File { path } => Ok(Arc::new(FileStorage::new(path).await?)),
        #[cfg(feature = "oss")]
        BackendConfig::Oss(oss) => Ok(Arc::new(super::OssStorage::new(oss)?)),
        #[cfg(not(feature = "oss"))]
        BackendConfig::Oss(_) => Err(Error::Configuration(format!(
            "Unit '{}' uses oss but this build lacks the `oss` feature",
            config.name
        ))),
        BackendConfig::Redis { .. } => Err(Error::Configuration(format!(
            "Unit '{}' cannot use redis as a permanent backend",
            config.name
        ))),
    }
}
