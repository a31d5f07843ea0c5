use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ItemService, StreamHub, UnitManager};
use crate::{
    metrics,
    models::{format_line, ApiRef, Item, ItemStatus, ItemType, Line, LogLevel},
    repository::RegistryStore,
    Result,
};

/// One log message sent by a job worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(default)]
    pub level: LogLevel,
    pub text: String,
    /// Zero-based position of the message in its stream
    pub line: i64,
    /// Set on the producer's last message
    #[serde(default)]
    pub terminal: bool,
}

/// Ingestion path: worker message -> buffer -> live subscribers
#[derive(Clone)]
pub struct LogIngestor {
    store: Arc<dyn RegistryStore>,
    items: ItemService,
    units: UnitManager,
    hub: StreamHub,
}

impl LogIngestor {
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, items: ItemService, units: UnitManager, hub: StreamHub) -> Self {
        Self { store, items, units, hub }
    }

    /// Store one message and fan it out.
    ///
    /// Messages for items that are already completed are still stored, so a
    /// producer retrying after its terminal message loses nothing.
    pub async fn store_log(&self, item_type: ItemType, api_ref: ApiRef, message: LogMessage) -> Result<Item> {
        let mut item = self.items.create_or_get_item(item_type, api_ref).await?;
        let line = Line::new(message.line, format_line(message.level, &message.text));
        let buffer = self.units.units().buffer_id();

        self.units.units().lines().append(&item.id, &line).await?;

        let mut tx = self.store.begin().await?;
        self.units.record_membership(tx.as_mut(), &item.id, buffer).await?;
        tx.commit().await?;

        self.hub.publish(&item.id, &line);
        metrics::content::LINES_INGESTED.inc();

        if message.terminal {
            self.items.complete_item(&item.id).await?;
            item.status = ItemStatus::Completed;
        }

        Ok(item)
    }
}
