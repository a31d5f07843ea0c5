// In-memory backends
//
// Useful for:
// - Tests without Redis or filesystem I/O
// - Single-node development deployments
//
// Note: content is lost on restart

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{LineBuffer, StorageBackend};
use crate::{
    models::{ItemId, Line},
    Error, Result,
};

/// In-memory line buffer: one ordered map of lines per item
#[derive(Clone, Default)]
pub struct MemoryLineBuffer {
    items: Arc<DashMap<ItemId, BTreeMap<i64, String>>>,
}

impl MemoryLineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items currently buffered
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl LineBuffer for MemoryLineBuffer {
    async fn append(&self, item_id: &ItemId, line: &Line) -> Result<()> {
        self.items
            .entry(item_id.clone())
            .or_default()
            .insert(line.number, line.value.clone());
        Ok(())
    }

    async fn read_lines(&self, item_id: &ItemId, offset: i64, limit: Option<usize>) -> Result<Vec<Line>> {
        let Some(lines) = self.items.get(item_id) else {
            return Ok(Vec::new());
        };

        Ok(lines
            .range(offset..)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(number, value)| Line::new(*number, value.clone()))
            .collect())
    }

    async fn delete_through(&self, item_id: &ItemId, last: i64) -> Result<()> {
        self.items.remove_if_mut(item_id, |_, lines| {
            lines.retain(|number, _| *number > last);
            lines.is_empty()
        });
        Ok(())
    }

    async fn exists(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.items.contains_key(item_id))
    }

    async fn delete(&self, item_id: &ItemId) -> Result<()> {
        self.items.remove(item_id);
        Ok(())
    }
}

/// In-memory durable backend
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<DashMap<ItemId, Bytes>>,
    fail_deletes: Arc<AtomicBool>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.data.len()
    }

    #[cfg(test)]
    pub(crate) fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn write(&self, item_id: &ItemId, data: Bytes) -> Result<()> {
        tracing::trace!(item_id = %item_id, bytes = data.len(), "Wrote item to memory storage");
        self.data.insert(item_id.clone(), data);
        Ok(())
    }

    async fn read(&self, item_id: &ItemId) -> Result<Option<Bytes>> {
        Ok(self.data.get(item_id).map(|data| data.value().clone()))
    }

    async fn exists(&self, item_id: &ItemId) -> Result<bool> {
        Ok(self.data.contains_key(item_id))
    }

    async fn delete(&self, item_id: &ItemId) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("Delete of item {item_id} refused")));
        }
        self.data.remove(item_id);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
