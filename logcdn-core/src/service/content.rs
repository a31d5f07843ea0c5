use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::{
    models::{ItemId, Line},
    repository::RegistryStore,
    storage::{decode_lines, split_plain_text, PermanentUnit, StorageUnits},
    Result,
};

/// Locates an item's content across units and reads it as lines
#[derive(Clone)]
pub struct ContentReader {
    store: Arc<dyn RegistryStore>,
    units: Arc<StorageUnits>,
}

impl ContentReader {
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, units: Arc<StorageUnits>) -> Self {
        Self { store, units }
    }

    /// Lines with `number >= offset`, ascending, at most `limit`.
    ///
    /// Content comes from the first permanent unit holding the item
    /// (non-legacy units first) merged with whatever the buffer holds. Lines
    /// written after an eviction live only in the buffer, earlier ones only
    /// in the permanent copy. On a shared number the buffer wins.
    pub async fn read_lines(&self, item_id: &ItemId, offset: i64, limit: Option<usize>) -> Result<Vec<Line>> {
        let memberships = self.store.list_item_units(item_id).await?;
        let held: HashSet<_> = memberships.iter().map(|m| &m.unit_id).collect();
        let buffered = held.contains(self.units.buffer_id());

        let permanent = self
            .units
            .durable_non_legacy()
            .chain(self.units.legacy())
            .find(|p| held.contains(&p.unit.id));

        let Some(permanent) = permanent else {
            if buffered {
                return self.units.lines().read_lines(item_id, offset, limit).await;
            }
            return Ok(Vec::new());
        };

        let mut merged: BTreeMap<i64, String> = self
            .read_permanent(item_id, permanent)
            .await?
            .into_iter()
            .filter(|line| line.number >= offset)
            .map(|line| (line.number, line.value))
            .collect();

        if buffered {
            // The first `limit` merged lines are among the first `limit` of each side
            for line in self.units.lines().read_lines(item_id, offset, limit).await? {
                merged.insert(line.number, line.value);
            }
        }

        Ok(merged
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(number, value)| Line::new(number, value))
            .collect())
    }

    async fn read_permanent(&self, item_id: &ItemId, unit: &PermanentUnit) -> Result<Vec<Line>> {
        let Some(data) = unit.backend.read(item_id).await? else {
            tracing::warn!(
                item_id = %item_id,
                unit = %unit.unit.name,
                "Unit is registered as holding item but has no content"
            );
            return Ok(Vec::new());
        };

        if unit.is_legacy() {
            Ok(split_plain_text(&data))
        } else {
            decode_lines(&data)
        }
    }

    /// Full content of the item as served for download
    pub async fn render(&self, item_id: &ItemId) -> Result<String> {
        let lines = self.read_lines(item_id, 0, None).await?;
        Ok(lines.into_iter().map(|line| line.value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiRef, Item, ItemType, ItemUnit};
    use crate::repository::MemoryRegistryStore;
    use crate::storage::{encode_lines, MemoryLineBuffer, MemoryStorage};
    use bytes::Bytes;

    struct Fixture {
        store: MemoryRegistryStore,
        units: Arc<StorageUnits>,
        reader: ContentReader,
        item: Item,
    }

    async fn fixture() -> Fixture {
        let store = MemoryRegistryStore::new();
        let units = Arc::new(
            StorageUnits::builder()
                .buffer("buffer", Arc::new(MemoryLineBuffer::new()))
                .permanent("fs", Arc::new(MemoryStorage::new()))
                .legacy("cds", Arc::new(MemoryStorage::new()))
                .register(&store)
                .await
                .unwrap(),
        );
        let item = Item::new(ItemType::StepLog, ApiRef::default()).unwrap();
        let mut tx = store.begin().await.unwrap();
        let item = tx.insert_item(&item).await.unwrap();
        tx.commit().await.unwrap();

        let reader = ContentReader::new(Arc::new(store.clone()), units.clone());
        Fixture { store, units, reader, item }
    }

    async fn hold(store: &MemoryRegistryStore, item: &ItemId, unit: &crate::models::UnitId) {
        let mut tx = store.begin().await.unwrap();
        tx.upsert_item_unit(&ItemUnit::new(item.clone(), unit.clone())).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_reads_from_buffer_while_buffered() {
        let f = fixture().await;
        for n in 0..3 {
            f.units.lines().append(&f.item.id, &Line::new(n, format!("[INFO] {n}\n"))).await.unwrap();
        }
        hold(&f.store, &f.item.id, f.units.buffer_id()).await;

        let lines = f.reader.read_lines(&f.item.id, 1, Some(1)).await.unwrap();
        assert_eq!(lines, vec![Line::new(1, "[INFO] 1\n")]);
        assert_eq!(f.reader.render(&f.item.id).await.unwrap(), "[INFO] 0\n[INFO] 1\n[INFO] 2\n");
    }

    #[tokio::test]
    async fn test_permanent_content_keeps_line_numbers() {
        let f = fixture().await;
        let fs = f.units.durable_non_legacy().next().unwrap();
        let stored = vec![
            Line::new(0, "[INFO] a\n"),
            Line::new(2, "[INFO] b\n"),
            Line::new(3, "[INFO] c\nd\n"),
        ];
        fs.backend.write(&f.item.id, encode_lines(&stored).unwrap()).await.unwrap();
        hold(&f.store, &f.item.id, &fs.unit.id).await;

        let lines = f.reader.read_lines(&f.item.id, 1, None).await.unwrap();
        assert_eq!(lines, stored[1..].to_vec());
        assert_eq!(
            f.reader.render(&f.item.id).await.unwrap(),
            "[INFO] a\n[INFO] b\n[INFO] c\nd\n"
        );
    }

    #[tokio::test]
    async fn test_legacy_content_is_plain_text() {
        let f = fixture().await;
        let cds = f.units.legacy().unwrap();
        cds.backend
            .write(&f.item.id, Bytes::from_static(b"[INFO] a\n[INFO] b\n"))
            .await
            .unwrap();
        hold(&f.store, &f.item.id, &cds.unit.id).await;

        let lines = f.reader.read_lines(&f.item.id, 1, None).await.unwrap();
        assert_eq!(lines, vec![Line::new(1, "[INFO] b\n")]);
    }

    #[tokio::test]
    async fn test_buffered_lines_merge_with_permanent_copy() {
        let f = fixture().await;
        let fs = f.units.durable_non_legacy().next().unwrap();
        let copied = vec![Line::new(0, "[INFO] 0\n"), Line::new(1, "[INFO] 1\n")];
        fs.backend.write(&f.item.id, encode_lines(&copied).unwrap()).await.unwrap();
        hold(&f.store, &f.item.id, &fs.unit.id).await;

        f.units.lines().append(&f.item.id, &Line::new(1, "[INFO] one\n")).await.unwrap();
        f.units.lines().append(&f.item.id, &Line::new(3, "[INFO] 3\n")).await.unwrap();
        hold(&f.store, &f.item.id, f.units.buffer_id()).await;

        let numbers: Vec<(i64, String)> = f
            .reader
            .read_lines(&f.item.id, 0, None)
            .await
            .unwrap()
            .into_iter()
            .map(|l| (l.number, l.value))
            .collect();
        assert_eq!(
            numbers,
            vec![
                (0, "[INFO] 0\n".to_string()),
                (1, "[INFO] one\n".to_string()),
                (3, "[INFO] 3\n".to_string()),
            ]
        );

        let page = f.reader.read_lines(&f.item.id, 1, Some(1)).await.unwrap();
        assert_eq!(page, vec![Line::new(1, "[INFO] one\n")]);
    }

    #[tokio::test]
    async fn test_unknown_membership_reads_empty() {
        let f = fixture().await;
        assert!(f.reader.read_lines(&f.item.id, 0, None).await.unwrap().is_empty());
        assert_eq!(f.reader.render(&f.item.id).await.unwrap(), "");
    }
}
