// Storage unit backends
//
// Two kinds of backends exist:
// - LineBuffer: the ingestion buffer, holding numbered lines per item
// - StorageBackend: durable units, holding each item's content as one blob
//
// Replicated content is stored as JSON lines of `Line`, so numbers (and any
// gaps between them) survive the move out of the buffer. Legacy units are
// filled out-of-band with plain text and are split on newlines instead.
//
// Which backend plays which role is decided once at boot by `StorageUnits`.

pub mod file;
pub mod memory;
pub mod oss;
pub mod redis;
pub mod units;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    models::{ItemId, Line},
    Result,
};

/// Buffer backend: per-item ordered lines addressed by line number
#[async_trait]
pub trait LineBuffer: Send + Sync {
    /// Store a line. Writing a number that already exists replaces its value.
    async fn append(&self, item_id: &ItemId, line: &Line) -> Result<()>;

    /// Lines with `number >= offset`, ascending, at most `limit` when given
    async fn read_lines(&self, item_id: &ItemId, offset: i64, limit: Option<usize>) -> Result<Vec<Line>>;

    /// Drop the lines numbered `last` or below. Lines written later with a
    /// higher number are kept.
    async fn delete_through(&self, item_id: &ItemId, last: i64) -> Result<()>;

    async fn exists(&self, item_id: &ItemId) -> Result<bool>;

    /// Drop every line of the item. Deleting a missing item succeeds.
    async fn delete(&self, item_id: &ItemId) -> Result<()>;
}

/// Durable backend: whole-item content keyed by item id
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write (or overwrite) the item's content
    async fn write(&self, item_id: &ItemId, data: Bytes) -> Result<()>;

    /// Read the item's content; `None` when the backend does not hold it
    async fn read(&self, item_id: &ItemId) -> Result<Option<Bytes>>;

    async fn exists(&self, item_id: &ItemId) -> Result<bool>;

    /// Remove the item's content. Deleting a missing item succeeds.
    async fn delete(&self, item_id: &ItemId) -> Result<()>;

    /// Short backend name for logs
    fn kind(&self) -> &'static str;
}

/// Encode lines for a durable unit, one JSON object per line
pub fn encode_lines(lines: &[Line]) -> Result<Bytes> {
    let mut out = Vec::new();
    for line in lines {
        serde_json::to_writer(&mut out, line)?;
        out.push(b'\n');
    }
    Ok(Bytes::from(out))
}

/// Decode content written by [`encode_lines`], ascending by number
pub fn decode_lines(data: &[u8]) -> Result<Vec<Line>> {
    let mut lines = serde_json::Deserializer::from_slice(data)
        .into_iter::<Line>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    lines.sort_by_key(|line| line.number);
    Ok(lines)
}

/// Split plain-text legacy content into lines numbered from 0.
///
/// Each line keeps its terminating newline. A trailing fragment without a
/// newline is kept as the last line.
#[must_use]
pub fn split_plain_text(data: &[u8]) -> Vec<Line> {
    let text = String::from_utf8_lossy(data);
    text.split_inclusive('\n')
        .enumerate()
        .map(|(number, value)| Line::new(number as i64, value))
        .collect()
}

pub use file::FileStorage;
pub use memory::{MemoryLineBuffer, MemoryStorage};
pub use oss::OssConfig;
#[cfg(feature = "oss")]
pub use oss::OssStorage;
pub use self::redis::RedisLineBuffer;
pub use units::{BufferUnit, PermanentUnit, StorageUnits, StorageUnitsBuilder};
