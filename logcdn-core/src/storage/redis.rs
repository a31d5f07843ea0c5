// Redis line buffer
//
// One sorted set per item, scored by line number. Members are the JSON
// encoding of the line, so two lines with equal text stay distinct.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use super::LineBuffer;
use crate::{
    models::{ItemId, Line},
    Result,
};

/// Replace whatever is stored at a line number, atomically
const APPEND_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], ARGV[1], ARGV[1])
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
return 1
";

/// Line buffer backed by Redis sorted sets
#[derive(Clone)]
pub struct RedisLineBuffer {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisLineBuffer {
    #[must_use]
    pub const fn new(conn: ConnectionManager, key_prefix: String) -> Self {
        Self { conn, key_prefix }
    }

    /// Connect to `url` and build a buffer
    pub async fn connect(url: &str, key_prefix: String) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, key_prefix))
    }

    fn key(&self, item_id: &ItemId) -> String {
        format!("{}lines:{}", self.key_prefix, item_id)
    }
}

#[async_trait]
impl LineBuffer for RedisLineBuffer {
    async fn append(&self, item_id: &ItemId, line: &Line) -> Result<()> {
        let member = serde_json::to_string(line)?;
        let mut conn = self.conn.clone();

        let _: i64 = redis::Script::new(APPEND_SCRIPT)
            .key(self.key(item_id))
            .arg(line.number)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn read_lines(&self, item_id: &ItemId, offset: i64, limit: Option<usize>) -> Result<Vec<Line>> {
        let key = self.key(item_id);
        let mut conn = self.conn.clone();

        let members: Vec<String> = match limit {
            Some(limit) => {
                let count = isize::try_from(limit).unwrap_or(isize::MAX);
                conn.zrangebyscore_limit(&key, offset, "+inf", 0, count).await?
            }
            None => conn.zrangebyscore(&key, offset, "+inf").await?,
        };

        members
            .iter()
            .map(|member| serde_json::from_str::<Line>(member).map_err(Into::into))
            .collect()
    }

    async fn delete_through(&self, item_id: &ItemId, last: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrembyscore(self.key(item_id), "-inf", last).await?;
        Ok(())
    }

    async fn exists(&self, item_id: &ItemId) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(self.key(item_id)).await?)
    }

    async fn delete(&self, item_id: &ItemId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(item_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn buffer() -> RedisLineBuffer {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        RedisLineBuffer::connect(&url, "logcdn_test:".to_string()).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_redis_buffer_replaces_line_number() {
        let buffer = buffer().await;
        let item = ItemId::new();

        buffer.append(&item, &Line::new(0, "same\n")).await.unwrap();
        buffer.append(&item, &Line::new(1, "same\n")).await.unwrap();
        buffer.append(&item, &Line::new(1, "retried\n")).await.unwrap();

        let lines = buffer.read_lines(&item, 0, None).await.unwrap();
        assert_eq!(lines, vec![Line::new(0, "same\n"), Line::new(1, "retried\n")]);

        let page = buffer.read_lines(&item, 1, Some(10)).await.unwrap();
        assert_eq!(page, vec![Line::new(1, "retried\n")]);

        buffer.delete(&item).await.unwrap();
        assert!(!buffer.exists(&item).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_redis_delete_through_keeps_later_lines() {
        let buffer = buffer().await;
        let item = ItemId::new();
        for n in 0..3 {
            buffer.append(&item, &Line::new(n, format!("{n}\n"))).await.unwrap();
        }

        buffer.delete_through(&item, 1).await.unwrap();
        assert_eq!(buffer.read_lines(&item, 0, None).await.unwrap(), vec![Line::new(2, "2\n")]);

        buffer.delete_through(&item, 2).await.unwrap();
        assert!(!buffer.exists(&item).await.unwrap());
    }
}
